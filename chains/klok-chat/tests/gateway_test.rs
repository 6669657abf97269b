use core_logic::{MetricsCollector, NetworkError};
use klok_chat::{ApiRequest, ApiResponse, ApiSettings, Gateway, HttpGateway, KlokApi, SessionToken};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct Stub {
    base_url: String,
    request: oneshot::Receiver<String>,
}

/// Serves exactly one HTTP/1.1 exchange and hands back the raw request.
async fn serve_once(status: &'static str, body: &'static str, delay: Duration) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let raw = read_request(&mut socket).await;
        let _ = tx.send(raw);

        tokio::time::sleep(delay).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });

    Stub {
        base_url: format!("http://{}", addr),
        request: rx,
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn settings(base_url: &str) -> ApiSettings {
    ApiSettings {
        base_url: base_url.to_string(),
        origin: "https://klokapp.ai".to_string(),
        user_agent: "Mozilla/5.0".to_string(),
        referral_code: String::new(),
        model: "llama-3.3-70b-instruct".to_string(),
        language: "english".to_string(),
    }
}

#[tokio::test]
async fn test_json_body_is_parsed() {
    let stub = serve_once("200 OK", r#"{"remaining": 7}"#, Duration::ZERO).await;
    let gateway = HttpGateway::new(Duration::from_secs(5), None);

    let response = gateway
        .send(ApiRequest::get(format!("{}/v1/rate-limit", stub.base_url)))
        .await;

    assert_eq!(response, Some(ApiResponse::Json(json!({ "remaining": 7 }))));
}

#[tokio::test]
async fn test_text_body_is_kept_raw() {
    let stub = serve_once("200 OK", "just words", Duration::ZERO).await;
    let gateway = HttpGateway::new(Duration::from_secs(5), None);

    let response = gateway
        .send(ApiRequest::get(format!("{}/v1/chat", stub.base_url)))
        .await;

    assert_eq!(response, Some(ApiResponse::Text("just words".to_string())));
}

#[tokio::test]
async fn test_non_success_status_is_a_failure() {
    let stub = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#, Duration::ZERO).await;
    let metrics = Arc::new(MetricsCollector::new());
    let gateway =
        HttpGateway::new(Duration::from_secs(5), None).with_metrics(Arc::clone(&metrics));

    let url = format!("{}/v1/chat/stats", stub.base_url);
    let result = gateway.execute(ApiRequest::get(url.clone())).await;
    assert!(matches!(
        result,
        Err(NetworkError::HttpError { status_code: 500, .. })
    ));

    let stub = serve_once("403 Forbidden", "{}", Duration::ZERO).await;
    let response = gateway
        .send(ApiRequest::get(format!("{}/v1/chat/stats", stub.base_url)))
        .await;
    assert!(response.is_none());

    let http = metrics.snapshot().http;
    assert_eq!(http.total_calls, 1);
    assert_eq!(http.failed_calls, 1);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let stub = serve_once("200 OK", "{}", Duration::from_secs(3)).await;
    let gateway = HttpGateway::new(Duration::from_millis(200), None);

    let started = std::time::Instant::now();
    let result = gateway
        .execute(ApiRequest::get(format!("{}/v1/rate-limit", stub.base_url)))
        .await;

    assert!(matches!(result, Err(NetworkError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_refused_connection_is_a_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = HttpGateway::new(Duration::from_secs(2), None);
    let url = format!("http://{}/v1/verify", addr);

    assert!(gateway.execute(ApiRequest::get(url.clone())).await.is_err());
    assert!(gateway.send(ApiRequest::get(url)).await.is_none());
}

#[tokio::test]
async fn test_verify_over_http() {
    let stub = serve_once("200 OK", r#"{"session_token":"abc123"}"#, Duration::ZERO).await;
    let gateway = Arc::new(HttpGateway::new(Duration::from_secs(5), None));
    let api = KlokApi::new(gateway, settings(&stub.base_url));

    let token = api.verify("0xsig", "hello").await;
    assert_eq!(token, Some(SessionToken::new("abc123")));

    let raw = stub.request.await.unwrap();
    let lower = raw.to_ascii_lowercase();
    assert!(raw.starts_with("POST /v1/verify HTTP/1.1"));
    assert!(lower.contains("origin: https://klokapp.ai"));
    assert!(lower.contains("referer: https://klokapp.ai/"));
    assert!(lower.contains("content-type: application/json"));
    assert!(raw.contains(r#""signedMessage":"0xsig""#));
}

#[tokio::test]
async fn test_session_header_sent_on_stats() {
    let stub = serve_once(
        "200 OK",
        r#"{"daily_limit":10,"total_messages":3,"points_earned":1.5,"reset_time":60}"#,
        Duration::ZERO,
    )
    .await;
    let gateway = Arc::new(HttpGateway::new(Duration::from_secs(5), None));
    let api = KlokApi::new(gateway, settings(&stub.base_url));

    let stats = api.stats(&SessionToken::new("tok")).await.unwrap();
    assert_eq!(stats.quota_or(50), 10);

    let raw = stub.request.await.unwrap().to_ascii_lowercase();
    assert!(raw.starts_with("get /v1/chat/stats http/1.1"));
    assert!(raw.contains("x-session-token: tok"));
}
