mod common;

use common::*;
use core_logic::{AccountState, AccountWorker, DelayWindow};
use klok_chat::AccountStateMachine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn machine(harness: &Harness, gateway: &Arc<ScriptedGateway>, key: &str) -> AccountStateMachine {
    AccountStateMachine::new(
        identity(1, key),
        Harness::api(Arc::clone(gateway)),
        harness.ctx.clone(),
    )
}

#[tokio::test]
async fn test_quota_reached_completes_account() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(ScriptedGateway::healthy(2));

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::Completed);
    assert_eq!(gateway.calls_to(VERIFY), 1);
    assert_eq!(gateway.calls_to(RATE_LIMIT), 2);
    assert_eq!(gateway.calls_to(CHAT), 2);

    let status = harness.registry.get(1).await.unwrap();
    assert_eq!(status.state, AccountState::Completed);
    assert_eq!((status.current_run, status.total_runs), (2, 2));
    assert_eq!(harness.ctx.metrics.chats_success(), 2);
}

#[tokio::test]
async fn test_auth_retries_until_token_arrives() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(
        ScriptedGateway::healthy(1)
            .then(VERIFY, None)
            .then(VERIFY, json(json!({ "error": "bad signature" }))),
    );

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::Completed);
    assert_eq!(gateway.calls_to(VERIFY), 3);
    // one challenge, signed once, replayed on every attempt
    assert_eq!(harness.signer.signed(), 1);
    let auth_pauses: Vec<Duration> = harness
        .sleeper
        .calls()
        .into_iter()
        .filter(|d| *d == Duration::from_millis(2000))
        .collect();
    assert_eq!(auth_pauses.len(), 2);
}

#[tokio::test]
async fn test_auth_exhaustion_fails_account_without_chatting() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(ScriptedGateway::healthy(5).always(VERIFY, None));

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::Failed);
    assert_eq!(gateway.calls_to(VERIFY), 3);
    assert_eq!(gateway.calls_to(RATE_LIMIT), 0);
    assert_eq!(gateway.calls_to(CHAT), 0);
    assert_eq!(harness.sleeper.calls().len(), 2);
    assert_eq!(
        harness.registry.get(1).await.unwrap().state,
        AccountState::Failed
    );
}

#[tokio::test]
async fn test_first_try_token_is_not_retried() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(ScriptedGateway::healthy(1));

    machine(&harness, &gateway, "k1").run().await;

    assert_eq!(gateway.calls_to(VERIFY), 1);
    assert!(harness
        .sleeper
        .calls()
        .iter()
        .all(|d| *d != Duration::from_millis(2000)));
}

#[tokio::test]
async fn test_exhausted_rate_limit_stops_before_chatting() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(
        ScriptedGateway::healthy(5)
            .always(RATE_LIMIT, json(json!({ "remaining": 0, "reset_time": 3600 }))),
    );

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::DailyLimitReached);
    assert_eq!(gateway.calls_to(CHAT), 0);
    // quota lookup plus the stats report
    assert_eq!(gateway.calls_to(STATS), 2);

    let status = harness.registry.get(1).await.unwrap();
    assert_eq!(status.state, AccountState::DailyLimitReached);
    assert_eq!(status.total_runs, 5);
}

#[tokio::test]
async fn test_daily_limit_mid_run_is_not_overwritten() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(
        ScriptedGateway::healthy(4)
            .then(RATE_LIMIT, json(json!({ "remaining": 3 })))
            .then(RATE_LIMIT, json(json!({ "remaining": 0 }))),
    );

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::DailyLimitReached);
    assert_eq!(gateway.calls_to(CHAT), 1);
    let status = harness.registry.get(1).await.unwrap();
    assert_eq!(status.state, AccountState::DailyLimitReached);
    assert_eq!(status.current_run, 2);
}

#[tokio::test]
async fn test_transport_failures_use_up_iterations_but_continue() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(
        ScriptedGateway::healthy(3)
            .then(RATE_LIMIT, None)
            .then(CHAT, None),
    );

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::Completed);
    assert_eq!(gateway.calls_to(RATE_LIMIT), 3);
    // first pass never reached chat, second pass chat failed, third succeeded
    assert_eq!(gateway.calls_to(CHAT), 2);
    assert_eq!(harness.ctx.metrics.chats_success(), 1);
    assert_eq!(harness.ctx.metrics.chats_failed(), 2);
}

#[tokio::test]
async fn test_missing_or_zero_limit_falls_back_to_default() {
    for stats in [None, json(json!({ "daily_limit": 0 })), json(json!({}))] {
        let harness = Harness::new(DelayWindow::zero());
        let gateway = Arc::new(
            ScriptedGateway::healthy(1)
                .always(STATS, stats)
                .always(RATE_LIMIT, json(json!({ "remaining": 0 }))),
        );

        machine(&harness, &gateway, "k1").run().await;

        assert_eq!(harness.registry.get(1).await.unwrap().total_runs, 50);
    }
}

#[tokio::test]
async fn test_unknown_remaining_keeps_chatting() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(
        ScriptedGateway::healthy(2).always(
            RATE_LIMIT,
            Some(klok_chat::ApiResponse::Text("ok".to_string())),
        ),
    );

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::Completed);
    assert_eq!(gateway.calls_to(CHAT), 2);
}

#[tokio::test]
async fn test_fractional_remaining_is_not_exhausted() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(
        ScriptedGateway::healthy(2).always(RATE_LIMIT, json(json!({ "remaining": 0.5 }))),
    );

    let state = machine(&harness, &gateway, "k1").run().await;

    assert_eq!(state, AccountState::Completed);
    assert_eq!(gateway.calls_to(CHAT), 2);
}

#[tokio::test]
async fn test_chat_pacing_only_between_iterations() {
    let harness = Harness::new(DelayWindow::fixed(1234));
    let gateway = Arc::new(ScriptedGateway::healthy(3));

    machine(&harness, &gateway, "k1").run().await;

    assert_eq!(
        harness.sleeper.calls(),
        vec![Duration::from_millis(1234), Duration::from_millis(1234)]
    );
}

#[tokio::test]
async fn test_invalid_key_fails_only_this_account() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(ScriptedGateway::healthy(1));

    let state = machine(&harness, &gateway, "bad").run().await;

    assert_eq!(state, AccountState::Failed);
    assert!(gateway.requests().is_empty());
    assert_eq!(
        harness.registry.get(1).await.unwrap().state,
        AccountState::Failed
    );
}

#[tokio::test]
async fn test_requests_carry_session_and_browser_headers() {
    let harness = Harness::new(DelayWindow::zero());
    let gateway = Arc::new(ScriptedGateway::healthy(1));

    machine(&harness, &gateway, "k1").run().await;

    let requests = gateway.requests();
    let verify = requests.iter().find(|r| r.url.ends_with(VERIFY)).unwrap();
    assert_eq!(verify.url, "https://api.test/v1/verify");
    assert_eq!(verify.header_value("x-session-token"), None);
    let body = verify.body.as_ref().unwrap();
    assert_eq!(body["signedMessage"], "0xsignature");
    assert_eq!(body["referral_code"], "REF");
    let message = body["message"].as_str().unwrap();
    assert!(message.starts_with("klokapp.ai wants you to sign in with your Ethereum account:\n0xAddressk1\n"));

    let chat = requests.iter().find(|r| r.url.ends_with(CHAT)).unwrap();
    assert_eq!(chat.header_value("x-session-token"), Some("tok-123"));
    assert_eq!(chat.header_value("origin"), Some("https://klokapp.ai"));
    assert_eq!(chat.header_value("referer"), Some("https://klokapp.ai/"));
    let chat_body = chat.body.as_ref().unwrap();
    assert_eq!(chat_body["messages"][0]["role"], "user");
    assert_eq!(chat_body["messages"][0]["content"], "What is Rust?");
    assert_eq!(chat_body["model"], "llama-3.3-70b-instruct");
    assert_eq!(chat_body["language"], "english");
    assert!(uuid::Uuid::parse_str(chat_body["id"].as_str().unwrap()).is_ok());
}
