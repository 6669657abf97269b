//! Typed calls against the chat service, all going through a [`Gateway`].

use crate::config::KlokConfig;
use crate::gateway::{ApiRequest, ApiResponse, Gateway};
use chrono::{DateTime, Duration as ChronoDuration, Local};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub const SESSION_HEADER: &str = "x-session-token";

/// Bearer token returned by `/v1/verify`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(6).collect();
        write!(f, "SessionToken({}...)", visible)
    }
}

/// `/v1/rate-limit` body. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitSnapshot {
    /// Kept fractional so `0.5` still counts as quota left.
    pub remaining: Option<f64>,
    pub limit: Option<u64>,
    pub reset_time: Option<u64>,
}

impl RateLimitSnapshot {
    pub fn from_response(response: &ApiResponse) -> Self {
        Self {
            remaining: response.field("remaining").and_then(lenient_f64),
            limit: response.field("limit").and_then(lenient_u64),
            reset_time: response.field("reset_time").and_then(lenient_u64),
        }
    }

    /// Only a known `remaining <= 0` stops the account; unknown means go on.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.remaining, Some(r) if r <= 0.0)
    }
}

/// `/v1/chat/stats` body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChatStats {
    pub total_messages: Option<u64>,
    pub points_earned: Option<f64>,
    pub daily_limit: Option<u64>,
    /// Seconds until the daily counter resets.
    pub reset_time: Option<u64>,
}

impl ChatStats {
    pub fn from_response(response: &ApiResponse) -> Self {
        Self {
            total_messages: response.field("total_messages").and_then(lenient_u64),
            points_earned: response.field("points_earned").and_then(lenient_f64),
            daily_limit: response.field("daily_limit").and_then(lenient_u64),
            reset_time: response.field("reset_time").and_then(lenient_u64),
        }
    }

    /// Positive daily limit, or `fallback` when missing or zero.
    pub fn quota_or(&self, fallback: u64) -> u64 {
        self.daily_limit.filter(|&limit| limit > 0).unwrap_or(fallback)
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub origin: String,
    pub user_agent: String,
    pub referral_code: String,
    pub model: String,
    pub language: String,
}

impl From<&KlokConfig> for ApiSettings {
    fn from(config: &KlokConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            origin: config.origin.clone(),
            user_agent: config.user_agent.clone(),
            referral_code: config.referral_code.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
        }
    }
}

#[derive(Clone)]
pub struct KlokApi {
    gateway: Arc<dyn Gateway>,
    settings: ApiSettings,
}

impl KlokApi {
    pub fn new(gateway: Arc<dyn Gateway>, settings: ApiSettings) -> Self {
        Self { gateway, settings }
    }

    /// Exchanges a signed challenge for a session token.
    pub async fn verify(&self, signature: &str, message: &str) -> Option<SessionToken> {
        let body = json!({
            "signedMessage": signature,
            "message": message,
            "referral_code": self.settings.referral_code,
        });
        let request = ApiRequest::post(self.url("/v1/verify"), body).headers(self.base_headers());

        let response = self.gateway.send(request).await?;
        response
            .field("session_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(SessionToken::new)
    }

    pub async fn rate_limit(&self, token: &SessionToken) -> Option<RateLimitSnapshot> {
        let response = self.authorized_get("/v1/rate-limit", token).await?;
        Some(RateLimitSnapshot::from_response(&response))
    }

    pub async fn stats(&self, token: &SessionToken) -> Option<ChatStats> {
        let response = self.authorized_get("/v1/chat/stats", token).await?;
        Some(ChatStats::from_response(&response))
    }

    /// Sends one user message under a fresh conversation id.
    pub async fn chat(&self, token: &SessionToken, message: &str) -> Option<ApiResponse> {
        let body = json!({
            "id": Uuid::new_v4().to_string(),
            "messages": [{ "role": "user", "content": message }],
            "model": self.settings.model,
            "created_at": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "language": self.settings.language,
        });
        let request = ApiRequest::post(self.url("/v1/chat"), body)
            .headers(self.base_headers())
            .header(SESSION_HEADER, token.as_str());

        self.gateway.send(request).await
    }

    async fn authorized_get(&self, path: &str, token: &SessionToken) -> Option<ApiResponse> {
        let request = ApiRequest::get(self.url(path))
            .headers(self.base_headers())
            .header(SESSION_HEADER, token.as_str());
        self.gateway.send(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
            ("Origin".to_string(), self.settings.origin.clone()),
            (
                "Referer".to_string(),
                format!("{}/", self.settings.origin.trim_end_matches('/')),
            ),
            ("User-Agent".to_string(), self.settings.user_agent.clone()),
        ]
    }
}

/// Human-readable reply: `response`, then `choices[0].message.content`, then
/// the whole JSON body. Text bodies are returned as-is.
pub fn extract_reply_text(response: &ApiResponse) -> String {
    match response {
        ApiResponse::Text(text) => text.clone(),
        ApiResponse::Json(value) => {
            if let Some(reply) = value.get("response").and_then(Value::as_str) {
                return reply.to_string();
            }
            if let Some(content) = value
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
            {
                return content.to_string();
            }
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

const MAX_RESET_SECS: u64 = 366 * 24 * 60 * 60;

/// Local wall-clock time of the next reset, `reset_in_secs` from `now`.
pub fn format_reset_time(now: DateTime<Local>, reset_in_secs: u64) -> String {
    let reset_at = now + ChronoDuration::seconds(reset_in_secs.min(MAX_RESET_SECS) as i64);
    reset_at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u64(value: &Value) -> Option<u64> {
    lenient_i64(value).and_then(|n| u64::try_from(n).ok())
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
