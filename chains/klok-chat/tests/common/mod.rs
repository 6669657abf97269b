#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use core_logic::{
    Credential, DelayWindow, Identity, MessagePool, RecordingSleeper, RetryConfig, StatusRegistry,
};
use klok_chat::{
    AccountContext, ApiRequest, ApiResponse, ApiSettings, ChallengeSigner, ChatSettings, Gateway,
    KlokApi,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const VERIFY: &str = "/v1/verify";
pub const RATE_LIMIT: &str = "/v1/rate-limit";
pub const STATS: &str = "/v1/chat/stats";
pub const CHAT: &str = "/v1/chat";

pub fn json(value: Value) -> Option<ApiResponse> {
    Some(ApiResponse::Json(value))
}

#[derive(Default)]
struct Route {
    queued: VecDeque<Option<ApiResponse>>,
    sticky: Option<ApiResponse>,
}

/// In-memory gateway answering by endpoint path.
///
/// Queued answers are used first, then the sticky one. Unknown paths and
/// empty routes behave like a transport failure.
#[derive(Default)]
pub struct ScriptedGateway {
    routes: Mutex<HashMap<&'static str, Route>>,
    requests: Mutex<Vec<ApiRequest>>,
    latency: Duration,
    events: Option<(String, Arc<Mutex<Vec<String>>>)>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer for every call to `path` once the queue is drained.
    pub fn always(self, path: &'static str, response: Option<ApiResponse>) -> Self {
        self.routes.lock().unwrap().entry(path).or_default().sticky = response;
        self
    }

    pub fn then(self, path: &'static str, response: Option<ApiResponse>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(path)
            .or_default()
            .queued
            .push_back(response);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Records `verify:<label>` and `chat_done:<label>` into a shared log.
    pub fn with_events(mut self, label: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.events = Some((label.into(), log));
        self
    }

    /// Standard happy path: token, quota `limit`, plenty remaining.
    pub fn healthy(limit: u64) -> Self {
        Self::new()
            .always(VERIFY, json(serde_json::json!({ "session_token": "tok-123" })))
            .always(
                STATS,
                json(serde_json::json!({ "daily_limit": limit, "total_messages": 7 })),
            )
            .always(RATE_LIMIT, json(serde_json::json!({ "remaining": 10 })))
            .always(CHAT, json(serde_json::json!({ "response": "hi there" })))
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(path))
            .count()
    }

    fn record(&self, kind: &str) {
        if let Some((label, log)) = &self.events {
            log.lock().unwrap().push(format!("{}:{}", kind, label));
        }
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn send(&self, request: ApiRequest) -> Option<ApiResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        if url.ends_with(VERIFY) {
            self.record("verify");
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let response = {
            let mut routes = self.routes.lock().unwrap();
            let key = routes.keys().copied().find(|path| url.ends_with(path));
            match key.and_then(|k| routes.get_mut(k)) {
                Some(route) => match route.queued.pop_front() {
                    Some(answer) => answer,
                    None => route.sticky.clone(),
                },
                None => None,
            }
        };

        if url.ends_with(CHAT) && response.is_some() {
            self.record("chat_done");
        }
        response
    }
}

/// Signer that never touches real keys. `bad` keys fail address derivation.
#[derive(Default)]
pub struct FakeSigner {
    pub signatures: AtomicUsize,
}

impl FakeSigner {
    pub fn signed(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSigner for FakeSigner {
    fn derive_address(&self, credential: &Credential) -> Result<String> {
        if credential.expose() == "bad" {
            return Err(anyhow!("Invalid private key"));
        }
        Ok(format!("0xAddress{}", credential.expose()))
    }

    async fn sign(&self, _credential: &Credential, _message: &str) -> Result<String> {
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok("0xsignature".to_string())
    }
}

pub fn api_settings() -> ApiSettings {
    ApiSettings {
        base_url: "https://api.test".to_string(),
        origin: "https://klokapp.ai".to_string(),
        user_agent: "Mozilla/5.0".to_string(),
        referral_code: "REF".to_string(),
        model: "llama-3.3-70b-instruct".to_string(),
        language: "english".to_string(),
    }
}

pub fn chat_settings(chat_delay: DelayWindow) -> ChatSettings {
    ChatSettings {
        domain: "klokapp.ai".to_string(),
        origin: "https://klokapp.ai".to_string(),
        chain_id: 1,
        chat_delay,
        auth_retry: RetryConfig::new(3, 2000),
        default_daily_limit: 50,
    }
}

pub fn identity(index: usize, key: &str) -> Identity {
    Identity {
        index,
        credential: Credential::new(key),
        proxy: None,
    }
}

pub struct Harness {
    pub registry: Arc<StatusRegistry>,
    pub sleeper: Arc<RecordingSleeper>,
    pub signer: Arc<FakeSigner>,
    pub ctx: AccountContext,
}

impl Harness {
    pub fn new(chat_delay: DelayWindow) -> Self {
        let registry = Arc::new(StatusRegistry::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let signer = Arc::new(FakeSigner::default());
        let messages = MessagePool::new(vec!["What is Rust?".to_string()]).unwrap();

        let ctx = AccountContext::new(
            signer.clone(),
            messages,
            Arc::clone(&registry),
            chat_settings(chat_delay),
        )
        .with_sleeper(sleeper.clone());

        Self {
            registry,
            sleeper,
            signer,
            ctx,
        }
    }

    pub fn api(gateway: Arc<ScriptedGateway>) -> KlokApi {
        KlokApi::new(gateway, api_settings())
    }
}
