use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_secs: u64,
    pub chats: ChatMetrics,
    pub http: HttpMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMetrics {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub daily_limit_hits: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpMetrics {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
}

/// Run-wide counters, shared by every account through an `Arc`.
#[derive(Debug)]
pub struct MetricsCollector {
    chats_total: AtomicU64,
    chats_success: AtomicU64,
    chats_failed: AtomicU64,
    daily_limit_hits: AtomicU64,
    http_calls: AtomicU64,
    http_failures: AtomicU64,
    http_latency_sum_ms: AtomicU64,
    http_min_latency_ms: AtomicU64,
    http_max_latency_ms: AtomicU64,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            chats_total: AtomicU64::new(0),
            chats_success: AtomicU64::new(0),
            chats_failed: AtomicU64::new(0),
            daily_limit_hits: AtomicU64::new(0),
            http_calls: AtomicU64::new(0),
            http_failures: AtomicU64::new(0),
            http_latency_sum_ms: AtomicU64::new(0),
            http_min_latency_ms: AtomicU64::new(u64::MAX),
            http_max_latency_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// One chat iteration: `success` means the message was counted.
    pub fn record_chat(&self, success: bool) {
        self.chats_total.fetch_add(1, Ordering::SeqCst);
        if success {
            self.chats_success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.chats_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn record_daily_limit(&self) {
        self.daily_limit_hits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_http(&self, latency: Duration, success: bool) {
        self.http_calls.fetch_add(1, Ordering::SeqCst);
        if !success {
            self.http_failures.fetch_add(1, Ordering::SeqCst);
        }

        let latency_ms = latency.as_millis() as u64;
        self.http_latency_sum_ms
            .fetch_add(latency_ms, Ordering::SeqCst);
        self.http_min_latency_ms
            .fetch_min(latency_ms, Ordering::SeqCst);
        self.http_max_latency_ms
            .fetch_max(latency_ms, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_chats = self.chats_total.load(Ordering::SeqCst);
        let total_success = self.chats_success.load(Ordering::SeqCst);

        let http_calls = self.http_calls.load(Ordering::SeqCst);
        let http_latency = self.http_latency_sum_ms.load(Ordering::SeqCst);
        let min_http = self.http_min_latency_ms.load(Ordering::SeqCst);

        MetricsSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            uptime_secs: self.uptime().as_secs(),
            chats: ChatMetrics {
                total: total_chats,
                success: total_success,
                failed: self.chats_failed.load(Ordering::SeqCst),
                daily_limit_hits: self.daily_limit_hits.load(Ordering::SeqCst),
                success_rate: if total_chats > 0 {
                    total_success as f64 / total_chats as f64 * 100.0
                } else {
                    0.0
                },
            },
            http: HttpMetrics {
                total_calls: http_calls,
                failed_calls: self.http_failures.load(Ordering::SeqCst),
                avg_latency_ms: if http_calls > 0 {
                    http_latency as f64 / http_calls as f64
                } else {
                    0.0
                },
                min_latency_ms: if min_http == u64::MAX { 0 } else { min_http },
                max_latency_ms: self.http_max_latency_ms.load(Ordering::SeqCst),
            },
        }
    }

    pub fn to_json(&self) -> String {
        let snapshot = self.snapshot();
        serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }

    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self.to_json();
        tokio::fs::write(path, json).await
    }

    pub fn chats_success(&self) -> u64 {
        self.chats_success.load(Ordering::SeqCst)
    }

    pub fn chats_failed(&self) -> u64 {
        self.chats_failed.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
