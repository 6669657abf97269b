use super::wallet_manager::read_entries;
use crate::error::ConfigError;
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Immutable pool of prompts shared by every account.
#[derive(Debug, Clone)]
pub struct MessagePool {
    messages: Arc<[String]>,
}

impl MessagePool {
    /// Loads one prompt per line. Missing or empty files are startup errors.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let messages = read_entries(path)?;
        info!("Loaded {} messages from {}", messages.len(), path.display());
        Ok(Self {
            messages: messages.into(),
        })
    }

    pub fn new(messages: Vec<String>) -> Result<Self, ConfigError> {
        if messages.is_empty() {
            return Err(ConfigError::Empty {
                path: "message pool".to_string(),
            });
        }
        Ok(Self {
            messages: messages.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Uniformly random prompt.
    pub fn choose(&self) -> &str {
        self.messages
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}
