use super::proxy_manager::ProxyManager;
use crate::config::ProxyConfig;
use crate::error::ConfigError;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Account secret (private key). Wiped on drop, never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***REDACTED***)")
    }
}

/// One configured account: its secret and the proxy assigned to it.
#[derive(Debug, Clone)]
pub struct Identity {
    /// 1-based, stable for the whole run.
    pub index: usize,
    pub credential: Credential,
    pub proxy: Option<ProxyConfig>,
}

impl Identity {
    pub fn label(&self) -> String {
        format!("{:03}", self.index)
    }
}

#[derive(Debug)]
pub struct WalletManager {
    credentials: Vec<Credential>,
}

impl WalletManager {
    /// Reads one private key per line. Blank lines and `#` comments are skipped.
    ///
    /// A missing file or a file with no keys is a startup error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let credentials: Vec<Credential> = read_entries(path)?
            .into_iter()
            .map(Credential::new)
            .collect();

        info!(
            "[WalletManager] Loaded {} keys from {}",
            credentials.len(),
            path.display()
        );
        Ok(Self { credentials })
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            credentials: keys.into_iter().map(Credential::new).collect(),
        }
    }

    /// Returns the number of available wallets
    pub fn count(&self) -> usize {
        self.credentials.len()
    }

    /// Builds the immutable identity table, assigning proxies positionally.
    pub fn identities(&self, proxies: &[ProxyConfig]) -> Vec<Identity> {
        self.credentials
            .iter()
            .enumerate()
            .map(|(i, credential)| {
                let index = i + 1;
                Identity {
                    index,
                    credential: credential.clone(),
                    proxy: ProxyManager::proxy_for(proxies, index).cloned(),
                }
            })
            .collect()
    }
}

/// Non-empty, trimmed, non-comment lines of a required file.
pub(crate) fn read_entries(path: &Path) -> Result<Vec<String>, ConfigError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(ConfigError::FileNotFound { path: display });
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: display.clone(),
        msg: e.to_string(),
    })?;

    let entries: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if entries.is_empty() {
        return Err(ConfigError::Empty { path: display });
    }
    Ok(entries)
}
