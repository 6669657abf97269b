//! Wallet sign-in: challenge text and EIP-191 personal signatures.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use core_logic::{Credential, WalletError};
use ethers::prelude::*;
use ethers::utils::to_checksum;
use rand::RngCore;

/// Signs the sign-in challenge on behalf of one account.
#[async_trait]
pub trait ChallengeSigner: Send + Sync {
    /// Checksummed address controlled by `credential`.
    fn derive_address(&self, credential: &Credential) -> Result<String>;

    /// Hex signature (`0x`-prefixed) over `message`.
    async fn sign(&self, credential: &Credential, message: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EthersSigner;

impl EthersSigner {
    fn wallet(credential: &Credential) -> Result<LocalWallet, WalletError> {
        credential
            .expose()
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| WalletError::InvalidKey {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ChallengeSigner for EthersSigner {
    fn derive_address(&self, credential: &Credential) -> Result<String> {
        let wallet = Self::wallet(credential)?;
        Ok(to_checksum(&wallet.address(), None))
    }

    async fn sign(&self, credential: &Credential, message: &str) -> Result<String> {
        let wallet = Self::wallet(credential)?;
        let signature = wallet
            .sign_message(message)
            .await
            .map_err(|e| WalletError::SigningFailed {
                reason: e.to_string(),
            })?;
        Ok(format!("0x{}", hex::encode(signature.to_vec())))
    }
}

/// Sign-in-with-Ethereum challenge for one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInChallenge {
    pub domain: String,
    pub address: String,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
}

impl SignInChallenge {
    pub fn new(domain: &str, origin: &str, chain_id: u64, address: &str) -> Self {
        Self {
            domain: domain.to_string(),
            address: address.to_string(),
            uri: format!("{}/", origin.trim_end_matches('/')),
            chain_id,
            nonce: random_nonce(),
            issued_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn message(&self) -> String {
        format!(
            "{} wants you to sign in with your Ethereum account:\n{}\n\n\nURI: {}\nVersion: 1\nChain ID: {}\nNonce: {}\nIssued At: {}",
            self.domain, self.address, self.uri, self.chain_id, self.nonce, self.issued_at
        )
    }
}

/// 32 random bytes, hex encoded.
pub fn random_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
