use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumentip_core::{Address, Amount};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Asset code of the chain's native token, the only asset the ledger
/// credits.
pub const NATIVE_ASSET: &str = "native";

/// Errors surfaced by the chain connector.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("destination account does not exist on chain")]
    DestinationNotFound,
    #[error("payment would send funds back to the service wallet")]
    SelfReference,
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("payment feed unavailable: {0}")]
    Feed(String),
}

/// A submitted payment, reduced to what the ledger keeps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedPayment {
    /// Chain transaction hash.
    pub hash: String,
}

/// One payment observed on the service wallet, as reported by the feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub hash: String,
    /// Paging token for resuming the feed after this payment.
    pub cursor: String,
    pub source: String,
    pub target: String,
    pub amount: Amount,
    pub asset: String,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(
        hash: impl Into<String>,
        cursor: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            hash: hash.into(),
            cursor: cursor.into(),
            source: source.into(),
            target: target.into(),
            amount,
            asset: NATIVE_ASSET.to_string(),
            memo: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = asset.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Outbound side of the chain connector, bound to the service hot
/// wallet that signs every payment.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Public key of the service hot wallet.
    fn address(&self) -> &Address;

    /// Submits a payment signed by the service wallet. A `None` memo
    /// lets the implementation stamp its default; text memos are cut
    /// to the chain's 28-byte limit.
    async fn pay(
        &self,
        destination: &Address,
        amount: Amount,
        memo: Option<&str>,
    ) -> Result<SubmittedPayment, ChainError>;
}

/// Inbound side of the chain connector: a resumable, oldest-first view
/// of payments touching the service wallet.
#[async_trait]
pub trait PaymentFeed: Send + Sync {
    /// Returns up to `limit` payments strictly after `cursor`, oldest
    /// first. `None` starts from the beginning of the feed.
    async fn payments_after(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PaymentRecord>, ChainError>;
}
