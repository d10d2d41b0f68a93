//! Doubles for the chain connector and payment feed, plus store
//! helpers, so services and tools can run the full deposit-to-payout
//! cycle without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumentip_core::{Address, Amount};
use lumentip_ledger::{
    ChainClient, ChainError, PaymentFeed, PaymentRecord, Store, SubmittedPayment,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Hot wallet the doubles stand in for.
pub const SERVICE_WALLET: &str = "GDO7HAX2PSR6UN3K7WJLUVJD64OK3QLDXX2RPNMMHI7ZTPYUJOHQ6WTN";
/// A depositor's wallet, valid and distinct from the service wallet.
pub const SENDER_WALLET: &str = "GDTWLOWE34LFHN4Z3LCF2EGAMWK6IHVAFO65YYRX5TMTER4MHUJIWQKB";

/// One payment accepted by [`MockChain::pay`].
#[derive(Clone, Debug)]
pub struct SentPayment {
    pub destination: Address,
    pub amount: Amount,
    pub memo: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Chain double that records outgoing payments and mints sequential
/// fake transaction hashes.
pub struct MockChain {
    address: Address,
    sent: Mutex<Vec<SentPayment>>,
    failures: Mutex<VecDeque<ChainError>>,
    counter: AtomicU64,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        let address = Address::parse(SERVICE_WALLET).expect("service wallet constant is valid");
        Self {
            address,
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(1),
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// Queues an error for the next `pay` call; later calls succeed
    /// again.
    pub fn fail_next(&self, err: ChainError) {
        self.failures.lock().push_back(err);
    }

    pub fn payments(&self) -> Vec<SentPayment> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn pay(
        &self,
        destination: &Address,
        amount: Amount,
        memo: Option<&str>,
    ) -> Result<SubmittedPayment, ChainError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        if destination == &self.address {
            return Err(ChainError::SelfReference);
        }
        self.sent.lock().push(SentPayment {
            destination: destination.clone(),
            amount,
            memo: memo.map(String::from),
            submitted_at: Utc::now(),
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SubmittedPayment {
            hash: format!("chain-{n}"),
        })
    }
}

/// Feed double replaying a scripted payment list with opaque-token
/// paging, matching how the real feed resumes mid-stream.
pub struct ScriptedFeed {
    payments: Mutex<Vec<PaymentRecord>>,
    failures: Mutex<VecDeque<ChainError>>,
}

impl Default for ScriptedFeed {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedFeed {
    pub fn new(payments: Vec<PaymentRecord>) -> Self {
        Self {
            payments: Mutex::new(payments),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a payment to the script, as if it just landed on chain.
    pub fn push(&self, payment: PaymentRecord) {
        self.payments.lock().push(payment);
    }

    pub fn fail_next(&self, err: ChainError) {
        self.failures.lock().push_back(err);
    }
}

#[async_trait]
impl PaymentFeed for ScriptedFeed {
    async fn payments_after(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PaymentRecord>, ChainError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let items = self.payments.lock();
        let start = match cursor {
            Some(token) => items
                .iter()
                .rposition(|p| p.cursor == token)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };
        Ok(items[start..].iter().take(limit).cloned().collect())
    }
}

/// An inbound deposit from [`SENDER_WALLET`] to [`SERVICE_WALLET`].
pub fn inbound_payment(hash: &str, cursor: &str, amount: &str) -> PaymentRecord {
    let amount = Amount::parse(amount).expect("caller passes a well-formed amount");
    PaymentRecord::new(hash, cursor, SENDER_WALLET, SERVICE_WALLET, amount)
}

/// A throwaway on-disk store; keep the [`TempDir`] alive for as long
/// as the store is in use.
pub fn temp_store() -> (TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().expect("tempdir is creatable");
    let store = Store::open(dir.path().join("lumentip.db")).expect("store opens on a fresh file");
    (dir, Arc::new(store))
}
