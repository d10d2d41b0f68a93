//! Shared doubles for the unit tests in this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lumentip_core::{Address, Amount};
use parking_lot::Mutex;

use crate::chain::{ChainClient, ChainError, PaymentFeed, PaymentRecord, SubmittedPayment};
use crate::records::{NewTransaction, TransactionKind, TransactionRecord};
use crate::store::{self, Store};

pub(crate) const GOOD_SOURCE: &str = "GDTWLOWE34LFHN4Z3LCF2EGAMWK6IHVAFO65YYRX5TMTER4MHUJIWQKB";
pub(crate) const SERVICE_WALLET: &str = "GDO7HAX2PSR6UN3K7WJLUVJD64OK3QLDXX2RPNMMHI7ZTPYUJOHQ6WTN";

#[derive(Clone, Debug)]
pub(crate) struct SentPayment {
    pub destination: Address,
    pub amount: Amount,
    pub memo: Option<String>,
}

/// Chain double recording outgoing payments and minting fake hashes.
pub(crate) struct MockChain {
    address: Address,
    sent: Mutex<Vec<SentPayment>>,
    failures: Mutex<VecDeque<ChainError>>,
    counter: AtomicU64,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            address: Address::parse(SERVICE_WALLET).unwrap(),
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(1),
        }
    }

    /// Queues an error for the next `pay` call.
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
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SubmittedPayment {
            hash: format!("chain-{n}"),
        })
    }
}

/// Feed double replaying a scripted payment list with opaque-token
/// paging, the way the real feed resumes.
pub(crate) struct ScriptedFeed {
    payments: Mutex<Vec<PaymentRecord>>,
    failures: Mutex<VecDeque<ChainError>>,
}

impl ScriptedFeed {
    pub fn new(payments: Vec<PaymentRecord>) -> Self {
        Self {
            payments: Mutex::new(payments),
            failures: Mutex::new(VecDeque::new()),
        }
    }

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

/// Persists a deposit row the way the reconciler would, for tests that
/// start downstream of it.
pub(crate) fn deposit_row(
    store: &Store,
    hash: &str,
    amount: &str,
    memo: Option<&str>,
) -> TransactionRecord {
    let conn = store.conn();
    store::insert_transaction(
        &conn,
        &NewTransaction::new(
            hash,
            TransactionKind::Deposit,
            GOOD_SOURCE,
            SERVICE_WALLET,
            Amount::parse(amount).unwrap(),
        )
        .with_memo(memo.map(String::from)),
    )
    .unwrap()
}
