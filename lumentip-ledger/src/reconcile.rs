use std::fmt;
use std::sync::Arc;

use lumentip_core::{AccountRef, Amount, MemoRoute};
use lumentip_events::{DepositCreditedEvent, EventBus, LedgerEvent};
use rusqlite::TransactionBehavior;
use tracing::{debug, info};

use crate::chain::{ChainClient, PaymentFeed, PaymentRecord, NATIVE_ASSET};
use crate::records::{ActionKind, NewAction, NewTransaction, TransactionKind, TransactionRecord};
use crate::refund::{RefundEngine, RefundOutcome, RefundReason};
use crate::store::{self, Store};
use crate::{LedgerError, LedgerResult};

/// What the reconciler should do with deposits, and for whom.
#[derive(Clone, Debug)]
pub struct ReconcilePolicy {
    /// When set, every inbound deposit is refunded instead of credited.
    pub deposits_closed: bool,
    /// Adapters whose memos this instance credits.
    pub memo_adapters: Vec<String>,
    /// Feed position to start from when the ledger holds no deposits
    /// yet; the latest persisted cursor wins once one exists.
    pub start_cursor: Option<String>,
    pub page_size: usize,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            deposits_closed: false,
            memo_adapters: vec!["reddit".to_string()],
            start_cursor: None,
            page_size: 100,
        }
    }
}

impl ReconcilePolicy {
    fn serves(&self, adapter: &str) -> bool {
        self.memo_adapters.iter().any(|a| a == adapter)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Payment left the service wallet; our own withdrawal or refund.
    Outbound,
    UnsupportedAsset,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IgnoreReason::Outbound => "outbound",
            IgnoreReason::UnsupportedAsset => "unsupported asset",
        })
    }
}

/// How one observed payment was settled.
#[derive(Clone, Debug, PartialEq)]
pub enum Disposition {
    Ignored(IgnoreReason),
    AlreadyProcessed,
    Credited {
        account: AccountRef,
        amount: Amount,
    },
    Refunded {
        reason: RefundReason,
        outcome: RefundOutcome,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub fetched: usize,
    pub credited: usize,
    pub refunded: usize,
    pub ignored: usize,
    pub duplicates: usize,
    /// Refund submissions that failed; retried on the next pass.
    pub failed: usize,
}

impl ReconcileSummary {
    /// Folds one disposition into the counters.
    pub fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Ignored(_) => self.ignored += 1,
            Disposition::AlreadyProcessed => self.duplicates += 1,
            Disposition::Credited { .. } => self.credited += 1,
            Disposition::Refunded { outcome, .. } => match outcome {
                RefundOutcome::Refunded { .. } | RefundOutcome::DustSwallowed => {
                    self.refunded += 1
                }
                RefundOutcome::DuplicateRefund => self.duplicates += 1,
                RefundOutcome::Failed { .. } => self.failed += 1,
            },
        }
    }
}

/// Applies the payment feed to the ledger. Deposits are attributed by
/// memo first, then by the sender's registered wallet; whatever cannot
/// be attributed is refunded.
///
/// Progress resumes from the cursor of the last persisted payment, so
/// a restart replays at most the tail the previous run had not written
/// down; the transaction hash makes that replay harmless.
pub struct Reconciler {
    store: Arc<Store>,
    chain: Arc<dyn ChainClient>,
    feed: Arc<dyn PaymentFeed>,
    refunds: RefundEngine,
    events: Arc<EventBus>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(
        store: Arc<Store>,
        chain: Arc<dyn ChainClient>,
        feed: Arc<dyn PaymentFeed>,
        refunds: RefundEngine,
        events: Arc<EventBus>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            store,
            chain,
            feed,
            refunds,
            events,
            policy,
        }
    }

    /// Drains the feed from the resume point, then retries refunds that
    /// failed on earlier passes.
    pub async fn run_once(&self) -> LedgerResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let mut cursor = {
            let conn = self.store.conn();
            store::latest_cursor(&conn)?
        }
        .or_else(|| self.policy.start_cursor.clone());

        loop {
            let page = self
                .feed
                .payments_after(cursor.as_deref(), self.policy.page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();
            for payment in page {
                cursor = Some(payment.cursor.clone());
                let disposition = self.process_payment(&payment).await?;
                summary.record(&disposition);
            }
            summary.fetched += fetched;
            if fetched < self.policy.page_size {
                break;
            }
        }

        summary.refunded += self.retry_failed_refunds().await?;
        info!(
            fetched = summary.fetched,
            credited = summary.credited,
            refunded = summary.refunded,
            ignored = summary.ignored,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "reconcile pass complete"
        );
        Ok(summary)
    }

    /// Settles a single observed payment.
    pub async fn process_payment(&self, payment: &PaymentRecord) -> LedgerResult<Disposition> {
        if payment.target != self.chain.address().as_str() {
            return Ok(Disposition::Ignored(IgnoreReason::Outbound));
        }
        if payment.asset != NATIVE_ASSET {
            debug!(hash = %payment.hash, asset = %payment.asset, "skipping non-native deposit");
            return Ok(Disposition::Ignored(IgnoreReason::UnsupportedAsset));
        }
        {
            let conn = self.store.conn();
            if store::transaction_by_hash(&conn, &payment.hash)?.is_some() {
                return Ok(Disposition::AlreadyProcessed);
            }
        }
        if self.policy.deposits_closed {
            return self
                .persist_and_refund(payment, RefundReason::DepositsClosed)
                .await;
        }

        match MemoRoute::classify(payment.memo.as_deref()) {
            MemoRoute::Account(account) if self.policy.serves(&account.adapter) => {
                self.credit(payment, &account)
            }
            MemoRoute::Account(_) => {
                self.credit_by_source_or_refund(payment, RefundReason::UnrecognizedMemo)
                    .await
            }
            MemoRoute::Missing => {
                self.credit_by_source_or_refund(payment, RefundReason::MissingMemo)
                    .await
            }
            MemoRoute::Malformed(_) => {
                self.credit_by_source_or_refund(payment, RefundReason::MalformedMemo)
                    .await
            }
        }
    }

    /// The memo gave us nothing, so try the depositor's registered
    /// wallet before bouncing the payment.
    async fn credit_by_source_or_refund(
        &self,
        payment: &PaymentRecord,
        reason: RefundReason,
    ) -> LedgerResult<Disposition> {
        let owner = {
            let conn = self.store.conn();
            store::account_by_wallet(&conn, &payment.source)?
        };
        match owner {
            Some(row) => {
                let account = AccountRef::new(&row.adapter, &row.unique_id);
                debug!(source = %payment.source, %account, "deposit resolved by source wallet");
                self.credit(payment, &account)
            }
            None => self.persist_and_refund(payment, reason).await,
        }
    }

    /// Credits the deposit to its account: payment row, balance bump,
    /// and deposit action commit as one unit. A hash conflict on the
    /// payment row means another pass landed it after our duplicate
    /// check, so the payment settles as already processed.
    fn credit(&self, payment: &PaymentRecord, account: &AccountRef) -> LedgerResult<Disposition> {
        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if store::insert_transaction_if_new(&tx, &deposit_transaction(payment).credited())?
            .is_none()
        {
            return Ok(Disposition::AlreadyProcessed);
        }
        let row = store::get_or_create_account(&tx, &account.adapter, &account.unique_id)?;
        let credited = row.balance.checked_add(payment.amount).ok_or_else(|| {
            LedgerError::InvalidState(format!("credit overflow for account {}", row.id))
        })?;
        store::update_balance(&tx, row.id, credited)?;
        store::insert_action(
            &tx,
            &NewAction::new(&payment.hash, ActionKind::Deposit, payment.amount)
                .to_account(row.id),
        )?;
        tx.commit()?;

        info!(%account, amount = %payment.amount, hash = %payment.hash, "deposit credited");
        self.events
            .publish(LedgerEvent::DepositCredited(DepositCreditedEvent {
                account: account.clone(),
                amount: payment.amount,
                hash: payment.hash.clone(),
            }));
        Ok(Disposition::Credited {
            account: account.clone(),
            amount: payment.amount,
        })
    }

    async fn persist_and_refund(
        &self,
        payment: &PaymentRecord,
        reason: RefundReason,
    ) -> LedgerResult<Disposition> {
        let row = {
            let conn = self.store.conn();
            match store::insert_transaction_if_new(&conn, &deposit_transaction(payment))? {
                Some(row) => row,
                // Another pass persisted this payment first; its sweep
                // owns the refund.
                None => return Ok(Disposition::AlreadyProcessed),
            }
        };
        let outcome = self.refunds.refund_deposit(&row, reason).await?;
        Ok(Disposition::Refunded { reason, outcome })
    }

    /// Second chance for deposits whose refund submission failed: the
    /// cursor has moved past them, so the feed will not surface them
    /// again.
    async fn retry_failed_refunds(&self) -> LedgerResult<usize> {
        let stuck = {
            let conn = self.store.conn();
            store::unprocessed_deposits(&conn)?
        };
        let mut refunded = 0;
        for deposit in stuck {
            let Some(reason) = self.refund_reason(&deposit) else {
                debug!(hash = %deposit.hash, "unprocessed deposit is no longer refundable, leaving as is");
                continue;
            };
            match self.refunds.refund_deposit(&deposit, reason).await? {
                RefundOutcome::Refunded { .. } | RefundOutcome::DustSwallowed => refunded += 1,
                RefundOutcome::DuplicateRefund | RefundOutcome::Failed { .. } => {}
            }
        }
        Ok(refunded)
    }

    fn refund_reason(&self, deposit: &TransactionRecord) -> Option<RefundReason> {
        if self.policy.deposits_closed {
            return Some(RefundReason::DepositsClosed);
        }
        match MemoRoute::classify(deposit.memo.as_deref()) {
            MemoRoute::Missing => Some(RefundReason::MissingMemo),
            MemoRoute::Malformed(_) => Some(RefundReason::MalformedMemo),
            // Persisted uncredited while deposits were closed; the flag
            // is open again, so leave it for the operator.
            MemoRoute::Account(account) if self.policy.serves(&account.adapter) => None,
            MemoRoute::Account(_) => Some(RefundReason::UnrecognizedMemo),
        }
    }
}

fn deposit_transaction(payment: &PaymentRecord) -> NewTransaction {
    NewTransaction::new(
        &payment.hash,
        TransactionKind::Deposit,
        &payment.source,
        &payment.target,
        payment.amount,
    )
    .with_cursor(&payment.cursor)
    .with_memo(payment.memo.clone())
    .with_asset(&payment.asset)
    .with_created_at(payment.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainError;
    use crate::testkit::{deposit_row, MockChain, ScriptedFeed, GOOD_SOURCE, SERVICE_WALLET};
    use lumentip_core::Address;

    const FEE: &str = "0.00001";

    struct Fixture {
        store: Arc<Store>,
        chain: Arc<MockChain>,
        feed: Arc<ScriptedFeed>,
        reconciler: Reconciler,
    }

    fn fixture(policy: ReconcilePolicy, payments: Vec<PaymentRecord>) -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let chain = Arc::new(MockChain::new());
        let feed = Arc::new(ScriptedFeed::new(payments));
        let events = Arc::new(EventBus::new(16));
        let refunds = RefundEngine::new(
            store.clone(),
            chain.clone(),
            events.clone(),
            Amount::parse(FEE).unwrap(),
        );
        let reconciler = Reconciler::new(
            store.clone(),
            chain.clone(),
            feed.clone(),
            refunds,
            events,
            policy,
        );
        Fixture {
            store,
            chain,
            feed,
            reconciler,
        }
    }

    fn inbound(hash: &str, cursor: &str, amount: &str) -> PaymentRecord {
        PaymentRecord::new(
            hash,
            cursor,
            GOOD_SOURCE,
            SERVICE_WALLET,
            Amount::parse(amount).unwrap(),
        )
    }

    fn balance_of(store: &Store, adapter: &str, unique_id: &str) -> Option<Amount> {
        let conn = store.conn();
        store::account_by_ref(&conn, adapter, unique_id)
            .unwrap()
            .map(|a| a.balance)
    }

    #[tokio::test]
    async fn routable_deposit_credits_the_account() {
        let fx = fixture(
            ReconcilePolicy::default(),
            vec![inbound("p-1", "100", "5").with_memo("reddit/someuser")],
        );

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.credited, 1);
        assert_eq!(
            balance_of(&fx.store, "reddit", "someuser").unwrap().to_fixed(),
            "5.0000000"
        );

        let conn = fx.store.conn();
        let row = store::transaction_by_hash(&conn, "p-1").unwrap().unwrap();
        assert!(row.credited);
        assert_eq!(row.cursor.as_deref(), Some("100"));
        assert!(store::action_exists(&conn, "p-1", ActionKind::Deposit).unwrap());
    }

    #[tokio::test]
    async fn unroutable_deposits_are_refunded_net_of_fee() {
        let fx = fixture(
            ReconcilePolicy::default(),
            vec![
                inbound("p-1", "100", "5"),
                inbound("p-2", "200", "3").with_memo("no separator here"),
            ],
        );

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.refunded, 2);
        assert_eq!(summary.credited, 0);

        let sent = fx.chain.payments();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].amount.to_fixed(), "4.9999900");
        assert_eq!(sent[1].amount.to_fixed(), "2.9999900");
        assert_eq!(sent[0].destination.as_str(), GOOD_SOURCE);

        let conn = fx.store.conn();
        assert!(store::transaction_by_hash(&conn, "p-1").unwrap().unwrap().refunded);
        assert!(store::transaction_by_hash(&conn, "p-2").unwrap().unwrap().refunded);
    }

    #[tokio::test]
    async fn nonnative_payments_are_ignored() {
        let fx = fixture(
            ReconcilePolicy::default(),
            vec![inbound("p-1", "100", "5")
                .with_memo("reddit/someuser")
                .with_asset("credit_alphanum4")],
        );

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.credited, 0);
        assert_eq!(summary.refunded, 0);
        assert!(balance_of(&fx.store, "reddit", "someuser").is_none());
        assert!(fx.chain.payments().is_empty());

        // Ignored payments leave no row; the cursor never reaches them.
        let conn = fx.store.conn();
        assert!(store::transaction_by_hash(&conn, "p-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn unserved_adapter_memo_is_refunded_when_no_wallet_matches() {
        let fx = fixture(
            ReconcilePolicy::default(),
            vec![inbound("p-1", "100", "5").with_memo("slack/otheruser")],
        );

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.refunded, 1);
        assert_eq!(summary.credited, 0);
        assert!(balance_of(&fx.store, "slack", "otheruser").is_none());
        assert_eq!(fx.chain.payments().len(), 1);
    }

    #[tokio::test]
    async fn missing_memo_resolves_through_the_registered_wallet() {
        let fx = fixture(ReconcilePolicy::default(), vec![inbound("p-1", "100", "5")]);
        {
            let conn = fx.store.conn();
            let account = store::insert_account(&conn, "reddit", "someuser").unwrap();
            store::set_wallet_address(&conn, account.id, &Address::parse(GOOD_SOURCE).unwrap())
                .unwrap();
        }

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.credited, 1);
        assert_eq!(summary.refunded, 0);
        assert_eq!(
            balance_of(&fx.store, "reddit", "someuser").unwrap().to_fixed(),
            "5.0000000"
        );
        assert!(fx.chain.payments().is_empty());
    }

    #[tokio::test]
    async fn outbound_payments_are_ignored() {
        let fx = fixture(ReconcilePolicy::default(), Vec::new());
        let echo = PaymentRecord::new(
            "w-echo",
            "300",
            SERVICE_WALLET,
            GOOD_SOURCE,
            Amount::parse("4").unwrap(),
        );
        let disposition = fx.reconciler.process_payment(&echo).await.unwrap();
        assert_eq!(disposition, Disposition::Ignored(IgnoreReason::Outbound));
    }

    #[tokio::test]
    async fn rerun_neither_doubles_credits_nor_refunds() {
        let fx = fixture(
            ReconcilePolicy::default(),
            vec![
                inbound("p-1", "100", "5").with_memo("reddit/someuser"),
                inbound("p-2", "200", "3"),
            ],
        );

        fx.reconciler.run_once().await.unwrap();
        let second = fx.reconciler.run_once().await.unwrap();
        assert_eq!(second.fetched, 0);
        assert_eq!(second.credited, 0);
        assert_eq!(second.refunded, 0);
        assert_eq!(
            balance_of(&fx.store, "reddit", "someuser").unwrap().to_fixed(),
            "5.0000000"
        );
        assert_eq!(fx.chain.payments().len(), 1);
    }

    #[tokio::test]
    async fn payment_persisted_mid_pass_settles_as_duplicate() {
        let fx = fixture(ReconcilePolicy::default(), Vec::new());
        // Rows another instance landed after this pass checked the hash.
        deposit_row(&fx.store, "p-1", "5", Some("reddit/someuser"));
        deposit_row(&fx.store, "p-2", "3", None);

        let credited = fx
            .reconciler
            .credit(
                &inbound("p-1", "100", "5").with_memo("reddit/someuser"),
                &AccountRef::new("reddit", "someuser"),
            )
            .unwrap();
        assert_eq!(credited, Disposition::AlreadyProcessed);
        assert!(balance_of(&fx.store, "reddit", "someuser").is_none());

        let refunded = fx
            .reconciler
            .persist_and_refund(&inbound("p-2", "200", "3"), RefundReason::MissingMemo)
            .await
            .unwrap();
        assert_eq!(refunded, Disposition::AlreadyProcessed);
        assert!(fx.chain.payments().is_empty());
    }

    #[tokio::test]
    async fn start_cursor_skips_history_on_an_empty_ledger() {
        let policy = ReconcilePolicy {
            start_cursor: Some("100".to_string()),
            ..ReconcilePolicy::default()
        };
        let fx = fixture(
            policy,
            vec![
                inbound("p-1", "100", "5").with_memo("reddit/someuser"),
                inbound("p-2", "200", "2").with_memo("reddit/someuser"),
            ],
        );

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(
            balance_of(&fx.store, "reddit", "someuser").unwrap().to_fixed(),
            "2.0000000"
        );

        let conn = fx.store.conn();
        assert!(store::transaction_by_hash(&conn, "p-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn resumes_from_the_last_persisted_cursor() {
        let fx = fixture(
            ReconcilePolicy::default(),
            vec![inbound("p-1", "100", "5").with_memo("reddit/someuser")],
        );
        fx.reconciler.run_once().await.unwrap();

        fx.feed
            .push(inbound("p-2", "200", "2").with_memo("reddit/someuser"));
        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.credited, 1);
        assert_eq!(
            balance_of(&fx.store, "reddit", "someuser").unwrap().to_fixed(),
            "7.0000000"
        );
    }

    #[tokio::test]
    async fn closed_deposits_bounce_routable_payments() {
        let policy = ReconcilePolicy {
            deposits_closed: true,
            ..ReconcilePolicy::default()
        };
        let fx = fixture(
            policy,
            vec![inbound("p-1", "100", "5").with_memo("reddit/someuser")],
        );

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.refunded, 1);
        assert!(balance_of(&fx.store, "reddit", "someuser").is_none());
        assert_eq!(fx.chain.payments().len(), 1);
    }

    #[tokio::test]
    async fn closed_deposits_beat_wallet_resolution() {
        let policy = ReconcilePolicy {
            deposits_closed: true,
            ..ReconcilePolicy::default()
        };
        let fx = fixture(policy, Vec::new());
        {
            let conn = fx.store.conn();
            let account = store::insert_account(&conn, "reddit", "someuser").unwrap();
            store::set_wallet_address(&conn, account.id, &Address::parse(GOOD_SOURCE).unwrap())
                .unwrap();
        }

        let disposition = fx
            .reconciler
            .process_payment(&inbound("p-1", "100", "5"))
            .await
            .unwrap();
        assert!(matches!(
            disposition,
            Disposition::Refunded {
                reason: RefundReason::DepositsClosed,
                ..
            }
        ));
        assert!(balance_of(&fx.store, "reddit", "someuser").unwrap().is_zero());
    }

    #[tokio::test]
    async fn failed_refund_is_retried_on_the_next_pass() {
        let fx = fixture(ReconcilePolicy::default(), vec![inbound("p-1", "100", "5")]);
        fx.chain.fail_next(ChainError::Submission("horizon 504".into()));

        let first = fx.reconciler.run_once().await.unwrap();
        assert_eq!(first.refunded, 0);
        assert_eq!(first.failed, 1);
        assert!(fx.chain.payments().is_empty());

        // Cursor has moved past the deposit; the sweep picks it up.
        let second = fx.reconciler.run_once().await.unwrap();
        assert_eq!(second.fetched, 0);
        assert_eq!(second.refunded, 1);
        assert_eq!(fx.chain.payments().len(), 1);

        let conn = fx.store.conn();
        assert!(store::transaction_by_hash(&conn, "p-1").unwrap().unwrap().refunded);
    }

    #[tokio::test]
    async fn feed_failures_surface_as_errors() {
        let fx = fixture(ReconcilePolicy::default(), vec![inbound("p-1", "100", "5")]);
        fx.feed.fail_next(ChainError::Feed("horizon down".into()));
        assert!(matches!(
            fx.reconciler.run_once().await,
            Err(LedgerError::Chain(_))
        ));
    }

    #[tokio::test]
    async fn dust_deposit_is_marked_refunded_without_payment() {
        let fx = fixture(
            ReconcilePolicy::default(),
            vec![inbound("p-dust", "100", "0.000005")],
        );

        let summary = fx.reconciler.run_once().await.unwrap();
        assert_eq!(summary.refunded, 1);
        assert!(fx.chain.payments().is_empty());

        let conn = fx.store.conn();
        assert!(
            store::transaction_by_hash(&conn, "p-dust")
                .unwrap()
                .unwrap()
                .refunded
        );
    }
}
