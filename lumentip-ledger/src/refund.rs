use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lumentip_core::{Address, Amount};
use lumentip_events::{DepositRefundedEvent, EventBus, LedgerEvent};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::records::{ActionKind, NewAction, NewTransaction, TransactionKind, TransactionRecord};
use crate::store::{self, Store};
use crate::{LedgerError, LedgerResult};

/// Memo stamped on every refund payment so depositors can tell it
/// apart from an ordinary transfer.
pub const REFUND_MEMO: &str = "lumentip refund";

/// Why a deposit is going back to its sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefundReason {
    MissingMemo,
    MalformedMemo,
    /// Memo parses but names an adapter this instance does not serve.
    UnrecognizedMemo,
    DepositsClosed,
}

impl fmt::Display for RefundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefundReason::MissingMemo => "missing memo",
            RefundReason::MalformedMemo => "malformed memo",
            RefundReason::UnrecognizedMemo => "unrecognized memo",
            RefundReason::DepositsClosed => "deposits closed",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefundOutcome {
    /// Funds went back on chain under `hash`.
    Refunded { hash: String, amount: Amount },
    /// Deposit did not cover the network fee; marked refunded with no
    /// payment.
    DustSwallowed,
    /// A refund for this deposit already exists or is in flight.
    DuplicateRefund,
    /// Submission failed; the pending row was rolled back so a later
    /// pass can retry.
    Failed { reason: String },
}

/// Returns unroutable deposits to their senders, minus a flat fee.
pub struct RefundEngine {
    store: Arc<Store>,
    chain: Arc<dyn ChainClient>,
    events: Arc<EventBus>,
    fee: Amount,
}

impl RefundEngine {
    pub fn new(
        store: Arc<Store>,
        chain: Arc<dyn ChainClient>,
        events: Arc<EventBus>,
        fee: Amount,
    ) -> Self {
        Self {
            store,
            chain,
            events,
            fee,
        }
    }

    /// Sends `deposit.amount - fee` back to the deposit's source.
    ///
    /// A pending refund row under a deterministic hash goes in before
    /// submission. On success the row is rewritten to the chain hash
    /// and the deposit marked refunded in one transaction; on failure
    /// the row is deleted. A crash in between leaves the pending row,
    /// which the duplicate guard treats as already in flight rather
    /// than risking a double send.
    pub async fn refund_deposit(
        &self,
        deposit: &TransactionRecord,
        reason: RefundReason,
    ) -> LedgerResult<RefundOutcome> {
        let destination = Address::parse(&deposit.source).map_err(|err| {
            LedgerError::InvalidState(format!(
                "deposit {} has an unpayable source: {err}",
                deposit.hash
            ))
        })?;

        let net = deposit
            .amount
            .checked_sub(self.fee)
            .filter(|net| !net.is_zero());
        let Some(net) = net else {
            let conn = self.store.conn();
            store::mark_refunded(&conn, deposit.id)?;
            info!(hash = %deposit.hash, amount = %deposit.amount, "deposit below refund fee, swallowed");
            return Ok(RefundOutcome::DustSwallowed);
        };

        let pending_hash = refund_hash(&deposit.source, deposit.amount, deposit.created_at);
        {
            let conn = self.store.conn();
            // Re-read the row: the caller may hold a stale copy.
            let current = store::transaction_by_hash(&conn, &deposit.hash)?.ok_or_else(|| {
                LedgerError::InvalidState(format!("deposit {} is not persisted", deposit.hash))
            })?;
            if current.refunded || store::transaction_by_hash(&conn, &pending_hash)?.is_some() {
                return Ok(RefundOutcome::DuplicateRefund);
            }
            store::insert_transaction(
                &conn,
                &NewTransaction::new(
                    &pending_hash,
                    TransactionKind::Refund,
                    self.chain.address().as_str(),
                    &deposit.source,
                    net,
                )
                .with_memo(Some(REFUND_MEMO.to_string())),
            )?;
        }

        match self.chain.pay(&destination, net, Some(REFUND_MEMO)).await {
            Ok(submitted) => {
                {
                    let mut conn = self.store.conn();
                    let tx = conn.transaction_with_behavior(
                        rusqlite::TransactionBehavior::Immediate,
                    )?;
                    if let Some(pending) = store::transaction_by_hash(&tx, &pending_hash)? {
                        store::rewrite_transaction_hash(&tx, pending.id, &submitted.hash)?;
                    }
                    store::mark_refunded(&tx, deposit.id)?;
                    store::insert_action(
                        &tx,
                        &NewAction::new(&submitted.hash, ActionKind::Refund, net)
                            .with_address(deposit.source.clone()),
                    )?;
                    tx.commit()?;
                }
                info!(deposit = %deposit.hash, refund = %submitted.hash, amount = %net, %reason, "deposit refunded");
                self.events
                    .publish(LedgerEvent::DepositRefunded(DepositRefundedEvent {
                        source: deposit.source.clone(),
                        amount: net,
                        reason: reason.to_string(),
                    }));
                Ok(RefundOutcome::Refunded {
                    hash: submitted.hash,
                    amount: net,
                })
            }
            Err(err) => {
                {
                    let conn = self.store.conn();
                    if let Some(pending) = store::transaction_by_hash(&conn, &pending_hash)? {
                        store::delete_transaction(&conn, pending.id)?;
                    }
                }
                warn!(deposit = %deposit.hash, error = %err, "refund submission failed");
                Ok(RefundOutcome::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }
}

/// Deterministic placeholder hash for a refund that has not reached the
/// chain yet. Reprocessing the same deposit recomputes the same value.
pub(crate) fn refund_hash(source: &str, amount: Amount, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(amount.to_fixed().as_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    format!("refund:{}", hex::encode(hasher.finalize()))
}
