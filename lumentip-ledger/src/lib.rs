//! Accounts, the transaction/action ledger, and the engines that keep
//! them consistent with the chain: reconciliation of inbound deposits,
//! transfers and withdrawals with compensating rollback, and refunds
//! for deposits nobody can claim.

mod accounts;
mod chain;
mod dispatch;
mod error;
mod reconcile;
mod records;
mod refund;
mod store;
#[cfg(test)]
mod testkit;
mod transfer;

pub use accounts::{Accounts, RegisterOutcome};
pub use chain::{
    ChainClient, ChainError, PaymentFeed, PaymentRecord, SubmittedPayment, NATIVE_ASSET,
};
pub use dispatch::{CommandReply, CommandRouter};
pub use error::{LedgerError, LedgerResult};
pub use reconcile::{
    Disposition, IgnoreReason, ReconcilePolicy, ReconcileSummary, Reconciler,
};
pub use records::{
    Account, ActionKind, ActionRecord, NewAction, NewTransaction, TransactionKind,
    TransactionRecord,
};
pub use refund::{RefundEngine, RefundOutcome, RefundReason, REFUND_MEMO};
pub use store::Store;
pub use transfer::{TipOutcome, TransferEngine, WithdrawOutcome};
