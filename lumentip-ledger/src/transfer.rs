use std::sync::Arc;

use lumentip_core::{AccountRef, Address, Amount};
use lumentip_events::{
    EventBus, LedgerEvent, TransferRecordedEvent, WithdrawalReversedEvent,
    WithdrawalSubmittedEvent,
};
use rusqlite::TransactionBehavior;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::records::{Account, ActionKind, NewAction, NewTransaction, TransactionKind};
use crate::store::{self, Store};
use crate::{LedgerError, LedgerResult};

#[derive(Clone, Debug, PartialEq)]
pub enum TipOutcome {
    Transferred { source: Account, target: Account },
    /// An action with this command hash already applied.
    DuplicateTip,
    InsufficientBalance { balance: Amount },
    SelfTransfer,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WithdrawOutcome {
    Withdrawn {
        /// Chain transaction hash.
        hash: String,
        amount: Amount,
        /// Balance left after the debit.
        balance: Amount,
    },
    InvalidAmount {
        raw: String,
    },
    NoAddressProvided,
    InvalidAddress {
        raw: String,
    },
    InsufficientBalance {
        balance: Amount,
    },
    SelfWithdrawal,
    DuplicateWithdrawal,
    /// Chain rejected the payment; the debit was credited back.
    SubmissionFailed {
        reason: String,
    },
}

/// Moves balances between accounts and out to the chain.
pub struct TransferEngine {
    store: Arc<Store>,
    chain: Arc<dyn ChainClient>,
    events: Arc<EventBus>,
}

impl TransferEngine {
    pub fn new(store: Arc<Store>, chain: Arc<dyn ChainClient>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            chain,
            events,
        }
    }

    /// Moves `amount` from `source` to `target` inside the ledger.
    ///
    /// Checks run in a fixed order: duplicate hash, then balance, then
    /// self-transfer. The debit, credit, and action row commit together
    /// or not at all.
    pub fn tip(
        &self,
        source: &AccountRef,
        target: &AccountRef,
        amount: Amount,
        hash: &str,
    ) -> LedgerResult<TipOutcome> {
        let mut conn = self.store.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if store::action_exists(&tx, hash, ActionKind::Transfer)? {
            return Ok(TipOutcome::DuplicateTip);
        }
        let source_row = store::get_or_create_account(&tx, &source.adapter, &source.unique_id)?;
        let target_row = store::get_or_create_account(&tx, &target.adapter, &target.unique_id)?;
        if !source_row.can_pay(amount) {
            return Ok(TipOutcome::InsufficientBalance {
                balance: source_row.balance,
            });
        }
        if source_row.id == target_row.id {
            return Ok(TipOutcome::SelfTransfer);
        }

        let debited = source_row.balance.checked_sub(amount).ok_or_else(|| {
            LedgerError::InvalidState(format!("debit below zero for account {}", source_row.id))
        })?;
        let credited = target_row.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidState(format!("credit overflow for account {}", target_row.id))
        })?;
        store::update_balance(&tx, source_row.id, debited)?;
        store::update_balance(&tx, target_row.id, credited)?;
        store::insert_action(
            &tx,
            &NewAction::new(hash, ActionKind::Transfer, amount)
                .from_account(source_row.id)
                .to_account(target_row.id),
        )?;
        tx.commit()?;

        info!(%source, %target, %amount, "tip transferred");
        self.events
            .publish(LedgerEvent::TransferRecorded(TransferRecordedEvent {
                source: source.clone(),
                target: target.clone(),
                amount,
            }));
        Ok(TipOutcome::Transferred {
            source: Account {
                balance: debited,
                ..source_row
            },
            target: Account {
                balance: credited,
                ..target_row
            },
        })
    }

    /// Pays `raw_amount` out to `address` from the user's balance,
    /// falling back to the account's registered wallet when no address
    /// is given.
    ///
    /// Validation order is part of the contract: amount, address
    /// presence, address validity, balance, self-withdrawal, duplicate
    /// hash. The debit and the withdrawal action commit together before
    /// submission, so a redelivery of the same hash reads as a
    /// duplicate while the payment is in flight. A rejected submission
    /// credits the balance back and releases the hash for a retry.
    pub async fn withdraw(
        &self,
        account: &AccountRef,
        raw_amount: &str,
        address: Option<&str>,
        hash: &str,
    ) -> LedgerResult<WithdrawOutcome> {
        let amount = match Amount::parse(raw_amount) {
            Ok(parsed) if !parsed.is_zero() => parsed,
            _ => {
                return Ok(WithdrawOutcome::InvalidAmount {
                    raw: raw_amount.to_string(),
                })
            }
        };

        let (account_row, destination, debited, reservation) = {
            let mut conn = self.store.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let row = store::get_or_create_account(&tx, &account.adapter, &account.unique_id)?;
            let destination = match address {
                Some(raw) => match Address::parse(raw) {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        return Ok(WithdrawOutcome::InvalidAddress {
                            raw: raw.to_string(),
                        })
                    }
                },
                None => match row.wallet_address.clone() {
                    Some(on_file) => on_file,
                    None => return Ok(WithdrawOutcome::NoAddressProvided),
                },
            };
            if !row.can_pay(amount) {
                return Ok(WithdrawOutcome::InsufficientBalance {
                    balance: row.balance,
                });
            }
            if &destination == self.chain.address() {
                return Ok(WithdrawOutcome::SelfWithdrawal);
            }
            if store::action_exists(&tx, hash, ActionKind::Withdrawal)? {
                return Ok(WithdrawOutcome::DuplicateWithdrawal);
            }
            let debited = row.balance.checked_sub(amount).ok_or_else(|| {
                LedgerError::InvalidState(format!("debit below zero for account {}", row.id))
            })?;
            store::update_balance(&tx, row.id, debited)?;
            // The action row is the duplicate guard, so it has to land
            // with the debit, not after the submission.
            let reservation = store::insert_action(
                &tx,
                &NewAction::new(hash, ActionKind::Withdrawal, amount)
                    .from_account(row.id)
                    .with_address(destination.as_str()),
            )?;
            tx.commit()?;
            (row, destination, debited, reservation)
        };

        match self.chain.pay(&destination, amount, None).await {
            Ok(submitted) => {
                {
                    let conn = self.store.conn();
                    store::insert_transaction(
                        &conn,
                        &NewTransaction::new(
                            &submitted.hash,
                            TransactionKind::Withdrawal,
                            self.chain.address().as_str(),
                            destination.as_str(),
                            amount,
                        ),
                    )?;
                }
                info!(%account, %amount, address = %destination, chain_hash = %submitted.hash, "withdrawal submitted");
                self.events
                    .publish(LedgerEvent::WithdrawalSubmitted(WithdrawalSubmittedEvent {
                        account: account.clone(),
                        address: destination,
                        amount,
                        hash: submitted.hash.clone(),
                    }));
                Ok(WithdrawOutcome::Withdrawn {
                    hash: submitted.hash,
                    amount,
                    balance: debited,
                })
            }
            Err(err) => {
                {
                    let mut conn = self.store.conn();
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                    let row = store::account_by_id(&tx, account_row.id)?.ok_or_else(|| {
                        LedgerError::InvalidState(format!(
                            "account {} vanished mid-withdrawal",
                            account_row.id
                        ))
                    })?;
                    let restored = row.balance.checked_add(amount).ok_or_else(|| {
                        LedgerError::InvalidState(format!(
                            "credit-back overflow for account {}",
                            row.id
                        ))
                    })?;
                    store::update_balance(&tx, row.id, restored)?;
                    // Releasing the reserved action row lets a retry of
                    // the same command run the withdrawal again.
                    store::delete_action(&tx, reservation.id)?;
                    tx.commit()?;
                }
                warn!(%account, %amount, error = %err, "withdrawal rejected, balance restored");
                self.events
                    .publish(LedgerEvent::WithdrawalReversed(WithdrawalReversedEvent {
                        account: account.clone(),
                        amount,
                        reason: err.to_string(),
                    }));
                Ok(WithdrawOutcome::SubmissionFailed {
                    reason: err.to_string(),
                })
            }
        }
    }
}
