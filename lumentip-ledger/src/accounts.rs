use std::sync::Arc;

use lumentip_core::{AccountRef, Address};

use crate::records::{Account, ActionRecord};
use crate::store::{self, Store};
use crate::LedgerResult;

/// Outcome of binding a payout wallet to an account.
#[derive(Clone, Debug, PartialEq)]
pub enum RegisterOutcome {
    /// First wallet on this account.
    Registered { account: Account },
    /// Same wallet the account already has on file.
    Unchanged { address: Address },
    /// New wallet replacing the one on file.
    Updated { account: Account, previous: Address },
    /// Another account holds this wallet; the binding stays put.
    TakenByAnotherAccount,
}

/// Repository for chat-user accounts.
///
/// Accounts come into existence on first contact, whatever the contact
/// is: a command, a tip received, or a deposit routed by memo.
#[derive(Clone)]
pub struct Accounts {
    store: Arc<Store>,
}

impl Accounts {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, account: &AccountRef) -> LedgerResult<Option<Account>> {
        let conn = self.store.conn();
        store::account_by_ref(&conn, &account.adapter, &account.unique_id)
    }

    pub fn get_or_create(&self, account: &AccountRef) -> LedgerResult<Account> {
        let conn = self.store.conn();
        store::get_or_create_account(&conn, &account.adapter, &account.unique_id)
    }

    /// Records the wallet a user registered for direct payouts. A
    /// wallet binds to at most one account across all adapters.
    pub fn register_wallet(
        &self,
        account: &AccountRef,
        address: &Address,
    ) -> LedgerResult<RegisterOutcome> {
        let conn = self.store.conn();
        let mut row = store::get_or_create_account(&conn, &account.adapter, &account.unique_id)?;
        if row.wallet_address.as_ref() == Some(address) {
            return Ok(RegisterOutcome::Unchanged {
                address: address.clone(),
            });
        }
        if store::account_by_wallet(&conn, address.as_str())?.is_some() {
            return Ok(RegisterOutcome::TakenByAnotherAccount);
        }
        let previous = row.wallet_address.take();
        store::set_wallet_address(&conn, row.id, address)?;
        row.wallet_address = Some(address.clone());
        Ok(match previous {
            Some(previous) => RegisterOutcome::Updated {
                account: row,
                previous,
            },
            None => RegisterOutcome::Registered { account: row },
        })
    }

    pub fn list(&self) -> LedgerResult<Vec<Account>> {
        let conn = self.store.conn();
        store::all_accounts(&conn)
    }

    /// Most recent actions touching the account, newest first.
    pub fn history(&self, account: &AccountRef, limit: usize) -> LedgerResult<Vec<ActionRecord>> {
        let conn = self.store.conn();
        match store::account_by_ref(&conn, &account.adapter, &account.unique_id)? {
            Some(row) => store::account_actions(&conn, row.id, limit),
            None => Ok(Vec::new()),
        }
    }
}
