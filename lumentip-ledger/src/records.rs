use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lumentip_core::{AccountRef, Address, Amount};
use serde::{Deserialize, Serialize};

/// A chat user's ledger account. Balances live here, not on chain; the
/// service hot wallet holds the pooled funds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub adapter: String,
    pub unique_id: String,
    pub balance: Amount,
    pub wallet_address: Option<Address>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn account_ref(&self) -> AccountRef {
        AccountRef::new(self.adapter.clone(), self.unique_id.clone())
    }

    /// A zero or missing balance can never pay anything, including a
    /// zero amount.
    pub fn can_pay(&self, amount: Amount) -> bool {
        !amount.is_zero() && self.balance >= amount
    }
}

/// Enumerates the on-chain movements the ledger records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Refund,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "refund" => Ok(TransactionKind::Refund),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// Mirror of one chain payment touching the service wallet.
///
/// `hash` is the chain transaction hash and is unique; a refund that has
/// not reached the chain yet carries a deterministic placeholder hash
/// until submission succeeds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub hash: String,
    pub kind: TransactionKind,
    /// Sending address for deposits, service wallet for refunds.
    pub source: String,
    /// Receiving address.
    pub target: String,
    /// Feed paging token; empty for rows we originated ourselves.
    pub cursor: Option<String>,
    pub memo: Option<String>,
    pub amount: Amount,
    pub asset: String,
    pub credited: bool,
    pub refunded: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`TransactionRecord`]; the store assigns the row id.
#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub hash: String,
    pub kind: TransactionKind,
    pub source: String,
    pub target: String,
    pub cursor: Option<String>,
    pub memo: Option<String>,
    pub amount: Amount,
    pub asset: String,
    pub credited: bool,
    pub refunded: bool,
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    pub fn new(
        hash: impl Into<String>,
        kind: TransactionKind,
        source: impl Into<String>,
        target: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            hash: hash.into(),
            kind,
            source: source.into(),
            target: target.into(),
            cursor: None,
            memo: None,
            amount,
            asset: crate::chain::NATIVE_ASSET.to_string(),
            credited: false,
            refunded: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo;
        self
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = asset.into();
        self
    }

    pub fn credited(mut self) -> Self {
        self.credited = true;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Enumerates the balance-affecting operations an account can perform
/// or receive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Deposit,
    Withdrawal,
    Transfer,
    Refund,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Deposit => "deposit",
            ActionKind::Withdrawal => "withdrawal",
            ActionKind::Transfer => "transfer",
            ActionKind::Refund => "refund",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(ActionKind::Deposit),
            "withdrawal" => Ok(ActionKind::Withdrawal),
            "transfer" => Ok(ActionKind::Transfer),
            "refund" => Ok(ActionKind::Refund),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// One line of account history, deduplicated by `(hash, kind)` so a
/// replayed command or re-fetched payment cannot apply twice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: i64,
    pub hash: String,
    pub kind: ActionKind,
    /// Paying account; `None` when funds came from outside the ledger.
    pub source_account_id: Option<i64>,
    /// Receiving account; `None` when funds left for the chain.
    pub target_account_id: Option<i64>,
    pub amount: Amount,
    /// Chain destination for withdrawals and refunds.
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`ActionRecord`].
#[derive(Clone, Debug)]
pub struct NewAction {
    pub hash: String,
    pub kind: ActionKind,
    pub source_account_id: Option<i64>,
    pub target_account_id: Option<i64>,
    pub amount: Amount,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAction {
    pub fn new(hash: impl Into<String>, kind: ActionKind, amount: Amount) -> Self {
        Self {
            hash: hash.into(),
            kind,
            source_account_id: None,
            target_account_id: None,
            amount,
            address: None,
            created_at: Utc::now(),
        }
    }

    pub fn from_account(mut self, id: i64) -> Self {
        self.source_account_id = Some(id);
        self
    }

    pub fn to_account(mut self, id: i64) -> Self {
        self.target_account_id = Some(id);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}
