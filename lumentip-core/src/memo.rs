use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies an account by chat platform and the user id scoped to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub adapter: String,
    pub unique_id: String,
}

impl AccountRef {
    pub fn new(adapter: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            unique_id: unique_id.into(),
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.adapter, self.unique_id)
    }
}

/// Outcome of decoding the text memo attached to an inbound payment.
///
/// Deposits address an account as `adapter/uniqueId`. Whitespace is
/// stripped before splitting, so `" reddit / someuser "` still routes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoRoute {
    /// No memo, or an all-whitespace one.
    Missing,
    /// A memo was present but does not follow the `adapter/uniqueId` form.
    Malformed(String),
    Account(AccountRef),
}

impl MemoRoute {
    pub fn classify(memo: Option<&str>) -> Self {
        let Some(raw) = memo else {
            return Self::Missing;
        };
        if raw.trim().is_empty() {
            return Self::Missing;
        }
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let mut parts = compact.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(adapter), Some(unique_id), None)
                if !adapter.is_empty() && !unique_id.is_empty() =>
            {
                Self::Account(AccountRef::new(adapter, unique_id))
            }
            _ => Self::Malformed(raw.to_string()),
        }
    }
}
