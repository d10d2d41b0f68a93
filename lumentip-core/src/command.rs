use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Fields every command carries regardless of variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMeta {
    /// Chat platform the command originated from, e.g. `"reddit"`.
    pub adapter: String,
    /// Platform-scoped id of the user who issued the command.
    pub source_id: String,
    /// Alias of `source_id` kept in the payload for queue compatibility.
    pub unique_id: String,
    /// Idempotency hash recorded on the resulting ledger action.
    pub hash: String,
}

impl CommandMeta {
    /// Builds the shared fields with a fresh idempotency hash.
    pub fn new(adapter: impl Into<String>, source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            adapter: adapter.into(),
            unique_id: source_id.clone(),
            source_id,
            hash: Uuid::new_v4().to_string(),
        }
    }

    /// Replaces the generated hash, for replaying a previously issued
    /// command under its original identity.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }
}

/// A user instruction dequeued from a chat adapter.
///
/// The JSON form is a flat object tagged by `type`; unrecognized tags
/// decode as [`Command::Unknown`] so one bad producer cannot wedge the
/// queue consumer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Command {
    Register {
        #[serde(flatten)]
        meta: CommandMeta,
        wallet_public_key: String,
    },
    Tip {
        #[serde(flatten)]
        meta: CommandMeta,
        target_id: String,
        amount: String,
    },
    Withdraw {
        #[serde(flatten)]
        meta: CommandMeta,
        amount: String,
        #[serde(default)]
        address: Option<String>,
    },
    Balance {
        #[serde(flatten)]
        meta: CommandMeta,
        /// Wallet on file, when the adapter already resolved it.
        #[serde(default)]
        address: Option<String>,
    },
    Info {
        #[serde(flatten)]
        meta: CommandMeta,
    },
    TipDevelopers {
        #[serde(flatten)]
        meta: CommandMeta,
        amount: String,
        /// Destination override; when absent the operator-configured
        /// wallet receives the tip.
        #[serde(default)]
        address: Option<String>,
    },
    Unknown {
        #[serde(flatten)]
        meta: CommandMeta,
    },
}

const KNOWN_TAGS: &[&str] = &[
    "register",
    "tip",
    "withdraw",
    "balance",
    "info",
    "tip-developers",
];

impl Command {
    pub fn register(
        adapter: impl Into<String>,
        source_id: impl Into<String>,
        wallet_public_key: impl Into<String>,
    ) -> Self {
        Self::Register {
            meta: CommandMeta::new(adapter, source_id),
            wallet_public_key: wallet_public_key.into(),
        }
    }

    pub fn tip(
        adapter: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self::Tip {
            meta: CommandMeta::new(adapter, source_id),
            target_id: target_id.into(),
            amount: amount.into(),
        }
    }

    pub fn withdraw(
        adapter: impl Into<String>,
        source_id: impl Into<String>,
        amount: impl Into<String>,
        address: Option<String>,
    ) -> Self {
        Self::Withdraw {
            meta: CommandMeta::new(adapter, source_id),
            amount: amount.into(),
            address,
        }
    }

    pub fn balance(
        adapter: impl Into<String>,
        source_id: impl Into<String>,
        address: Option<String>,
    ) -> Self {
        Self::Balance {
            meta: CommandMeta::new(adapter, source_id),
            address,
        }
    }

    pub fn info(adapter: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self::Info {
            meta: CommandMeta::new(adapter, source_id),
        }
    }

    pub fn tip_developers(
        adapter: impl Into<String>,
        source_id: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self::TipDevelopers {
            meta: CommandMeta::new(adapter, source_id),
            amount: amount.into(),
            address: None,
        }
    }

    pub fn meta(&self) -> &CommandMeta {
        match self {
            Self::Register { meta, .. }
            | Self::Tip { meta, .. }
            | Self::Withdraw { meta, .. }
            | Self::Balance { meta, .. }
            | Self::Info { meta }
            | Self::TipDevelopers { meta, .. }
            | Self::Unknown { meta } => meta,
        }
    }

    /// Tag used in the serialized form, handy for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Tip { .. } => "tip",
            Self::Withdraw { .. } => "withdraw",
            Self::Balance { .. } => "balance",
            Self::Info { .. } => "info",
            Self::TipDevelopers { .. } => "tip-developers",
            Self::Unknown { .. } => "unknown",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a queue payload. A payload whose `type` tag is not one
    /// of ours still yields [`Command::Unknown`] as long as the shared
    /// fields are present; only a structurally broken payload errors.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        let tag = value.get("type").and_then(Value::as_str);
        if tag.is_some_and(|t| KNOWN_TAGS.contains(&t)) {
            serde_json::from_value(value)
        } else {
            let meta: CommandMeta = serde_json::from_value(value)?;
            Ok(Self::Unknown { meta })
        }
    }
}
