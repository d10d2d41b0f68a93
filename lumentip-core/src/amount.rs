use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Fractional digits carried by every amount, matching the chain's
/// smallest representable unit (1 stroop = 10^-7).
pub const AMOUNT_SCALE: u32 = 7;

/// Upper bound on whole units. No asset handled by the service has a
/// supply anywhere near 10^12, so anything larger is a malformed input.
const MAX_WHOLE_UNITS: i64 = 1_000_000_000_000;

/// A non-negative asset amount normalized to [`AMOUNT_SCALE`] digits.
///
/// All balances, tips, and fees flow through this type, so the invariant
/// holds everywhere: two amounts that represent the same quantity compare
/// equal and render the same persisted string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(Decimal);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("`{0}` is not a valid amount")]
    Invalid(String),
}

fn normalize(value: Decimal) -> Decimal {
    let mut fixed =
        value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    fixed.rescale(AMOUNT_SCALE);
    fixed
}

impl Amount {
    pub fn zero() -> Self {
        Self(normalize(Decimal::ZERO))
    }

    /// Builds an amount from whole stroops (10^-7 units). Total by
    /// construction, which suits fee constants.
    pub fn from_stroops(stroops: u32) -> Self {
        Self(normalize(Decimal::new(i64::from(stroops), AMOUNT_SCALE)))
    }

    /// Parses a decimal string, rejecting negatives and values at or
    /// above 10^12 whole units. Excess fractional digits are rounded
    /// half away from zero.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let value = Decimal::from_str(input.trim())
            .map_err(|_| AmountError::Invalid(input.to_string()))?;
        Self::from_decimal(value).map_err(|_| AmountError::Invalid(input.to_string()))
    }

    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Invalid(value.to_string()));
        }
        if value >= Decimal::from(MAX_WHOLE_UNITS) {
            return Err(AmountError::Invalid(value.to_string()));
        }
        Ok(Self(normalize(value)))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        let sum = self.0.checked_add(other.0)?;
        if sum >= Decimal::from(MAX_WHOLE_UNITS) {
            return None;
        }
        Some(Amount(normalize(sum)))
    }

    /// `None` when the result would go negative, which callers treat as
    /// an insufficient balance.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        let diff = self.0.checked_sub(other.0)?;
        if diff.is_sign_negative() {
            return None;
        }
        Some(Amount(normalize(diff)))
    }

    /// Canonical persisted form: exactly [`AMOUNT_SCALE`] fractional
    /// digits, e.g. `"1.0100000"`.
    pub fn to_fixed(&self) -> String {
        self.0.to_string()
    }

    /// Human form with trailing zeros removed, e.g. `"1.01"`; a whole
    /// amount drops the fractional part entirely.
    pub fn trimmed(&self) -> String {
        self.0.normalize().to_string()
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_fixed())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Amount::parse(&raw).map_err(de::Error::custom)
    }
}
