use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strkey-encoded public keys are always 56 base32 characters.
const STRKEY_LEN: usize = 56;
/// Version byte for ed25519 public keys, the `G...` prefix.
const VERSION_ED25519_PUBLIC: u8 = 6 << 3;

const ALPHABET: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// A validated Stellar public key in strkey form.
///
/// Construction checks length, canonical base32 encoding, the ed25519
/// version byte, and the CRC16 checksum, so holding an `Address` means
/// the chain will accept it as a payment destination format-wise.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("wallet address must be {STRKEY_LEN} characters, got {0}")]
    Length(usize),
    #[error("wallet address is not canonical base32")]
    Encoding,
    #[error("wallet address is not an ed25519 public key")]
    Version,
    #[error("wallet address checksum mismatch")]
    Checksum,
}

impl Address {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        validate_public_key(input)?;
        Ok(Self(input.to_string()))
    }

    pub fn is_valid(input: &str) -> bool {
        validate_public_key(input).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Checks a candidate strkey public key without allocating an [`Address`].
pub fn validate_public_key(input: &str) -> Result<(), AddressError> {
    if input.len() != STRKEY_LEN {
        return Err(AddressError::Length(input.len()));
    }
    let decoded = base32::decode(ALPHABET, input).ok_or(AddressError::Encoding)?;
    if decoded.len() != 35 || base32::encode(ALPHABET, &decoded) != input {
        return Err(AddressError::Encoding);
    }
    let (payload, checksum) = decoded.split_at(33);
    if payload[0] != VERSION_ED25519_PUBLIC {
        return Err(AddressError::Version);
    }
    if checksum != crc16_xmodem(payload).to_le_bytes() {
        return Err(AddressError::Checksum);
    }
    Ok(())
}

/// CRC16/XModem over the version byte plus key material, the checksum
/// strkey appends in little-endian order.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_public_key(&value)?;
        Ok(Self(value))
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "GDTWLOWE34LFHN4Z3LCF2EGAMWK6IHVAFO65YYRX5TMTER4MHUJIWQKB";
    const GOOD_2: &str = "GDO7HAX2PSR6UN3K7WJLUVJD64OK3QLDXX2RPNMMHI7ZTPYUJOHQ6WTN";
    const SECRET_SEED: &str = "SBEZDGJO5WYUKVCSE44MANQCJCNOVBPOBJF4RNSAQGKQVTYKOTRUSRNH";

    #[test]
    fn crc_matches_the_xmodem_check_value() {
        assert_eq!(crc16_xmodem(b"123456789"), 0x31c3);
    }

    #[test]
    fn accepts_known_public_keys() {
        assert!(Address::is_valid(GOOD));
        assert!(Address::is_valid(GOOD_2));
        assert_eq!(Address::parse(GOOD).unwrap().as_str(), GOOD);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            validate_public_key("badaddress"),
            Err(AddressError::Length(10))
        );
    }

    #[test]
    fn rejects_secret_seeds() {
        assert_eq!(validate_public_key(SECRET_SEED), Err(AddressError::Version));
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut tampered = String::from(&GOOD[..STRKEY_LEN - 1]);
        tampered.push('C');
        assert_eq!(
            validate_public_key(&tampered),
            Err(AddressError::Checksum)
        );
    }

    #[test]
    fn rejects_lowercase_forms() {
        let lowered = GOOD.to_lowercase();
        assert!(Address::parse(&lowered).is_err());
    }

    #[test]
    fn serde_round_trips_as_a_string() {
        let address: Address = serde_json::from_str(&format!("\"{GOOD}\"")).unwrap();
        assert_eq!(serde_json::to_string(&address).unwrap(), format!("\"{GOOD}\""));
        assert!(serde_json::from_str::<Address>("\"not-a-key\"").is_err());
    }
}
