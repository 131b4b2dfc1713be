//! Action binding: `keccak256(abi.encode(name, to, amount))`.
//!
//! The verifying contract recomputes the same digest from the same tuple, so
//! every width, padding and address-casing rule here has to match Solidity.
//! Inputs that cannot be encoded exactly are rejected with
//! [`ZkOtpError::Encoding`] instead of being coerced.

use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::{error::ZkOtpError, field::FieldElement};

pub const DEFAULT_ACTION_NAME: &str = "transferFunds";

const WORD: usize = 32;
const ADDRESS_LEN: usize = 20;

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Parse `0x` + 40 hex digits. Mixed-case input must be a valid EIP-55 checksum.
    pub fn parse(input: &str) -> Result<Self, ZkOtpError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ZkOtpError::Encoding(format!("address '{input}' must start with 0x")))?;
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(ZkOtpError::Encoding(format!(
                "address must be {} hex digits, got {}",
                ADDRESS_LEN * 2,
                digits.len()
            )));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|err| ZkOtpError::Encoding(format!("address is not hex: {err}")))?;
        let address = Self(bytes);

        let has_upper = digits.bytes().any(|b| b.is_ascii_uppercase());
        let has_lower = digits.bytes().any(|b| b.is_ascii_lowercase());
        if has_upper && has_lower && address.to_checksum().strip_prefix("0x") != Some(digits) {
            return Err(ZkOtpError::Encoding(format!(
                "address '{input}' has an invalid EIP-55 checksum"
            )));
        }
        Ok(address)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// EIP-55 mixed-case rendering.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");
        for (index, ch) in lower.chars().enumerate() {
            let nibble = (digest[index / 2] >> if index % 2 == 0 { 4 } else { 0 }) & 0x0f;
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

/// `uint256` amount, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Amount([u8; WORD]);

impl Amount {
    /// Parse a decimal or `0x`-hex unsigned integer that fits in 256 bits.
    pub fn parse(input: &str) -> Result<Self, ZkOtpError> {
        let trimmed = input.trim();
        let (digits, radix) = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex_digits) => (hex_digits, 16),
            None => (trimmed, 10),
        };
        let valid = !digits.is_empty()
            && digits.chars().all(|c| c.is_digit(radix));
        if !valid {
            return Err(ZkOtpError::Encoding(format!(
                "amount '{input}' is not an unsigned integer"
            )));
        }
        let value = BigUint::parse_bytes(digits.as_bytes(), radix)
            .ok_or_else(|| ZkOtpError::Encoding(format!("amount '{input}' is not an integer")))?;
        Self::from_biguint(&value)
    }

    pub fn from_biguint(value: &BigUint) -> Result<Self, ZkOtpError> {
        if value.bits() > 256 {
            return Err(ZkOtpError::Encoding(format!(
                "amount {value} does not fit in uint256"
            )));
        }
        let bytes = value.to_bytes_be();
        let mut word = [0u8; WORD];
        word[WORD - bytes.len()..].copy_from_slice(&bytes);
        Ok(Self(word))
    }

    pub fn as_word(&self) -> &[u8; WORD] {
        &self.0
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        let mut word = [0u8; WORD];
        word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
        Self(word)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.to_biguint())
    }
}

/// How the action tuple is serialized before hashing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEncoding {
    /// `abi.encode`, the layout the verifying contract uses.
    #[default]
    Standard,
    /// `abi.encodePacked`, as produced by some legacy clients.
    Packed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub name: String,
    pub recipient: Address,
    pub amount: Amount,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, recipient: Address, amount: Amount) -> Self {
        Self {
            name: name.into(),
            recipient,
            amount,
        }
    }

    /// Parse recipient and amount from caller strings.
    pub fn parse(name: &str, to: &str, amount: &str) -> Result<Self, ZkOtpError> {
        Ok(Self::new(name, Address::parse(to)?, Amount::parse(amount)?))
    }

    pub fn encode(&self, encoding: ActionEncoding) -> Vec<u8> {
        match encoding {
            ActionEncoding::Standard => self.encode_standard(),
            ActionEncoding::Packed => self.encode_packed(),
        }
    }

    pub fn hash(&self, encoding: ActionEncoding) -> ActionHash {
        ActionHash(keccak256(&self.encode(encoding)))
    }

    // head: offset(string), address, uint256; tail: length, bytes padded to a word.
    fn encode_standard(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let padded_len = name.len().div_ceil(WORD) * WORD;
        let mut out = Vec::with_capacity(4 * WORD + padded_len);

        out.extend_from_slice(&usize_word(3 * WORD));
        let mut address_word = [0u8; WORD];
        address_word[WORD - ADDRESS_LEN..].copy_from_slice(&self.recipient.0);
        out.extend_from_slice(&address_word);
        out.extend_from_slice(&self.amount.0);

        out.extend_from_slice(&usize_word(name.len()));
        out.extend_from_slice(name);
        out.resize(4 * WORD + padded_len, 0);
        out
    }

    fn encode_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + ADDRESS_LEN + WORD);
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.recipient.0);
        out.extend_from_slice(&self.amount.0);
        out
    }
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

/// 32-byte Keccak-256 digest of the encoded action.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionHash([u8; 32]);

impl ActionHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// `uint256(hash) mod P`, the form carried in the witness.
    pub fn to_field(&self) -> FieldElement {
        FieldElement::from_be_bytes_mod_order(&self.0)
    }
}

impl fmt::Debug for ActionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionHash({})", self.to_hex())
    }
}

impl fmt::Display for ActionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Parse and hash an action with the contract's `abi.encode` layout.
pub fn bind_action(name: &str, to: &str, amount: &str) -> Result<ActionHash, ZkOtpError> {
    Ok(ActionDescriptor::parse(name, to, amount)?.hash(ActionEncoding::Standard))
}
