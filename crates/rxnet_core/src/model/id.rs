//! Document identifier.
//!
//! # Responsibility
//! - Generate fresh, globally unique identifiers on the client side.
//! - Round-trip identifiers through their 24-character hex form.
//!
//! # Invariants
//! - Byte layout: 4-byte big-endian creation seconds, 5 process-unique
//!   bytes, 3-byte big-endian counter. Ordering is byte-wise, so ids sort
//!   by creation second first.
//! - The textual form is always lowercase hex; parsing accepts either case.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const ID_BYTES: usize = 12;
const COUNTER_MASK: u32 = 0x00FF_FFFF;

static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| {
    let seed = Uuid::new_v4();
    let bytes = seed.as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
});

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| {
    let seed = Uuid::new_v4();
    let bytes = seed.as_bytes();
    AtomicU32::new(u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]))
});

/// Globally unique, orderable identifier of one document.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier([u8; ID_BYTES]);

/// Error returned when a string is not a valid identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierParseError {
    pub input: String,
}

impl Display for IdentifierParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid identifier `{}`: expected 24 hexadecimal characters",
            self.input
        )
    }
}

impl Error for IdentifierParseError {}

impl Identifier {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as u32);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; ID_BYTES];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(PROCESS_UNIQUE.as_slice());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Creation time embedded in the identifier, in Unix seconds.
    pub fn timestamp_secs(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Parses the 24-character hex form.
    pub fn parse_str(input: &str) -> Result<Self, IdentifierParseError> {
        let invalid = || IdentifierParseError {
            input: input.to_string(),
        };
        if input.len() != ID_BYTES * 2 || !input.is_ascii() {
            return Err(invalid());
        }

        let mut bytes = [0u8; ID_BYTES];
        for (index, byte) in bytes.iter_mut().enumerate() {
            let pair = &input[index * 2..index * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identifier({})", self.to_hex())
    }
}

impl FromStr for Identifier {
    type Err = IdentifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_str(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.to_hex()
    }
}

impl From<Identifier> for serde_json::Value {
    fn from(value: Identifier) -> Self {
        serde_json::Value::String(value.to_hex())
    }
}
