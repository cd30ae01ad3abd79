//! Event payloads delivered by the host's reactor.
//!
//! Only the [`Resource`] variant decides where a payload is routed; the
//! dispatch loop never inspects anything else to classify it.

use std::fmt;

use serde::{Serialize, Serializer};

/// Raw account address bytes.
///
/// An address decoded from an odd number of hex digits remembers that, so it
/// renders back with the same digits it was written with (`0xabc`, not
/// `0x0abc`). The bytes are the same either way.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    bytes: Vec<u8>,
    odd_nibble: bool,
}

impl Address {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            odd_nibble: false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `0x`-prefixed lowercase hex. This is the key callbacks are looked up by.
    pub fn to_hex(&self) -> String {
        let digits = hex::encode(&self.bytes);
        let digits = match digits.strip_prefix('0') {
            Some(rest) if self.odd_nibble => rest,
            _ => digits.as_str(),
        };
        format!("0x{}", digits)
    }

    /// Decode hex with an optional `0x` prefix. Odd-length input is padded
    /// with a leading zero nibble.
    pub fn from_hex(input: &str) -> Result<Self, hex::FromHexError> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);

        let odd_nibble = digits.len() % 2 == 1;
        let bytes = if odd_nibble {
            hex::decode(format!("0{}", digits))?
        } else {
            hex::decode(digits)?
        };

        Ok(Self { bytes, odd_nibble })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
}

/// Reactor topic.
///
/// Object topics carry raw address bytes after the `object:` prefix, so a
/// topic is a byte string rather than a `String`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Topic(Vec<u8>);

impl Topic {
    pub const NEW_BLOCK: &'static str = "newBlock";
    const OBJECT_PREFIX: &'static [u8] = b"object:";

    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn new_block() -> Self {
        Self::from(Self::NEW_BLOCK)
    }

    /// `object:` followed by the raw address bytes.
    pub fn object(address: &Address) -> Self {
        let mut bytes = Self::OBJECT_PREFIX.to_vec();
        bytes.extend_from_slice(address.as_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.as_bytes().to_vec())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.strip_prefix(Self::OBJECT_PREFIX) {
            Some(address) => write!(f, "object:0x{}", hex::encode(address)),
            None => f.write_str(&String::from_utf8_lossy(&self.0)),
        }
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self)
    }
}

/// A newly imported block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: Vec<u8>,
    pub parent_hash: Vec<u8>,
    pub coinbase: Address,
    pub timestamp: u64,
}

/// Script-visible view of an account after a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateObjectSnapshot {
    pub address: Address,
    /// Decimal wei amount; balances do not fit the sandbox's integer type.
    pub balance: String,
    pub nonce: u64,
    #[serde(serialize_with = "serialize_hex")]
    pub root: Vec<u8>,
    #[serde(serialize_with = "serialize_hex")]
    pub code_hash: Vec<u8>,
    pub is_contract: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateObjectEvent {
    pub address: Address,
    pub snapshot: StateObjectSnapshot,
}

impl StateObjectEvent {
    pub fn new(snapshot: StateObjectSnapshot) -> Self {
        Self {
            address: snapshot.address.clone(),
            snapshot,
        }
    }
}

/// A single storage slot write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageState {
    pub state_address: Address,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Payload carried by a [`Reaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Block(Block),
    StateObject(StateObjectEvent),
    Storage(StorageState),
}

/// What the reactor hands to a subscriber queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub topic: Topic,
    pub resource: Resource,
}
