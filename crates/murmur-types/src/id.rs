use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ChatError;

/// Length of the canonical hex form.
pub const OBJECT_ID_HEX_LEN: usize = 24;

/// Opaque 12-byte record identifier, written as 24 lowercase hex characters.
///
/// Layout of freshly allocated ids: 4 bytes of big-endian unix seconds,
/// 5 bytes chosen once per process, 3 bytes of a wrapping counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; 12]);

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

impl ObjectId {
    /// The all-zero id. Validators treat it as absent.
    pub const NIL: ObjectId = ObjectId([0; 12]);

    /// Allocate a fresh id.
    pub fn new() -> Self {
        let secs = chrono::Utc::now().timestamp() as u32;
        let process = PROCESS_UNIQUE.get_or_init(rand::random::<[u8; 5]>);
        let counter = COUNTER
            .get_or_init(|| AtomicU32::new(rand::random::<u32>()))
            .fetch_add(1, Ordering::Relaxed)
            & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Decode a user-supplied string. Anything but exactly 24 hex characters
    /// is rejected.
    pub fn parse_str(s: &str) -> Result<Self, ChatError> {
        if s.len() != OBJECT_ID_HEX_LEN {
            return Err(ChatError::BadInput(format!(
                "the provided hex string is not a valid ObjectID: expected {} characters, got {}",
                OBJECT_ID_HEX_LEN,
                s.len()
            )));
        }

        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| {
            ChatError::BadInput(format!("the provided hex string is not a valid ObjectID: {}", e))
        })?;
        Ok(Self(bytes))
    }

    /// Canonical lowercase form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_hex() {
        let id = ObjectId::parse_str("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        assert_eq!(id.bytes(), [0xaa; 12]);
        assert_eq!(id.to_string(), "aaaaaaaaaaaaaaaaaaaaaaaa");
    }

    #[test]
    fn uppercase_input_is_emitted_lowercase() {
        let id: ObjectId = "65A1B2C3D4E5F60718293A4B".parse().unwrap();
        assert_eq!(id.to_hex(), "65a1b2c3d4e5f60718293a4b");
    }

    #[test]
    fn rejects_wrong_length_and_non_hex() {
        for bad in ["", "zzz", "aaaaaaaaaaaaaaaaaaaaaaa", "aaaaaaaaaaaaaaaaaaaaaaaaa", "gggggggggggggggggggggggg"] {
            let err = ObjectId::parse_str(bad).unwrap_err();
            assert!(matches!(err, ChatError::BadInput(_)), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn fresh_ids_are_distinct_and_never_nil() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        assert!(!a.is_nil());
        assert!(ObjectId::NIL.is_nil());
        assert_eq!(ObjectId::default(), ObjectId::NIL);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ObjectId::parse_str("bbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bbbbbbbbbbbbbbbbbbbbbbbb\"");
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ObjectId>("\"nope\"").is_err());
    }
}
