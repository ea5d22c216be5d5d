//! Serde helpers for byte fields the node encodes as hex strings.

use serde::{Deserialize, Deserializer, Serializer};

pub mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
