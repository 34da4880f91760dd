//! Stable binary encoding for wire payloads.
//!
//! `bincode` gives length-delimited records "for free" over `serde`-derived
//! types, which is all the gossip collaborator needs: it treats the
//! result as opaque bytes, we never inspect its own wire format.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MetaPayload;
    use corelib::WireNode;

    #[test]
    fn round_trips_meta_payload() {
        let payload = MetaPayload(WireNode::empty("A", "127.0.0.1:4000"));
        let bytes = encode(&payload).unwrap();
        let decoded: MetaPayload = decode(&bytes).unwrap();
        assert_eq!(decoded.0.name, "A");
    }
}
