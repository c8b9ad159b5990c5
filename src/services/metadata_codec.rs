//! JSON sidecar codec for bucket and object descriptors.
//!
//! Records are tab-indented so existing stores and hand inspection agree on
//! the format. Timestamps are RFC 3339; any UTC offset is accepted on read.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode metadata record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed metadata record: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(256);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    record
        .serialize(&mut serializer)
        .map_err(CodecError::Encode)?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}
