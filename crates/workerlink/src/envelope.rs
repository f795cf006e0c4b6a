//! # Envelope
//!
//! The unit of transport: `{tag, id, payload}` encoded as a wirepack map of
//! three named fields. The payload is opaque bytes.
//!
//! ## Invariants
//! - `decode(encode(t, i, p)) == (t, i, p)`.
//! - Decoding never panics; any missing, duplicated, or mistyped field is
//!   `MalformedEnvelope`. Unknown fields are skipped.

use std::borrow::Borrow;
use std::sync::Arc;

use wirepack::Decoder;
use wirepack::Encoder;

use crate::error::Error;
use crate::error::Result;

/// Identifies one logical exchange, unique within its tag.
pub type CorrelationId = u64;

/// The id of the only handler for a tag, the first auto-allocated id, and the
/// slot used by the startup handshake.
pub const INIT_ID: CorrelationId = 0;

/// Sent exactly once by the worker, at `INIT_ID`, once it is initialized.
pub const READY_TAG: &str = "Ready";

/// An opaque message kind. Tags partition the id space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(Arc<str>);

impl Tag {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The reserved readiness tag.
    pub fn ready() -> Self {
        Self::new(READY_TAG)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&Tag> for Tag {
    fn from(t: &Tag) -> Self {
        t.clone()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub tag: Tag,
    pub id: CorrelationId,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(tag: impl Into<Tag>, id: CorrelationId, payload: impl Into<Vec<u8>>) -> Self {
        Self { tag: tag.into(), id, payload: payload.into() }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.tag.as_str(), self.id, &self.payload)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Encodes an envelope without building an owned `Envelope` first.
pub fn encode(tag: &str, id: CorrelationId, payload: &[u8]) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.field_str("tag", tag)?;
    enc.field_u64("id", id)?;
    enc.field_bytes("payload", payload)?;
    enc.map_end()?;
    Ok(enc.into_bytes()?)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let mut dec = Decoder::new(bytes);
    let mut map = dec.map().map_err(malformed)?;
    dec.finish().map_err(malformed)?;

    let mut tag = None;
    let mut id = None;
    let mut payload = None;

    while let Some((key, mut val)) = map.next().map_err(malformed)? {
        let duplicate = match key {
            "tag" => tag.replace(val.str().map_err(malformed)?).is_some(),
            "id" => id.replace(val.u64().map_err(malformed)?).is_some(),
            "payload" => payload.replace(val.bytes().map_err(malformed)?).is_some(),
            _ => {
                val.skip().map_err(malformed)?;
                false
            }
        };
        if duplicate {
            return Err(Error::MalformedEnvelope(format!("duplicate field {:?}", key)));
        }
        val.finish().map_err(malformed)?;
    }

    Ok(Envelope {
        tag: Tag::from(tag.ok_or_else(|| missing("tag"))?),
        id: id.ok_or_else(|| missing("id"))?,
        payload: payload.ok_or_else(|| missing("payload"))?.to_vec(),
    })
}

fn malformed(e: wirepack::Error) -> Error {
    Error::MalformedEnvelope(e.to_string())
}

fn missing(field: &str) -> Error {
    Error::MalformedEnvelope(format!("missing field {:?}", field))
}
