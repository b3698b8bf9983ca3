//! Envelope wire record: `<messageId>:<originId>:<timestampMillis>:<hopCount>:<content>`.
//!
//! One envelope per characteristic write, UTF-8, no length prefix. Content is the last
//! field and may contain colons; the origin id is percent-escaped (`%` and `:`) so every
//! envelope survives a round trip.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const FIELD_COUNT: usize = 5;
const SEPARATOR: char = ':';

/// Largest value a single ATT attribute can hold; bigger payloads are not fragmented.
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Origin-assigned message identity, used only for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh random id (UUID v4).
    pub fn generate() -> Self {
        MessageId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ids are the first wire field, so they must be non-empty and colon-free.
impl TryFrom<&str> for MessageId {
    type Error = EnvelopeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err(EnvelopeError::MalformedEnvelope("empty message id"));
        }
        if s.contains(SEPARATOR) {
            return Err(EnvelopeError::MalformedEnvelope("message id contains ':'"));
        }
        Ok(MessageId(s.to_string()))
    }
}

/// One relayable message. `message_id` is only built through `generate`, `TryFrom`
/// or `decode`, so it never holds a separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_id: MessageId,
    pub origin_id: String,
    /// Wall-clock time at origin. Advisory only.
    pub created_at_millis: u64,
    pub hop_count: u32,
    pub content: String,
}

impl Envelope {
    /// Author a new envelope: fresh id, hop count 0, timestamp now.
    pub fn new(origin_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::generate(),
            origin_id: origin_id.into(),
            created_at_millis: now_millis(),
            hop_count: 0,
            content: content.into(),
        }
    }

    /// Copy for forwarding: same id and content, hop count + 1.
    pub fn relayed(&self) -> Self {
        Self {
            hop_count: self.hop_count.saturating_add(1),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),
}

/// Encode an envelope into its wire record.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let mut out = String::with_capacity(
        envelope.message_id.as_str().len() + envelope.origin_id.len() + envelope.content.len() + 32,
    );
    out.push_str(envelope.message_id.as_str());
    out.push(SEPARATOR);
    escape_into(&envelope.origin_id, &mut out);
    out.push(SEPARATOR);
    out.push_str(&envelope.created_at_millis.to_string());
    out.push(SEPARATOR);
    out.push_str(&envelope.hop_count.to_string());
    out.push(SEPARATOR);
    out.push_str(&envelope.content);
    out.into_bytes()
}

/// Decode a wire record. Fails with `MalformedEnvelope` on fewer than five fields,
/// non-integer timestamp or hop count, an empty id, or invalid UTF-8.
pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| EnvelopeError::MalformedEnvelope("not valid UTF-8"))?;
    let fields: Vec<&str> = text.splitn(FIELD_COUNT, SEPARATOR).collect();
    if fields.len() < FIELD_COUNT {
        return Err(EnvelopeError::MalformedEnvelope("fewer than 5 fields"));
    }
    if fields[0].is_empty() {
        return Err(EnvelopeError::MalformedEnvelope("empty message id"));
    }
    let created_at_millis = fields[2]
        .parse::<u64>()
        .map_err(|_| EnvelopeError::MalformedEnvelope("timestamp is not an integer"))?;
    let hop_count = fields[3]
        .parse::<u32>()
        .map_err(|_| EnvelopeError::MalformedEnvelope("hop count is not an integer"))?;
    Ok(Envelope {
        message_id: MessageId(fields[0].to_string()),
        origin_id: unescape(fields[1]),
        created_at_millis,
        hop_count,
        content: fields[4].to_string(),
    })
}

/// Message id of a record without decoding the rest. Only fails when there is no
/// id field at all.
pub fn extract_id(bytes: &[u8]) -> Result<MessageId, EnvelopeError> {
    let end = bytes
        .iter()
        .position(|&b| b == SEPARATOR as u8)
        .ok_or(EnvelopeError::MalformedEnvelope("no field separator"))?;
    if end == 0 {
        return Err(EnvelopeError::MalformedEnvelope("empty message id"));
    }
    let id = std::str::from_utf8(&bytes[..end])
        .map_err(|_| EnvelopeError::MalformedEnvelope("not valid UTF-8"))?;
    Ok(MessageId(id.to_string()))
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
}

// Unknown escapes are kept literally so origin ids from older peers still decode.
fn unescape(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(i) = rest.find('%') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        if tail.starts_with("%25") {
            out.push('%');
            rest = &tail[3..];
        } else if tail.starts_with("%3A") || tail.starts_with("%3a") {
            out.push(':');
            rest = &tail[3..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            message_id: MessageId::try_from("6f1c2a7e-0000-4000-8000-000000000001").unwrap(),
            origin_id: "pixel-7".into(),
            created_at_millis: 1_700_000_000_123,
            hop_count: 2,
            content: "hello".into(),
        }
    }

    #[test]
    fn encodes_documented_layout() {
        let bytes = encode(&sample());
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "6f1c2a7e-0000-4000-8000-000000000001:pixel-7:1700000000123:2:hello"
        );
    }

    #[test]
    fn roundtrip() {
        let e = sample();
        assert_eq!(decode(&encode(&e)).unwrap(), e);
        let fresh = Envelope::new("UnknownDevice", "");
        assert_eq!(decode(&encode(&fresh)).unwrap(), fresh);
    }

    #[test]
    fn colons_in_content_and_origin_survive() {
        let mut e = sample();
        e.content = "meet at 12:30: bring snacks".into();
        e.origin_id = "AA:BB:CC%".into();
        let bytes = encode(&e);
        assert_eq!(decode(&bytes).unwrap(), e);
    }

    #[test]
    fn decodes_records_from_unescaping_peers() {
        let e = decode(b"id-1:ESP32_S3_NimBLE:5:0:50% off").unwrap();
        assert_eq!(e.origin_id, "ESP32_S3_NimBLE");
        assert_eq!(e.content, "50% off");
        let e = decode(b"id-1:100%:5:0:x").unwrap();
        assert_eq!(e.origin_id, "100%");
    }

    #[test]
    fn fewer_than_five_fields_is_malformed() {
        for bad in [&b""[..], b"id", b"id:origin", b"id:origin:1", b"id:origin:1:0"] {
            assert!(matches!(
                decode(bad),
                Err(EnvelopeError::MalformedEnvelope(_))
            ));
        }
    }

    #[test]
    fn non_integer_fields_are_malformed() {
        assert!(decode(b"id:o:soon:0:x").is_err());
        assert!(decode(b"id:o:1:-1:x").is_err());
        assert!(decode(b"id:o:1:one:x").is_err());
        assert!(decode(b":o:1:0:x").is_err());
        assert!(decode(&[0xff, b':', b'o', b':', b'1', b':', b'0', b':', b'x']).is_err());
    }

    #[test]
    fn extract_id_matches_decode() {
        let bytes = encode(&sample());
        assert_eq!(extract_id(&bytes).unwrap(), decode(&bytes).unwrap().message_id);
        assert!(extract_id(b"no-separator").is_err());
        assert!(extract_id(b":o:1:0:x").is_err());
    }

    #[test]
    fn message_ids_reject_separator_and_empty() {
        assert!(MessageId::try_from("").is_err());
        assert!(MessageId::try_from("a:b").is_err());
        let id = MessageId::try_from("abc-1").unwrap();
        let mut e = sample();
        e.message_id = id.clone();
        assert_eq!(decode(&encode(&e)).unwrap().message_id, id);
        assert!(!MessageId::generate().as_str().contains(':'));
    }

    #[test]
    fn relayed_increments_hop_only() {
        let e = sample();
        let r = e.relayed().relayed();
        assert_eq!(r.hop_count, e.hop_count + 2);
        assert_eq!(r.message_id, e.message_id);
        assert_eq!(r.content, e.content);
        assert_eq!(r.origin_id, e.origin_id);
        let mut max = sample();
        max.hop_count = u32::MAX;
        assert_eq!(max.relayed().hop_count, u32::MAX);
    }
}
