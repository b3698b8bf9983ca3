//! Relay engine state: the processed-message set, the ordered message log, and the
//! per-peer fan-out.

use std::collections::HashSet;

use uuid::Uuid;

use crate::envelope::{self, Envelope, MessageId, MAX_ATTRIBUTE_LEN};
use crate::platform::{PeerAddress, RadioError};
use crate::registry::PeerConnection;

/// Ids of every message this node authored or relayed. Grows for the life of the node.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    ids: HashSet<MessageId>,
}

impl ProcessedSet {
    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Whether an envelope is new to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Fresh,
    Duplicate,
}

/// Processed set plus the raw records in processing order.
#[derive(Debug, Default)]
pub struct RelayState {
    processed: ProcessedSet,
    log: Vec<String>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the envelope processed and log its raw record, unless already seen.
    pub fn admit(&mut self, envelope: &Envelope, raw: &[u8]) -> Admission {
        if !self.processed.insert(envelope.message_id.clone()) {
            return Admission::Duplicate;
        }
        self.log.push(String::from_utf8_lossy(raw).into_owned());
        Admission::Fresh
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.processed.contains(id)
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// Raw records, oldest first.
    pub fn read_all(&self) -> Vec<String> {
        self.log.clone()
    }

    pub fn record_count(&self) -> usize {
        self.log.len()
    }

    pub fn record(&self, index: usize) -> Option<&str> {
        self.log.get(index).map(String::as_str)
    }
}

/// What happened to one inbound record or local post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded {
        message_id: MessageId,
        written: usize,
        failed: usize,
    },
    Duplicate(MessageId),
    Malformed,
}

/// Result of writing one envelope to a set of peers.
#[derive(Debug, Default)]
pub struct FanOut {
    pub written: Vec<PeerAddress>,
    pub failed: Vec<(PeerAddress, RadioError)>,
}

/// Write `envelope` to each target's characteristic. A failing peer does not stop
/// the others. Call without holding the node lock.
pub fn fan_out(targets: &[PeerConnection], characteristic: Uuid, envelope: &Envelope) -> FanOut {
    let mut out = FanOut::default();
    if targets.is_empty() {
        return out;
    }
    let payload = envelope::encode(envelope);
    if payload.len() > MAX_ATTRIBUTE_LEN {
        tracing::warn!(
            message_id = %envelope.message_id,
            len = payload.len(),
            "envelope exceeds one attribute write; peers may truncate it"
        );
    }
    for peer in targets {
        match peer.link.write(characteristic, &payload) {
            Ok(()) => {
                tracing::debug!(address = %peer.address, message_id = %envelope.message_id, "envelope sent");
                out.written.push(peer.address.clone());
            }
            Err(e) => {
                let e = match e {
                    RadioError::PermissionDenied(_) | RadioError::PeerWriteFailed(..) => e,
                    other => RadioError::PeerWriteFailed(peer.address.clone(), other.to_string()),
                };
                out.failed.push((peer.address.clone(), e));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PeerLink;
    use crate::registry::LinkHandle;
    use std::sync::{Arc, Mutex};

    struct RecordingLink {
        fail: bool,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl PeerLink for RecordingLink {
        fn write(&self, _characteristic: Uuid, payload: &[u8]) -> Result<(), RadioError> {
            if self.fail {
                return Err(RadioError::Other("gatt busy".into()));
            }
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
        fn discover_services(&self) -> Result<(), RadioError> {
            Ok(())
        }
        fn close(&self) {}
    }

    fn peer(addr: &str, fail: bool) -> (PeerConnection, Arc<RecordingLink>) {
        let link = Arc::new(RecordingLink {
            fail,
            sent: Mutex::new(Vec::new()),
        });
        (
            PeerConnection::new(addr.into(), None, LinkHandle::new(link.clone())),
            link,
        )
    }

    #[test]
    fn records_are_indexed_in_processing_order() {
        let mut state = RelayState::new();
        assert_eq!(state.record_count(), 0);
        assert_eq!(state.record(0), None);
        let first = Envelope::new("a", "one");
        let second = Envelope::new("b", "two");
        state.admit(&first, &envelope::encode(&first));
        state.admit(&second, &envelope::encode(&second));
        state.admit(&first, &envelope::encode(&first));
        assert_eq!(state.record_count(), 2);
        assert!(state.record(0).unwrap().ends_with(":one"));
        assert!(state.record(1).unwrap().ends_with(":two"));
        assert_eq!(state.record(2), None);
    }

    #[test]
    fn admit_once() {
        let mut state = RelayState::new();
        let e = Envelope::new("a", "hello");
        let raw = envelope::encode(&e);
        assert_eq!(state.admit(&e, &raw), Admission::Fresh);
        assert_eq!(state.admit(&e, &raw), Admission::Duplicate);
        assert_eq!(state.admit(&e.relayed(), &raw), Admission::Duplicate);
        assert_eq!(state.processed().len(), 1);
        assert_eq!(state.read_all(), vec![String::from_utf8(raw).unwrap()]);
    }

    #[test]
    fn log_keeps_processing_order() {
        let mut state = RelayState::new();
        let first = Envelope::new("a", "one");
        let second = Envelope::new("b", "two");
        state.admit(&second, &envelope::encode(&second));
        state.admit(&first, &envelope::encode(&first));
        let log = state.read_all();
        assert!(log[0].ends_with(":two"));
        assert!(log[1].ends_with(":one"));
    }

    #[test]
    fn fan_out_failures_are_independent() {
        let (good_a, link_a) = peer("AA:01", false);
        let (bad, _) = peer("AA:02", true);
        let (good_b, link_b) = peer("AA:03", false);
        let e = Envelope::new("a", "hello");
        let out = fan_out(&[good_a, bad, good_b], Uuid::nil(), &e);
        assert_eq!(out.written.len(), 2);
        assert_eq!(out.failed.len(), 1);
        assert!(matches!(
            &out.failed[0],
            (addr, RadioError::PeerWriteFailed(_, _)) if addr.as_str() == "AA:02"
        ));
        assert_eq!(link_a.sent.lock().unwrap()[0], envelope::encode(&e));
        assert_eq!(link_b.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn fan_out_to_nobody() {
        let out = fan_out(&[], Uuid::nil(), &Envelope::new("a", "x"));
        assert!(out.written.is_empty() && out.failed.is_empty());
    }
}
