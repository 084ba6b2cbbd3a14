//! Events carried from the state store to display clients

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Revision, SharedState};

/// Whether an event is the first full picture on a connection or a change notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Snapshot,
    Update,
}

impl EventKind {
    /// SSE `event:` name for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Snapshot => "snapshot",
            EventKind::Update => "update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(EventKind::Snapshot),
            "update" => Ok(EventKind::Update),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// Immutable in-flight event with a pre-serialized state payload.
///
/// The payload is serialized once at construction and shared between
/// every mailbox it lands in.
#[derive(Clone, Debug)]
pub struct StateEvent {
    pub kind: EventKind,
    /// Store epoch of the state carried in `payload`
    pub epoch: u64,
    /// Version of the state carried in `payload`
    pub version: u64,
    /// Unix timestamp (milliseconds) when the event was built
    pub published_at: i64,
    pub payload: Arc<str>,
}

impl StateEvent {
    /// Build an event carrying a full copy of `state`
    pub fn new(kind: EventKind, state: &SharedState) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_string(state)?;
        Ok(Self {
            kind,
            epoch: state.epoch,
            version: state.version,
            published_at: chrono::Utc::now().timestamp_millis(),
            payload: Arc::from(payload),
        })
    }

    pub fn snapshot(state: &SharedState) -> Result<Self, serde_json::Error> {
        Self::new(EventKind::Snapshot, state)
    }

    pub fn update(state: &SharedState) -> Result<Self, serde_json::Error> {
        Self::new(EventKind::Update, state)
    }

    pub fn revision(&self) -> Revision {
        Revision {
            epoch: self.epoch,
            version: self.version,
        }
    }

    /// Decode the payload back into a state document
    pub fn decode_state(&self) -> Result<SharedState, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::Snapshot.as_str(), "snapshot");
        assert_eq!(EventKind::Update.to_string(), "update");
        assert_eq!("snapshot".parse::<EventKind>().unwrap(), EventKind::Snapshot);
        assert!("activeview".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_payload_carries_full_state() {
        let mut state = SharedState::default();
        state.version = 4;
        state.view_type = "BRIDGE".to_string();

        let event = StateEvent::update(&state).unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.version, 4);
        assert_eq!(event.revision(), state.revision());
        assert!(event.payload.contains("\"view_type\":\"BRIDGE\""));
        assert!(event.payload.contains("\"charon_active_channel\":\"story\""));
        assert_eq!(event.decode_state().unwrap(), state);
    }
}
