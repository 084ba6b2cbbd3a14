//! Shared display state and partial updates

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open, feature-specific records keyed by an identifier (token id, system name, ...)
pub type ExtensionMap = BTreeMap<String, Value>;

/// Position of a state in the store's history.
///
/// A reset starts a new epoch and restarts `version` at 0, so the same
/// version number can recur; ordering is by epoch first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub epoch: u64,
    pub version: u64,
}

/// The single authoritative document every display client mirrors.
///
/// `version` starts at 0 and is bumped by the store on every applied
/// update, so clients can order snapshots without trusting arrival order.
/// `epoch` counts resets of the owning store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    #[serde(default)]
    pub epoch: u64,
    #[serde(default)]
    pub version: u64,

    pub view_type: String,
    #[serde(default)]
    pub location_slug: String,
    #[serde(default)]
    pub view_slug: String,
    #[serde(default)]
    pub overlay_location_slug: String,
    #[serde(default)]
    pub overlay_terminal_slug: String,

    pub charon_mode: String,
    #[serde(default)]
    pub charon_location_path: String,
    #[serde(default)]
    pub charon_dialog_open: bool,
    pub charon_active_channel: String,

    pub encounter_level: u32,
    #[serde(default)]
    pub encounter_deck_id: String,
    /// Room id -> visible to players
    #[serde(default)]
    pub encounter_room_visibility: BTreeMap<String, bool>,
    /// Door id -> status label (OPEN, CLOSED, LOCKED, ...)
    #[serde(default)]
    pub encounter_door_status: BTreeMap<String, String>,
    /// Token id -> positional record
    #[serde(default)]
    pub encounter_tokens: ExtensionMap,
    #[serde(default)]
    pub encounter_active_portraits: Vec<String>,
    #[serde(default)]
    pub ship_system_overrides: ExtensionMap,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            epoch: 0,
            version: 0,
            view_type: "STANDBY".to_string(),
            location_slug: String::new(),
            view_slug: String::new(),
            overlay_location_slug: String::new(),
            overlay_terminal_slug: String::new(),
            charon_mode: "DISPLAY".to_string(),
            charon_location_path: String::new(),
            charon_dialog_open: false,
            charon_active_channel: "story".to_string(),
            encounter_level: 1,
            encounter_deck_id: String::new(),
            encounter_room_visibility: BTreeMap::new(),
            encounter_door_status: BTreeMap::new(),
            encounter_tokens: BTreeMap::new(),
            encounter_active_portraits: Vec::new(),
            ship_system_overrides: BTreeMap::new(),
        }
    }
}

impl SharedState {
    pub fn revision(&self) -> Revision {
        Revision {
            epoch: self.epoch,
            version: self.version,
        }
    }

    /// Merge a partial update into this state.
    ///
    /// Every field named in the patch replaces the current value wholesale;
    /// maps are not merged key by key. Returns true if any field was named.
    pub fn apply(&mut self, patch: StatePatch) -> bool {
        let mut touched = false;

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = patch.$field {
                        self.$field = value;
                        touched = true;
                    }
                )*
            };
        }

        merge!(
            view_type,
            location_slug,
            view_slug,
            overlay_location_slug,
            overlay_terminal_slug,
            charon_mode,
            charon_location_path,
            charon_dialog_open,
            charon_active_channel,
            encounter_level,
            encounter_deck_id,
            encounter_room_visibility,
            encounter_door_status,
            encounter_tokens,
            encounter_active_portraits,
            ship_system_overrides,
        );

        touched
    }
}

/// A delta: any subset of the known fields. `epoch` and `version` are owned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_location_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_terminal_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charon_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charon_location_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charon_dialog_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charon_active_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_deck_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_room_visibility: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_door_status: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_tokens: Option<ExtensionMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_active_portraits: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ship_system_overrides: Option<ExtensionMap>,
}

impl StatePatch {
    /// Patch that only switches the active view
    pub fn view(view_type: impl Into<String>) -> Self {
        Self {
            view_type: Some(view_type.into()),
            ..Self::default()
        }
    }

    /// Check if the patch names no fields
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
