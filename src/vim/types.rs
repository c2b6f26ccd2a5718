//! Data types exchanged with the management API.
//!
//! Only the handful of shapes the learnswitch workflow touches are modeled;
//! everything else in a response is ignored by the parsers in `client`.
use serde::Serialize;
use std::fmt;

/// Handle to a remote managed object: its type name and server-side id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedObjectRef {
    pub kind: String,
    pub value: String,
}

impl ManagedObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Entry points returned by `RetrieveServiceContent`.
#[derive(Debug, Clone)]
pub struct ServiceContent {
    pub root_folder: ManagedObjectRef,
    pub property_collector: ManagedObjectRef,
    pub search_index: ManagedObjectRef,
    pub session_manager: ManagedObjectRef,
    pub dv_switch_manager: ManagedObjectRef,
}

/// A single property value from `RetrieveProperties`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    Ref(ManagedObjectRef),
    Refs(Vec<ManagedObjectRef>),
    /// A `LocalizedMethodFault`, reduced to its message.
    Fault(String),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_refs(&self) -> Option<&[ManagedObjectRef]> {
        match self {
            PropertyValue::Refs(refs) => Some(refs),
            PropertyValue::Ref(single) => Some(std::slice::from_ref(single)),
            _ => None,
        }
    }
}

/// Which objects an opaque-data fetch or update applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The DVS membership of one host.
    Host {
        dvs_uuid: String,
        host: ManagedObjectRef,
    },
    /// One port group of the DVS, addressed by its key.
    Portgroup {
        dvs_uuid: String,
        portgroup_key: String,
    },
}

/// A key with its raw opaque value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl OpaqueEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Value rendered for humans; opaque values are expected to be text.
    pub fn display_value(&self) -> String {
        String::from_utf8_lossy(&self.value).to_string()
    }
}

/// Operation requested by an opaque-data config spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of `UpdateOpaqueDataEx_Task`'s spec list.
#[derive(Debug, Clone)]
pub struct OpaqueDataSpec {
    pub operation: Action,
    pub entry: OpaqueEntry,
    /// `Some(flag)` sends the inherited-data variant used for port groups.
    pub inherited: Option<bool>,
}

/// Lifecycle of a remote task as reported by `info.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "queued" => Some(TaskState::Queued),
            "running" => Some(TaskState::Running),
            "success" => Some(TaskState::Success),
            "error" => Some(TaskState::Error),
            _ => None,
        }
    }
}
