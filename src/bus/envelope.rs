use crate::status::StatusUpdate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Closed set of message categories carried over a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Worker,
    Test,
    Build,
    Shutdown,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Worker => "worker",
            Scope::Test => "test",
            Scope::Build => "build",
            Scope::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scope-tagged message as it travels between processes.
///
/// On the wire the scope is a `scope` field flattened next to the payload:
/// `{"scope":"worker","type":"spawned","workerId":0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Envelope {
    Worker(WorkerMessage),
    Test(StatusUpdate),
    #[serde(alias = "webpack")]
    Build(BuildMessage),
    Shutdown(ShutdownMessage),
}

impl Envelope {
    pub fn scope(&self) -> Scope {
        match self {
            Envelope::Worker(_) => Scope::Worker,
            Envelope::Test(_) => Scope::Test,
            Envelope::Build(_) => Scope::Build,
            Envelope::Shutdown(_) => Scope::Shutdown,
        }
    }

    pub fn to_value(&self) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("failed to encode {} message: {}", self.scope(), e);
                None
            }
        }
    }

    /// Decode a raw inbound message. Missing, unknown or malformed scopes
    /// yield `None`.
    pub fn decode(raw: Value) -> Option<Envelope> {
        match serde_json::from_value(raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                log::trace!("dropping undecodable message: {}", e);
                None
            }
        }
    }
}

/// Worker process lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    #[serde(rename_all = "camelCase")]
    Spawned {
        worker_id: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Exited {
        worker_id: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
    #[serde(rename_all = "camelCase")]
    Crashed { worker_id: usize, reason: String },
}

/// Bundle/compile progress of the stories under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BuildMessage {
    Started,
    Progress {
        percent: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Success,
    Failed {
        error: String,
    },
}

/// Graceful termination request. Carries no payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownMessage {}
