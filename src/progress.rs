//! Per-file progress checkpoints and the registry event vocabulary.
//!
//! Every stage boundary of a conversion task maps to a fixed [`Checkpoint`].
//! The registry stores one integer percent per file and broadcasts a
//! [`RegistryEvent`] whenever it changes, so a progress bar, a log sink or a
//! test can subscribe instead of polling.
//!
//! # Example
//!
//! ```rust
//! use heicpress::{Checkpoint, Registry, RegistryEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = Registry::new();
//! let mut events = registry.subscribe();
//! registry.remove_all().unwrap();
//! assert!(matches!(events.recv().await, Ok(RegistryEvent::Cleared)));
//! assert_eq!(Checkpoint::Decoded.percent(), 60);
//! # }
//! ```

use crate::config::OutputKind;
use crate::registry::FileId;
use serde::{Deserialize, Serialize};

/// Highest percent a task may report before it is emitted.
pub const MAX_IN_FLIGHT_PERCENT: u8 = 99;

/// Stage boundaries a task passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Checkpoint {
    Enqueued,
    BytesRead,
    DecodeStarted,
    Decoded,
    Transformed,
    Encoded,
    Emitted,
}

impl Checkpoint {
    pub fn percent(self) -> u8 {
        match self {
            Checkpoint::Enqueued => 1,
            Checkpoint::BytesRead => 20,
            Checkpoint::DecodeStarted => 40,
            Checkpoint::Decoded => 60,
            Checkpoint::Transformed => 70,
            Checkpoint::Encoded => 90,
            Checkpoint::Emitted => 100,
        }
    }
}

/// State change broadcast by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    FileAdded {
        id: FileId,
        name: String,
        route: OutputKind,
    },
    FileRemoved {
        id: FileId,
    },
    Cleared,
    RouteChanged {
        id: FileId,
        route: OutputKind,
    },
    Progress {
        id: FileId,
        percent: u8,
    },
    TaskFailed {
        id: Option<FileId>,
        message: String,
    },
    ArtifactEmitted {
        name: String,
        kind: OutputKind,
        sources: Vec<FileId>,
    },
    BatchStarted {
        tasks: usize,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
    },
}

/// Point-in-time view of one registered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: FileId,
    pub name: String,
    pub route: OutputKind,
    pub percent: u8,
    pub failure: Option<String>,
}

impl ProgressEntry {
    /// Settled entries are either emitted or terminally failed.
    pub fn is_settled(&self) -> bool {
        self.percent == Checkpoint::Emitted.percent() || self.failure.is_some()
    }
}
