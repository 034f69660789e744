//! Engine events
//!
//! Subscribers get record sets; everything else the UI may want to show
//! (a migration finished, a refresh silently failed) goes out on a separate
//! broadcast channel as a [`SyncEvent`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEvent                                                      │
//! │  ├── Refreshed: every subscriber was re-resolved                │
//! │  ├── AuthChanged: the active backend may have switched          │
//! │  ├── Migrated: guest drops moved into the account               │
//! │  └── Error: a failure the caller did not see directly           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::error::{ErrorKind, SyncError};

/// Events emitted by [`crate::SyncDrop`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Subscribers were re-resolved and notified
    Refreshed {
        /// Number of subscribers notified
        subscribers: usize,
    },
    /// The signed-in principal changed
    AuthChanged {
        /// New owner id, `None` when signed out
        owner_id: Option<String>,
    },
    /// Guest drops were copied to the remote store and cleared locally
    Migrated {
        owner_id: String,
        /// Number of drops moved
        count: usize,
    },
    /// A background or swallowed failure
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl SyncEvent {
    pub(crate) fn error(kind: ErrorKind, err: &SyncError) -> Self {
        SyncEvent::Error {
            kind,
            message: err.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SyncEvent::Error { .. })
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::Refreshed { subscribers } => {
                write!(f, "Refreshed ({} subscribers)", subscribers)
            }
            SyncEvent::AuthChanged { owner_id: Some(id) } => write!(f, "Signed in as {}", id),
            SyncEvent::AuthChanged { owner_id: None } => write!(f, "Signed out"),
            SyncEvent::Migrated { owner_id, count } => {
                write!(f, "Migrated {} drops to {}", count, owner_id)
            }
            SyncEvent::Error { kind, message } => write!(f, "{} error: {}", kind, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        assert_eq!(
            SyncEvent::Refreshed { subscribers: 2 }.to_string(),
            "Refreshed (2 subscribers)"
        );
        assert_eq!(SyncEvent::AuthChanged { owner_id: None }.to_string(), "Signed out");
        assert_eq!(
            SyncEvent::Migrated {
                owner_id: "u1".into(),
                count: 3
            }
            .to_string(),
            "Migrated 3 drops to u1"
        );
    }

    #[test]
    fn test_error_event() {
        let err = SyncError::Remote("HTTP 500".into());
        let event = SyncEvent::error(err.read_kind(), &err);
        assert!(event.is_error());
        assert_eq!(event.to_string(), "read error: Remote error: HTTP 500");
    }
}
