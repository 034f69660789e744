//! Authentication collaborator
//!
//! The core only needs to know who, if anyone, is signed in, and to be told
//! when that changes. Providers publish the current principal through a
//! `tokio::sync::watch` channel, which hands every new receiver the current
//! value straight away.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// An authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Owner id used to partition remote rows
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.email {
            Some(email) => write!(f, "{} <{}>", self.id, email),
            None => f.write_str(&self.id),
        }
    }
}

/// Source of the current principal
pub trait AuthProvider: Send + Sync {
    fn current_principal(&self) -> Option<Principal>;

    /// Receiver that yields the current principal now and after every change.
    fn watch(&self) -> watch::Receiver<Option<Principal>>;
}

/// Where the user stands, as the UI needs to distinguish it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Authenticated(Principal),
    /// No principal, and the user chose to continue without an account
    Guest,
    /// No principal and no decision yet
    Unknown,
}

impl AuthState {
    pub fn resolve(principal: Option<Principal>, guest: bool) -> Self {
        match principal {
            Some(p) => AuthState::Authenticated(p),
            None if guest => AuthState::Guest,
            None => AuthState::Unknown,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            AuthState::Authenticated(p) => Some(p),
            AuthState::Guest | AuthState::Unknown => None,
        }
    }
}

/// A provider whose session is set directly by the host application.
pub struct SessionAuth {
    tx: watch::Sender<Option<Principal>>,
}

impl SessionAuth {
    /// Start signed out
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Start with `principal` already signed in
    pub fn signed_in(principal: Principal) -> Self {
        let (tx, _) = watch::channel(Some(principal));
        Self { tx }
    }

    pub fn sign_in(&self, principal: Principal) {
        info!(principal = %principal, "Signed in");
        self.tx.send_replace(Some(principal));
    }

    pub fn sign_out(&self) {
        info!("Signed out");
        self.tx.send_replace(None);
    }
}

impl Default for SessionAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for SessionAuth {
    fn current_principal(&self) -> Option<Principal> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Principal>> {
        self.tx.subscribe()
    }
}
