//! SyncDrop Core Library
//!
//! Local-first capture of text, links, snippets and files, with optional
//! sync to a hosted table once the user signs in.
//!
//! ## Overview
//!
//! A "drop" is anything the user threw into the app. Drops live in one of a
//! few fixed collections and can be trashed, restored or purged. Without an
//! account every drop stays in an on-device redb database and every write is
//! announced to the other contexts (windows, tabs) on the device. After sign
//! in the same operations run against the owner's rows in a remote store,
//! and the guest drops are migrated there once.
//!
//! ## Core Principles
//!
//! - **Local-first**: Works fully offline as a guest
//! - **One choke point**: Every read and write goes through [`SyncDrop`]
//! - **Per-view subscribers**: Each subscriber sees its own collection
//!
//! ## Quick Start
//!
//! ```ignore
//! use syncdrop_core::{Classifier, CollectionFilter, SyncConfig, SyncDrop};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SyncDrop::open(SyncConfig::default()).await?;
//!
//!     let drop = Classifier::offline()
//!         .classify("https://example.com", None)
//!         .await
//!         .into_drop("https://example.com");
//!     engine.add_drop(drop).await?;
//!
//!     for drop in engine.list(CollectionFilter::All).await? {
//!         println!("{} [{}] {}", drop.id, drop.collection_id, drop.content);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
mod backend;
pub mod classify;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod notifier;
pub mod remote;
pub mod storage;
pub mod types;

// Re-exports
pub use auth::{AuthProvider, AuthState, Principal, SessionAuth};
pub use classify::{Classification, Classifier, ClassifierBackend};
pub use config::{RemoteConfig, SyncConfig};
pub use device::{DeviceId, DeviceIdentity};
pub use engine::{DropsCallback, Subscription, SyncDrop, SyncDropBuilder};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use events::SyncEvent;
pub use notifier::{ChannelHub, ContextId, Notifier};
pub use remote::{DropRow, MemoryRemote, RemoteStore, RestRemote};
pub use storage::{LazyLocalStore, LocalStore};
pub use types::*;
