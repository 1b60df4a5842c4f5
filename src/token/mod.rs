//! Token Management
//!
//! Credential state shared by the acquirer and the request executor.
//!
//! This module provides:
//!
//! - **Token Persistence**: Durable JSON record of both credential slots
//! - **Credential Store**: Authoritative in-memory state with write-through persistence

pub mod persistence;
pub mod store;

pub use persistence::{FileTokenPersistence, InMemoryTokenPersistence, TokenPersistence};
pub use store::{CredentialStore, DEFAULT_REFRESH_THRESHOLD};
