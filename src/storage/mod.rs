//! Credential storage.
//!
//! This module provides the durable side of the credential lifecycle:
//!
//! - OS keychain integration for secure string storage
//! - The [`CredentialStore`] seam used by the authorization engine, with a
//!   keychain-backed and an in-memory implementation
//! - Async-safe keychain operations via tokio::task::spawn_blocking

mod credentials;
mod keychain;

pub use credentials::{
    CredentialRecord, CredentialStore, KeychainCredentialStore, MemoryCredentialStore,
    PLACEHOLDER_PROFILE_LABEL,
};
pub use keychain::{KeychainAccess, KeychainError};
