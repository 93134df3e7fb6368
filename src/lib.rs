//! inbox-pilot - credential, sync and reply-draft core for an AI-assisted
//! inbox
//!
//! This crate authenticates one user against the mail provider (PKCE with a
//! loopback redirect, or a delegated popup token), keeps a snapshot of recent
//! inbox messages fresh, enriches each message with structured insights and
//! manages the reply draft lifecycle, recovering from credential expiry
//! through a single gateway.

pub mod app;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod services;
pub mod storage;

pub use app::App;
pub use error::{Error, Result};
