//! DART Common Library
//!
//! This crate provides the shared data model, configuration loading and
//! wire formats for all DART workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - TOML configuration loading and validation
//! - [`consts`] - System-wide numeric limits and defaults
//! - [`error`] - Runtime error taxonomy shared by core and adapter
//! - [`state`] - Vehicle state, trajectory and command types
//! - [`vehicle`] - Immutable physical vehicle parameters
//! - [`wire`] - Little-endian link message codecs
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod state;
pub mod vehicle;
pub mod wire;
