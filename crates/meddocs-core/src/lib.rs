//! Core types and trait definitions for the MedDocs record store.
//!
//! This crate is deliberately free of database and filesystem dependencies.
//! All other crates depend on it; the SQLite backend, the repository facade
//! and the backup engine are layered on top of the traits defined here.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod codec;
pub mod error;
pub mod file;
pub mod memory;
pub mod patient;
pub mod recycle;
pub mod schedule;
pub mod settings;
pub mod store;

pub use error::{Error, Result};
