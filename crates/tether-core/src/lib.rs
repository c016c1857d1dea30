//! Tether Core — domain models, repository trait definitions, guest-id
//! canonicalization, and the shared error type.
//!
//! This crate has no I/O. Storage implementations live in `tether-db`;
//! reconciliation and pool-quantity logic live in `tether-engine`.

pub mod error;
pub mod models;
pub mod repository;
pub mod virt;

pub use error::{TetherError, TetherResult};
