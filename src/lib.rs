//! stmt-runner - run a batch of SQL statements and get back a bounded,
//! text-typed result table.
//!
//! This library exposes the core modules for use by the binary and in
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod query;
