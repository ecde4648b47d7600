//! FLIPPER: Grand Exchange flipping assistant
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod prices;
pub mod engine;
pub mod export;
pub mod dashboard;
