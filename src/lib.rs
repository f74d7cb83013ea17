//! keg - Homebrew package state cache and formula catalog mirror
//!
//! Keeps a TTL-gated view of what is installed and outdated, and a local,
//! conditionally refreshed copy of the formula catalog for fast search.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod runner;
pub mod state;
pub mod ui;

pub use error::{KegError, KegResult};
