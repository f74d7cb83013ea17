//! Locally observed package state
//!
//! Answers installed/outdated/version questions from a TTL-gated cache fed
//! by package manager queries, so interactive commands do not pay for a
//! subprocess round trip on every lookup.

pub mod cache;
pub mod query;

pub use cache::{CacheSettings, CacheSnapshot, PackageInfo, PackageState, PackageStateCache};
pub use query::VersionInfo;
