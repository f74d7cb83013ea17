//! Local mirror of the upstream formula catalog
//!
//! The upstream JSON array is fetched conditionally, reduced to the fields
//! keg needs, gzipped, and stored atomically next to its metadata. Everything
//! here is blocking; async callers go through `spawn_blocking`.

pub mod builder;
pub mod fetch;
pub mod index;
pub mod scheduler;
pub mod store;
pub mod types;

pub use builder::{build_catalog, maybe_gunzip};
pub use fetch::{BodyLimitExceeded, CappedBody, FetchResponse, Fetcher, HttpFetcher};
pub use index::{CatalogIndex, SearchOptions};
pub use scheduler::{RefreshOutcome, RefreshScheduler, SchedulerSettings};
pub use store::{CatalogMeta, CatalogStore, HotIndex, IndexReader, OpenedIndex};
pub use types::{BuildOutput, CatalogItem, SCHEMA_VERSION};
