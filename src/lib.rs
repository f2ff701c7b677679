//! # datawatch
//!
//! A versioned, delta-diff content store plus a cooperative fetch
//! scheduler for polling web resources over time.
//!
//! ## Architecture
//!
//! - `methods`: the codec registry (hashing, binary diff, key encoding,
//!   version sharding) that every chunk's header names by identifier.
//! - `filenames`: the bijective mapping between a chunk's logical
//!   identity and its on-disk path.
//! - `storage`: a namespace of chunks with list/read/write and atomic
//!   publish, backed by a local directory or an in-memory map.
//! - `datadiff`: the storage engine itself -- incarnations, entries, and
//!   collections of entries sharing one storage backend.
//! - `scheduling`: a single-threaded, priority-queue task scheduler with
//!   fuzzed global rate limiting.
//! - `fetcher`: the crawler built on top of `scheduling` and `datadiff`,
//!   polling targets and discovering new ones by following links.

#![warn(missing_docs)]

pub mod datadiff;
pub mod fetcher;
pub mod filenames;
pub mod methods;
pub mod scheduling;
pub mod storage;

pub use datadiff::{Collection, DatadiffError, Entry, Incarnation};
pub use methods::Codecs;

/// This crate's own version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// This crate's own package name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
