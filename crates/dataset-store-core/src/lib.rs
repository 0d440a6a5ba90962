//! Core engine for a versioned time-series dataset store.
//!
//! This crate persists and retrieves named collections of time-ordered
//! numeric columns ("datasets") under strict versioning and metadata rules,
//! while staying agnostic to the physical storage layout:
//!
//! - A closed type system pairing *versioning* (how updates to the same
//!   logical data are represented over time) with *temporality* (what
//!   real-world time a row's dates refer to) (`types` module).
//! - Canonical as-of version identifiers that are exact-round-trip,
//!   lexicographically sortable, and safe as filename fragments and
//!   partition segments (`version` module).
//! - A fixed storage-handler protocol with two interchangeable physical
//!   layouts, single-file-per-version and partitioned-directory
//!   (`handlers` module), resolved by configured name through an injected
//!   registry (`registry` module).
//! - Self-describing Parquet artifacts that embed the dataset's name, type,
//!   and tags in their own schema metadata (`codec` module).
//! - A metadata catalog searchable by name and tags without reading any
//!   data file, and rebuildable from the artifacts alone (`catalog` module).
//! - A per-repository I/O facade orchestrating writes, reads, version
//!   listing, search, re-indexing, and additive archival snapshots
//!   (`repository` and `snapshot` modules).
//!
//! Integration layers (configuration loading, query engines, plotting) are
//! expected to depend on this core crate rather than re-implementing the
//! storage and metadata logic.
#![deny(missing_docs)]
pub mod catalog;
pub mod codec;
pub mod dataset;
pub mod handlers;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod storage;
pub mod tags;
pub mod types;
pub mod version;
