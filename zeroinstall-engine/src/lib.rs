#![deny(missing_docs)]

//! # zeroinstall-engine
//!
//! The core engine of a Zero Install injector: caches feeds, solves a set
//! of interface requirements down to one implementation per interface,
//! fetches and verifies whatever the store doesn't have yet, and deploys
//! the result. This crate owns no CLI, GUI, or desktop integration —
//! those are an embedding application's job, driven through [`Handler`]
//! and the public functions each module exposes.
//!
//! Module map, in dependency order:
//! - [`errors`] — the crate's error type and `Result` alias.
//! - [`config`] — user-level network/freshness/sync settings.
//! - [`handler`] — the progress/confirmation/cancellation surface an
//!   embedding application implements.
//! - [`net`] — shared `reqwest` client construction.
//! - [`diagnostics`] — `tracing` subscriber setup.
//! - [`manifest_builder`] — hashes a directory tree into a `Manifest`.
//! - [`store`] — the content-addressed implementation cache.
//! - [`archive`] — unpacks downloaded archive bytes onto disk.
//! - [`trust`] — OpenPGP signature verification and key fetching.
//! - [`feed_cache`] — on-disk feed cache plus trusted-signature records.
//! - [`solver`] — picks one implementation per interface.
//! - [`fetcher`] — downloads/builds whatever the solver chose but the
//!   store doesn't have.
//! - [`deployment`] — presents solved selections to callers and performs
//!   atomic directory install/removal.
//! - [`peer_responder`] — serves this instance's store to peers found by
//!   `zeroinstall_native::PeerDiscovery`.

pub mod archive;
pub mod config;
pub mod deployment;
pub mod diagnostics;
pub mod errors;
pub mod feed_cache;
pub mod fetcher;
pub mod handler;
pub mod manifest_builder;
pub mod net;
pub mod peer_responder;
pub mod solver;
pub mod store;
pub mod trust;

pub use errors::{EngineError, Result};
pub use handler::{CancellationToken, Handler, SilentHandler};
