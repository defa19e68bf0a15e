// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core pipeline for flakeboard: bundle discovery, test-record extraction,
//! outcome classification, on-disk caching, and the shared result store.
//!
//! The flow is: [`discovery`] finds bundle groups under a root directory;
//! for each group the [`disk_cache`] is consulted first, and on a miss the
//! [`extract`] module turns the group into a [`ResultSet`] (classified by
//! [`classify`]); the [`store`] holds the consistent, concurrently-readable
//! view of everything ingested so far. Reading the bundle format itself is
//! delegated to the [`reader::BundleReader`] capability, implemented
//! elsewhere.
//!
//! [`ResultSet`]: flakeboard_metadata::ResultSet

pub mod classify;
pub mod discovery;
pub mod disk_cache;
pub mod errors;
pub mod extract;
pub mod invocation_cache;
pub mod reader;
pub mod stats;
pub mod store;
