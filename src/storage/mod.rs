// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Raw string-to-string maps that hold a store's encrypted entries.
//!
//! The backend never sees plaintext: keys and values arrive already
//! encrypted and Base64-encoded.
//!
//! ## Backends
//!
//! - [`RedbBackend`] - one redb file per store, `{data_dir}/{name}.redb`
//! - [`MemoryBackend`] - process-local, for tests and ephemeral stores
//!
//! ## Write Semantics
//!
//! A [`WriteBatch`] is applied atomically. Batches become visible to reads
//! in submission order; `commit` blocks until the batch is durable, `apply`
//! returns as soon as it is visible.

pub mod backend;
pub mod memory;
pub mod redb_backend;

pub use backend::{BackendError, BackendResult, PreferenceBackend, WriteBatch};
pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;
