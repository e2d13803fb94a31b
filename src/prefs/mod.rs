// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Logical preference API: typed reads, transactional writes and change
//! listeners on top of an encrypted backend.

pub mod editor;
pub mod key;
pub mod listeners;
pub mod reserved;
pub mod store;

pub use editor::Editor;
pub use key::PrefKey;
pub use listeners::{ListenerRegistry, StoreListener};
pub use reserved::{ReservedKeySet, KEY_KEYSET_ENTRY, VALUE_KEYSET_ENTRY};
pub use store::EncryptedStore;
