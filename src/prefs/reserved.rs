// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage keys holding the store's own (wrapped) keysets.
//!
//! These entries share the backing file with user data but are never
//! visible through, or writable by, the logical API.

/// Entry holding the wrapped key-cipher keyset.
pub const KEY_KEYSET_ENTRY: &str = "__encrypted_prefs_key_keyset__";

/// Entry holding the wrapped value-cipher keyset.
pub const VALUE_KEYSET_ENTRY: &str = "__encrypted_prefs_value_keyset__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedKeySet {
    key_keyset: String,
    value_keyset: String,
}

impl Default for ReservedKeySet {
    fn default() -> Self {
        Self::new(KEY_KEYSET_ENTRY, VALUE_KEYSET_ENTRY)
    }
}

impl ReservedKeySet {
    pub fn new(key_keyset: impl Into<String>, value_keyset: impl Into<String>) -> Self {
        Self {
            key_keyset: key_keyset.into(),
            value_keyset: value_keyset.into(),
        }
    }

    pub fn key_keyset(&self) -> &str {
        &self.key_keyset
    }

    pub fn value_keyset(&self) -> &str {
        &self.value_keyset
    }

    pub fn contains(&self, key: &str) -> bool {
        key == self.key_keyset || key == self.value_keyset
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [self.key_keyset.as_str(), self.value_keyset.as_str()].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_contains_both_entries() {
        let reserved = ReservedKeySet::default();
        assert!(reserved.contains(KEY_KEYSET_ENTRY));
        assert!(reserved.contains(VALUE_KEYSET_ENTRY));
        assert!(!reserved.contains("__encrypted_prefs__"));
        assert_eq!(reserved.iter().count(), 2);
    }
}
