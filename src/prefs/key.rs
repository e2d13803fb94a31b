// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::codec::NULL_VALUE;

/// A logical key. The null key is a valid, distinct key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefKey<'a>(Option<&'a str>);

impl<'a> PrefKey<'a> {
    pub const NULL: PrefKey<'static> = PrefKey(None);

    pub fn as_str(&self) -> Option<&'a str> {
        self.0
    }

    pub fn to_owned_key(self) -> Option<String> {
        self.0.map(str::to_string)
    }

    /// Text that is actually encrypted; the null key maps to a sentinel.
    pub(crate) fn plaintext(&self) -> &'a str {
        self.0.unwrap_or(NULL_VALUE)
    }
}

impl<'a> From<&'a str> for PrefKey<'a> {
    fn from(key: &'a str) -> Self {
        PrefKey(Some(key))
    }
}

impl<'a> From<&'a String> for PrefKey<'a> {
    fn from(key: &'a String) -> Self {
        PrefKey(Some(key.as_str()))
    }
}

impl<'a> From<Option<&'a str>> for PrefKey<'a> {
    fn from(key: Option<&'a str>) -> Self {
        PrefKey(key)
    }
}

/// Inverse of [`PrefKey::plaintext`].
pub(crate) fn from_plaintext(plaintext: String) -> Option<String> {
    if plaintext == NULL_VALUE {
        None
    } else {
        Some(plaintext)
    }
}
