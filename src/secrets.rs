// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Secret material
//!
//! Secrets are opaque byte blobs that live exactly as long as the run that
//! received them. They never appear in `Debug` output, and their buffers are
//! overwritten with zeros when dropped.

use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Placeholder used when secret values are masked in captured output
pub const MASK: &str = "***";

/// Masking ignores values this short; they would redact unrelated text.
const MIN_MASKED_LEN: usize = 3;

/// An owned secret payload
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBlob {
    bytes: Vec<u8>,
}

impl SecretBlob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// View the payload as UTF-8, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Empty or whitespace-only payloads count as absent
    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(u8::is_ascii_whitespace)
    }
}

impl fmt::Debug for SecretBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBlob({})", MASK)
    }
}

impl From<String> for SecretBlob {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&str> for SecretBlob {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

/// Opaque reference to a secret that was supplied to the run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretHandle(String);

impl SecretHandle {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The secrets supplied to a single run
#[derive(Default)]
pub struct SecretVault {
    blobs: BTreeMap<String, SecretBlob>,
    /// Decoded forms of supplied secrets, masked but never exposed
    derived: Vec<SecretBlob>,
}

impl SecretVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret, replacing any earlier value under the same name
    pub fn insert(&mut self, name: impl Into<String>, blob: impl Into<SecretBlob>) {
        self.blobs.insert(name.into(), blob.into());
    }

    pub fn with(mut self, name: impl Into<String>, blob: impl Into<SecretBlob>) -> Self {
        self.insert(name, blob);
        self
    }

    /// Whether a usable (non-empty) value was supplied
    pub fn is_present(&self, name: &str) -> bool {
        self.blobs.get(name).is_some_and(|blob| !blob.is_empty())
    }

    /// Handle for a present secret
    pub fn handle(&self, name: &str) -> Option<SecretHandle> {
        self.is_present(name).then(|| SecretHandle(name.to_string()))
    }

    /// Handles for every present secret, in name order
    pub fn handles(&self) -> Vec<SecretHandle> {
        self.blobs
            .iter()
            .filter(|(_, blob)| !blob.is_empty())
            .map(|(name, _)| SecretHandle(name.clone()))
            .collect()
    }

    /// Borrow the payload behind a handle
    pub fn expose(&self, handle: &SecretHandle) -> Option<&SecretBlob> {
        self.blobs.get(handle.name()).filter(|blob| !blob.is_empty())
    }

    /// Borrow a payload by name
    pub fn get(&self, name: &str) -> Option<&SecretBlob> {
        self.blobs.get(name).filter(|blob| !blob.is_empty())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Also mask a decoded form of a secret
    ///
    /// Text payloads are masked whole, line by line, and by the value of
    /// each `key=value` or `key: value` line. Binary payloads are ignored.
    pub fn mask_decoded(&mut self, payload: &[u8]) {
        let Ok(text) = std::str::from_utf8(payload) else {
            return;
        };

        let mut candidates = vec![text.trim()];
        for line in text.lines().map(str::trim) {
            candidates.push(line);
            if let Some((_, value)) = line.split_once('=').or_else(|| line.split_once(':')) {
                candidates.push(value.trim());
            }
        }

        for candidate in candidates {
            if candidate.len() >= MIN_MASKED_LEN
                && !self.derived.iter().any(|d| d.expose() == candidate.as_bytes())
            {
                self.derived.push(SecretBlob::from(candidate));
            }
        }
    }

    /// Replace every secret value occurring in `text` with the mask
    pub fn mask(&self, text: &str) -> String {
        let mut candidates: Vec<&str> = self
            .blobs
            .values()
            .chain(&self.derived)
            .filter_map(SecretBlob::as_str)
            .flat_map(|value| [value, value.trim()])
            .filter(|candidate| candidate.len() >= MIN_MASKED_LEN)
            .collect();
        // Longest first, so a value is never left half-masked by one of its parts.
        candidates.sort_by(|a, b| b.len().cmp(&a.len()));
        candidates.dedup();

        let mut masked = text.to_string();
        for candidate in candidates {
            if masked.contains(candidate) {
                masked = masked.replace(candidate, MASK);
            }
        }
        masked
    }

    /// Drop and wipe every secret
    pub fn clear(&mut self) {
        self.blobs.clear();
        self.derived.clear();
    }
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVault")
            .field("names", &self.blobs.keys().collect::<Vec<_>>())
            .finish()
    }
}
