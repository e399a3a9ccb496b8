// src/verify.rs

//! Package integrity gate
//!
//! A package is accepted when its digest equals either the primary or the
//! alternate expected digest. Having neither is a failure: callers that may
//! legitimately skip verification (repository content without digests) must
//! decide that before calling in here.

use crate::error::{Error, Result};
use crate::hash::{self, Hash, HashAlgorithm};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Accepted digests for one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedDigests {
    pub primary: Option<String>,
    pub alternate: Option<String>,
}

impl ExpectedDigests {
    pub fn new(primary: Option<String>, alternate: Option<String>) -> Self {
        Self { primary, alternate }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.alternate.is_none()
    }

    fn candidates(&self) -> impl Iterator<Item = &str> {
        self.primary.iter().chain(self.alternate.iter()).map(String::as_str)
    }
}

/// Verify `data` against the expected digests
///
/// `label` names the package in error messages (usually its path).
pub fn verify_bytes(data: &[u8], expected: &ExpectedDigests, label: &str) -> Result<()> {
    if expected.is_empty() {
        return Err(Error::MissingDigest(label.to_string()));
    }

    let mut parsed = Vec::new();
    for candidate in expected.candidates() {
        let digest = Hash::parse_prefixed(candidate).map_err(|e| {
            Error::ParseError(format!("Invalid expected digest '{}' for {}: {}", candidate, label, e))
        })?;
        parsed.push(digest);
    }

    // Compute each algorithm at most once
    let mut computed: Vec<Hash> = Vec::new();
    for digest in &parsed {
        let actual = match computed.iter().find(|h| h.algorithm == digest.algorithm) {
            Some(actual) => actual.clone(),
            None => {
                let actual = hash::hash_bytes(digest.algorithm, data);
                computed.push(actual.clone());
                actual
            }
        };
        if actual == *digest {
            debug!("Verified {} ({} {})", label, digest.algorithm, digest.value);
            return Ok(());
        }
    }

    let algorithm = parsed
        .first()
        .map(|d| d.algorithm)
        .unwrap_or(HashAlgorithm::Md5);
    let actual = computed
        .into_iter()
        .find(|h| h.algorithm == algorithm)
        .map(|h| h.value)
        .unwrap_or_default();

    Err(Error::VerificationFailed {
        path: label.to_string(),
        expected: expected.primary.clone().unwrap_or_else(|| "none".to_string()),
        expected_alt: expected.alternate.clone(),
        actual,
    })
}

/// Verify a file on disk against the expected digests
pub async fn verify_file(path: &Path, expected: &ExpectedDigests) -> Result<()> {
    let label = path.display().to_string();
    if expected.is_empty() {
        return Err(Error::MissingDigest(label));
    }
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| Error::io(format!("Failed to read {} for verification", label), e))?;
    verify_bytes(&data, expected, &label)
}
