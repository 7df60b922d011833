//! Change detection for the option-chain payload
//!
//! A fingerprint is the SHA-256 of the dataset's JSON serialization. Row
//! order is significant; key order inside a row is not, because rows are
//! serialized from sorted maps.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::PrimaryDataset;

/// Structural snapshot of a dataset, used only for equality
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(dataset: &PrimaryDataset) -> Self {
        let mut hasher = Sha256::new();
        // Writing JSON values into a hasher cannot fail
        let _ = serde_json::to_writer(&mut hasher, dataset);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

/// Holds the fingerprint of the dataset currently in the session record
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<Fingerprint>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure read: does `candidate` differ from the committed dataset?
    pub fn has_changed(&self, candidate: &PrimaryDataset) -> bool {
        match &self.last {
            None => true,
            Some(last) => *last != Fingerprint::of(candidate),
        }
    }

    /// Record `candidate` as the current dataset
    pub fn commit(&mut self, candidate: &PrimaryDataset) {
        self.last = Some(Fingerprint::of(candidate));
    }

    /// Seed from a restored dataset
    pub fn prime(&mut self, dataset: &PrimaryDataset) {
        self.commit(dataset);
    }

    /// Forget the committed dataset; the next candidate always counts as changed
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn current(&self) -> Option<&Fingerprint> {
        self.last.as_ref()
    }
}
