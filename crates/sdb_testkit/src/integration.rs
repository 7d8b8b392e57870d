//! Cross-crate integration test helpers.
//!
//! [`ModelHarness`] drives a real store alongside a `BTreeMap` model and
//! checks after every step that the two agree.

use crate::fixtures::TestStore;
use crate::generators::dump;
use sdb_core::{CompactionResult, Config};
use std::collections::BTreeMap;

/// A store paired with the state it is expected to hold.
pub struct ModelHarness {
    /// The store under test.
    pub store: TestStore,
    model: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl ModelHarness {
    /// Creates a harness over a fresh unsynced store.
    pub fn new() -> Self {
        Self::with_config(Config::new().sync_on_write(false))
    }

    /// Creates a harness over a fresh store opened with `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            store: TestStore::with_config(config),
            model: BTreeMap::new(),
        }
    }

    /// Sets a key in both the store and the model.
    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.store.set(key, value).expect("Failed to set key");
        self.model.insert(key.to_vec(), value.to_vec());
    }

    /// Removes a key from both the store and the model.
    pub fn remove(&mut self, key: &[u8]) {
        self.store.remove(key).expect("Failed to remove key");
        self.model.remove(key);
    }

    /// Gets a key and checks it against the model.
    pub fn get_and_verify(&self, key: &[u8]) -> Option<Vec<u8>> {
        let actual = self.store.get(key).expect("Failed to get key");
        assert_eq!(
            actual.as_ref(),
            self.model.get(key),
            "value mismatch for key {key:?}"
        );
        actual
    }

    /// Checks every key, the iteration order, and the live count.
    pub fn verify_all(&self) {
        for key in self.model.keys() {
            self.get_and_verify(key);
        }
        assert_eq!(dump(&self.store).expect("Failed to iterate"), self.model);
        assert_eq!(self.store.len(), self.model.len());
        let keys: Vec<_> = self.model.keys().cloned().collect();
        assert_eq!(self.store.keys().expect("Failed to list keys"), keys);
    }

    /// Closes and reopens the store, then verifies it.
    pub fn reopen(&mut self) {
        self.store.reopen();
        self.verify_all();
    }

    /// Compacts the store, then verifies it.
    pub fn compact(&mut self) -> CompactionResult {
        let result = self.store.compact().expect("Failed to compact");
        self.verify_all();
        result
    }

    /// Returns the expected state.
    pub fn model(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.model
    }
}

impl Default for ModelHarness {
    fn default() -> Self {
        Self::new()
    }
}
