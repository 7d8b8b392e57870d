//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values, and operation sequences, plus a
//! reference model that the store must agree with.

use proptest::prelude::*;
use sdb_core::{CoreResult, Store};
use std::collections::BTreeMap;

/// A single store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `set(key, value)`.
    Set(Vec<u8>, Vec<u8>),
    /// `remove(key)`.
    Remove(Vec<u8>),
}

impl Op {
    /// Applies the operation to a store.
    pub fn apply(&self, store: &Store) -> CoreResult<()> {
        match self {
            Self::Set(key, value) => store.set(key, value),
            Self::Remove(key) => store.remove(key),
        }
    }

    /// Applies the operation to the reference model.
    pub fn apply_to_model(&self, model: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        match self {
            Self::Set(key, value) => {
                model.insert(key.clone(), value.clone());
            }
            Self::Remove(key) => {
                model.remove(key);
            }
        }
    }
}

/// Replays `ops` on an empty map, giving the expected final state.
pub fn model_of(ops: &[Op]) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let mut model = BTreeMap::new();
    for op in ops {
        op.apply_to_model(&mut model);
    }
    model
}

/// Reads every live pair out of a store.
pub fn dump(store: &Store) -> CoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut out = BTreeMap::new();
    store.iterate(|key, value| {
        out.insert(key.to_vec(), value.to_vec());
        Ok(true)
    })?;
    Ok(out)
}

/// Strategy for keys drawn from a small alphabet, so sequences collide often.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        3 => prop::sample::select(vec!["a", "b", "c", "d", "e", "f", "g", "h"])
            .prop_map(|k| k.as_bytes().to_vec()),
        1 => prop::collection::vec(any::<u8>(), 0..16),
    ]
}

/// Strategy for values, including empty ones.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for a single operation, weighted towards `Set`.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key_strategy(), value_strategy()).prop_map(|(k, v)| Op::Set(k, v)),
        1 => key_strategy().prop_map(Op::Remove),
    ]
}

/// Strategy for a sequence of up to `max_len` operations.
pub fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 0..max_len)
}
