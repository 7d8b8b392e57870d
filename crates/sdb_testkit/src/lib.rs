//! # SDB Testkit
//!
//! Test utilities for SDB.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - Property-based test generators using proptest
//! - A model-checked integration harness
//! - Crash recovery simulation
//! - Stress testing utilities
//! - Known-answer vectors for the WAL frame format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         store.set(b"k", b"v").unwrap();
//!         assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
