//! # evstore Testkit
//!
//! Test utilities for evstore.
//!
//! This crate provides:
//! - Test fixtures, deterministic events and store helpers
//! - Property-based test generators using proptest
//! - A fault-injecting backend wrapper for atomicity tests
//! - Golden index key vectors
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use evstore_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     for ev in events(3) {
//!         store.save(&ev).unwrap();
//!     }
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use vectors::*;
