//! # Ledger-Flow Test Suite
//!
//! Unified test crate for scenarios that cross crate boundaries.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs        # Shared fixtures: parties, replica clusters
//!     ├── uniqueness.rs     # Exactly-once commit, idempotent retry, no partial commit
//!     ├── sessions.rs       # Session ordering, crash/restart equivalence
//!     └── notarisation.rs   # Parties, notary flows and the replica cluster together
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p lf-tests
//!
//! # By category
//! cargo test -p lf-tests integration::uniqueness::
//! cargo test -p lf-tests integration::notarisation::
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
