//! # Integration Tests
//!
//! Each module drives real components end to end over in-memory transports.

pub mod support;

#[cfg(test)]
mod notarisation;
#[cfg(test)]
mod sessions;
#[cfg(test)]
mod uniqueness;
