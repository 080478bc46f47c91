//! Domain records shared by the streamflow observation preparation crates.
//!
//! Nothing in here performs I/O; the ingest crate owns sources, sinks and
//! the batch transforms.

pub mod domain;
