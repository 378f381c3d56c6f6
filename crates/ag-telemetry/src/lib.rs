//! Logging setup shared by the `garden` CLI and the `garden-daemon` binary.
//!
//! Both binaries log through `tracing`; this crate installs the
//! `tracing-subscriber` backend in human-readable or JSON form.

pub mod logging;
