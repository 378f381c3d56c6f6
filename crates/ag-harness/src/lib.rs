//! Collaborators of the pulse engine and the reliability plumbing around them.
//!
//! - [`skill`]: task execution behind the `Skill` trait
//! - [`perception`]: third-party data feeds read at night
//! - [`notifier`] and [`backup`]: where the nightly report and snapshot go
//! - [`retry`]: bounded attempts with per-attempt timeouts for every outbound call
//! - [`shutdown`]: cooperative shutdown between pulses

pub mod backup;
pub mod notifier;
pub mod perception;
pub mod retry;
pub mod shutdown;
pub mod skill;
