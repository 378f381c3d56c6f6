//! Pulse engine and scheduler for an agent garden.
//!
//! - [`engine`]: the day and night routines
//! - [`scheduler`]: clock-driven loop with panic isolation
//! - [`daemon`]: production wiring of collaborators and shutdown
//! - [`phase`], [`reflection`], [`spawn`]: pure policy used by the engine

pub mod daemon;
pub mod engine;
pub mod phase;
pub mod reflection;
pub mod scheduler;
pub mod spawn;
