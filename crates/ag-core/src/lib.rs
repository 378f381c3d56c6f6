//! Core state for an agent garden: types, configuration, the durable memory
//! log, the task queue and the helper registry.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
mod fsio;
pub mod helpers;
pub mod memory;
pub mod reflection;
pub mod tasks;
pub mod types;
