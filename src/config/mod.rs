//! Configuration and constants
//!
//! Contains default values used across the engine.

pub mod defaults;
