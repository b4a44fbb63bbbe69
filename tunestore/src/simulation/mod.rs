//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module drives a [`Kernel`](crate::kernel::Kernel) with:
//! - Reproducible random operation sequences
//! - A plain model of the expected relationships
//! - Invariant checking after each operation
//!
//! Given the same seed and configuration, a run performs the same operations
//! and reaches the same arena layout.
//!
//! # Usage
//!
//! ```ignore
//! use crate::simulation::simulator::{Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345).with_name_pool_size(16);
//!
//! let mut sim = Simulator::new(config);
//! let result = sim.run(200);
//!
//! assert!(result.invariant_violations.is_empty());
//! ```

// Compiled for tests only; accessors are kept for inspecting failed runs.
#![allow(dead_code)]

mod invariants;
