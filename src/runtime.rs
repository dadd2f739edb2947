//! Runtime glue that wires configuration, clocks, telemetry, and the periodic
//! job trigger.

pub mod clock;
pub mod config;
pub mod job;
pub mod telemetry;
