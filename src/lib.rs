//! `sensor-collect` library crate.
//!
//! Debounces toggle sensors polled from GPIO, accepts pre-classified reports
//! from network sensors, and stores every measurement as an append-only
//! record. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod debounce;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod hal;
pub mod lifecycle;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod udp;

pub use domain::{Measurement, SensorConfig, Status};
