//! ==============================================================================
//! hal.rs - digital input lines
//! ==============================================================================
//!
//! purpose:
//!     the boundary to the toggle sensors. a line is bound once when its
//!     worker starts, read as a plain high/low level on every tick, and
//!     released after the worker has stopped.
//!
//! backends:
//!     - GpioLines (feature="hardware"): BCM lines through `rppal`, no pull resistor
//!     - SimulatedLines: levels set by hand; bind and read failures can be
//!       injected per line for tests and development boxes
//!
//!     bind and read problems come back as `HalError` for the worker to log.
//!
//! relationships:
//!     - used by: scheduler.rs, bin/gpio_probe.rs
//!
//! ==============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("gpio line {pin} could not be bound: {reason}")]
    Bind { pin: u8, reason: String },

    #[error("gpio line {pin} could not be read: {reason}")]
    Read { pin: u8, reason: String },

    #[error("gpio line {0} is not bound")]
    NotBound(u8),

    #[error("gpio controller unavailable: {0}")]
    Unavailable(String),
}

pub trait InputLines: Send + Sync {
    /// claim `pin` as an input
    fn bind(&self, pin: u8) -> Result<(), HalError>;
    /// current level of a bound pin, `true` = high
    fn read(&self, pin: u8) -> Result<bool, HalError>;
    /// give the pin back; releasing an unbound pin is a no-op
    fn release(&self, pin: u8);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==============================================================================================
// SIMULATED IMPLEMENTATION (development machines and tests)
// ==============================================================================================

#[derive(Debug, Default)]
struct SimState {
    levels: HashMap<u8, bool>,
    bound: HashSet<u8>,
    failing_binds: HashSet<u8>,
    failing_reads: HashSet<u8>,
    released: Vec<u8>,
}

/// In-memory input lines. Levels default to low.
#[derive(Debug, Default)]
pub struct SimulatedLines {
    state: Mutex<SimState>,
}

impl SimulatedLines {
    pub fn new() -> Self {
        tracing::info!("Using SIMULATED input lines (no hardware access)");
        Self::default()
    }

    pub fn set_level(&self, pin: u8, level: bool) {
        lock(&self.state).levels.insert(pin, level);
    }

    /// make every future `bind(pin)` fail
    pub fn fail_bind(&self, pin: u8) {
        lock(&self.state).failing_binds.insert(pin);
    }

    /// toggle read failures on `pin`
    pub fn fail_reads(&self, pin: u8, failing: bool) {
        let mut state = lock(&self.state);
        if failing {
            state.failing_reads.insert(pin);
        } else {
            state.failing_reads.remove(&pin);
        }
    }

    pub fn is_bound(&self, pin: u8) -> bool {
        lock(&self.state).bound.contains(&pin)
    }

    /// pins released so far, in release order
    pub fn released(&self) -> Vec<u8> {
        lock(&self.state).released.clone()
    }
}

impl InputLines for SimulatedLines {
    fn bind(&self, pin: u8) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        if state.failing_binds.contains(&pin) {
            return Err(HalError::Bind {
                pin,
                reason: "simulated bind failure".to_string(),
            });
        }
        if !state.bound.insert(pin) {
            return Err(HalError::Bind {
                pin,
                reason: "already bound".to_string(),
            });
        }
        tracing::debug!("[SIM GPIO] Pin {} bound as input", pin);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool, HalError> {
        let state = lock(&self.state);
        if !state.bound.contains(&pin) {
            return Err(HalError::NotBound(pin));
        }
        if state.failing_reads.contains(&pin) {
            return Err(HalError::Read {
                pin,
                reason: "simulated read failure".to_string(),
            });
        }
        Ok(state.levels.get(&pin).copied().unwrap_or(false))
    }

    fn release(&self, pin: u8) {
        let mut state = lock(&self.state);
        if state.bound.remove(&pin) {
            state.released.push(pin);
            tracing::debug!("[SIM GPIO] Pin {} released", pin);
        }
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================

#[cfg(feature = "hardware")]
pub struct GpioLines {
    gpio: rppal::gpio::Gpio,
    pins: Mutex<HashMap<u8, rppal::gpio::InputPin>>,
}

#[cfg(feature = "hardware")]
impl GpioLines {
    pub fn new() -> Result<Self, HalError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| HalError::Unavailable(e.to_string()))?;
        tracing::info!("Using REAL HARDWARE input lines (rppal)");
        Ok(Self {
            gpio,
            pins: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(feature = "hardware")]
impl InputLines for GpioLines {
    fn bind(&self, pin: u8) -> Result<(), HalError> {
        let input = self
            .gpio
            .get(pin)
            .map_err(|e| HalError::Bind {
                pin,
                reason: e.to_string(),
            })?
            .into_input();
        lock(&self.pins).insert(pin, input);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool, HalError> {
        lock(&self.pins)
            .get(&pin)
            .map(|input| input.is_high())
            .ok_or(HalError::NotBound(pin))
    }

    fn release(&self, pin: u8) {
        // dropping the InputPin resets the line to its previous mode
        lock(&self.pins).remove(&pin);
    }
}
