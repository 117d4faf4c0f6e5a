//! ==============================================================================
//! debounce.rs - sliding window classifier for toggle sensors
//! ==============================================================================
//!
//! purpose:
//!     keeps the last `capacity` raw reads of one sensor and classifies them.
//!     a sensor has to report the same level `capacity` times in a row before
//!     it is considered stuck (all high) or empty (all low); anything mixed is ok.
//!
//! relationships:
//!     - owned by: scheduler.rs (one window per worker, never shared)
//!
//! ==============================================================================

use std::collections::VecDeque;

use crate::domain::Status;
use crate::error::PreconditionError;

/// default number of reads kept per sensor
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct DebounceWindow {
    capacity: usize,
    values: VecDeque<bool>,
}

impl DebounceWindow {
    /// a capacity of zero is bumped to one so the window can hold a read
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// append a raw read, evicting the oldest one when full
    pub fn observe(&mut self, value: bool) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn classify(&self) -> Result<Status, PreconditionError> {
        debug_assert!(!self.values.is_empty(), "classify() called before any read");
        if self.values.is_empty() {
            return Err(PreconditionError::EmptyWindow);
        }

        let status = if self.values.iter().all(|&v| v) {
            Status::Stuck
        } else if self.values.iter().all(|&v| !v) {
            Status::Empty
        } else {
            Status::Ok
        };
        Ok(status)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for DebounceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
