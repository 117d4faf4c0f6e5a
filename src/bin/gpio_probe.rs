//! ==============================================================================
//! gpio_probe.rs - wiring check for a single input line
//! ==============================================================================
//!
//! usage:
//!     gpio-probe [PIN] [INTERVAL_MS]      (defaults: 17, 500)
//!
//!     prints HIGH/LOW for the pin until Ctrl-C, then releases it. useful to
//!     confirm a float switch is on the pin the sensors file says it is.
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use sensor_collect::hal::InputLines;

const DEFAULT_PIN: u8 = 17;
const DEFAULT_INTERVAL_MS: u64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let pin: u8 = match args.next() {
        Some(v) => v.parse().with_context(|| format!("invalid pin '{}'", v))?,
        None => DEFAULT_PIN,
    };
    let interval = match args.next() {
        Some(v) => Duration::from_millis(v.parse().with_context(|| format!("invalid interval '{}'", v))?),
        None => Duration::from_millis(DEFAULT_INTERVAL_MS),
    };

    let lines = open_input_lines()?;
    lines.bind(pin)?;
    println!("[PROBE] Reading GPIO {} every {}ms (Ctrl-C to stop)", pin, interval.as_millis());

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => match lines.read(pin) {
                Ok(true) => println!("GPIO pin {} is HIGH", pin),
                Ok(false) => println!("GPIO pin {} is LOW", pin),
                Err(e) => tracing::warn!(pin, error = %e, "Read failed"),
            },
        }
    }

    lines.release(pin);
    println!("[PROBE] Released GPIO {}", pin);
    Ok(())
}

#[cfg(feature = "hardware")]
fn open_input_lines() -> Result<Arc<dyn InputLines>> {
    Ok(Arc::new(sensor_collect::hal::GpioLines::new()?))
}

#[cfg(not(feature = "hardware"))]
fn open_input_lines() -> Result<Arc<dyn InputLines>> {
    Ok(Arc::new(sensor_collect::hal::SimulatedLines::new()))
}
