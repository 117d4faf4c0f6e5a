//! ==============================================================================
//! main.rs - sensor-collect entry point
//! ==============================================================================
//!
//! purpose:
//!     gateway process for one site. polls the toggle sensors wired to this
//!     board, accepts measurements pushed by network sensors, and stores
//!     every classified measurement under the data folder.
//!
//! responsibilities:
//!     - resolve configuration (file, environment, flags), refuse to start if invalid
//!     - install structured logging
//!     - pick the input-line backend (rppal on feature="hardware", else simulated)
//!     - run until Ctrl-C / SIGTERM, then shut down in order
//!
//! relationships:
//!     - uses: config.rs (ServiceConfig), lifecycle.rs (Service), hal.rs
//!
//! environment:
//!
//!     | Variable                    | Required | Default | Description                     |
//!     |-----------------------------|----------|---------|---------------------------------|
//!     | `DATA_FOLDER`               | yes*     | --      | root of the measurement records |
//!     | `LOCAL_SENSORS_CONFIG_FILE` | no       | --      | toml file of local sensors      |
//!     | `HTTP_PORT`                 | no       | `5000`  | ingestion endpoint port         |
//!     | `UDP_PORT`                  | no       | `12345` | datagram ACK port               |
//!     | `BIND_ADDRESS`              | no       | 0.0.0.0 | address for both listeners      |
//!     | `SENSOR_COLLECT_CONFIG`     | no       | --      | explicit service config file    |
//!
//!     * unless `storage.data_folder` is set in the config file or `-d` is given
//!
//! usage:
//!
//!     sensor-collect [-d DATA_FOLDER] [-c LOCAL_SENSORS_CONFIG_FILE]
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sensor_collect::config::ServiceConfig;
use sensor_collect::hal::InputLines;
use sensor_collect::lifecycle::{self, Service};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    println!("===========================================================");
    println!("  sensor-collect");
    println!("===========================================================");

    // step 1: configuration, fatal if invalid
    let config = match ServiceConfig::resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] Fatal: {}", e);
            std::process::exit(1);
        }
    };

    // step 2: logging
    init_logging(&config.logging.level);
    config.print_summary();

    // step 3: hardware
    let lines = open_input_lines()?;

    // step 4: storage + local sensors
    let service = match Service::init(config, lines) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "Fatal configuration error");
            std::process::exit(1);
        }
    };

    // step 5: listeners + polling
    let running = service.start().await?;
    if let Some(scheduler) = running.scheduler() {
        for failure in scheduler.startup_failures() {
            tracing::warn!(sensor_id = %failure.sensor_id, pin = failure.pin, reason = %failure.reason, "Sensor not polled");
        }
    }

    lifecycle::wait_for_signal().await;
    running.shutdown().await;
    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sensor_collect={0},tower_http={0}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(feature = "hardware")]
fn open_input_lines() -> Result<Arc<dyn InputLines>> {
    Ok(Arc::new(sensor_collect::hal::GpioLines::new()?))
}

#[cfg(not(feature = "hardware"))]
fn open_input_lines() -> Result<Arc<dyn InputLines>> {
    Ok(Arc::new(sensor_collect::hal::SimulatedLines::new()))
}
