//! ==============================================================================
//! lifecycle.rs - service coordinator
//! ==============================================================================
//!
//! purpose:
//!     owns everything with a process lifetime and decides the startup and
//!     shutdown order.
//!
//! startup (Service::init, then Service::start):
//!     1. storage root created, local sensors file loaded (fatal on error)
//!     2. http listener bound (fatal on error)
//!     3. udp listener bound (logged on error, http keeps running)
//!     4. one polling worker per local sensor
//!
//! shutdown (RunningService::shutdown, consumes the handle):
//!     1. polling workers cancelled and joined, input lines released
//!     2. http listener closed (graceful), udp socket closed (task abort)
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                     RunningService                       │
//!     │  ┌───────────────┐  ┌──────────────┐  ┌───────────────┐  │
//!     │  │ polling       │  │ http gateway │  │ udp echo      │  │
//!     │  │ workers (n)   │  │ PUT /v1/..   │  │ ACK           │  │
//!     │  └──────┬────────┘  └──────┬───────┘  └───────────────┘  │
//!     │         │                  │                             │
//!     │         └────────┬─────────┘                             │
//!     │                  ▼                                       │
//!     │        Arc<dyn MeasurementStore>                         │
//!     └──────────────────────────────────────────────────────────┘
//!
//!     handlers and workers receive the store handle at construction;
//!     nothing is reached through a global.
//!
//! ==============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::error::{ConfigError, StoreError};
use crate::gateway::{self, IngestState};
use crate::hal::InputLines;
use crate::registry::SensorRegistry;
use crate::scheduler::PollingScheduler;
use crate::store::{JsonFileStore, MeasurementStore};
use crate::udp::UdpEcho;

/// Initialized but not yet serving.
pub struct Service {
    config: ServiceConfig,
    registry: Arc<SensorRegistry>,
    store: Arc<JsonFileStore>,
    lines: Arc<dyn InputLines>,
}

impl Service {
    /// resolve storage and local sensors; any failure here is fatal
    pub fn init(config: ServiceConfig, lines: Arc<dyn InputLines>) -> Result<Self, ConfigError> {
        let root = config.data_folder()?.to_path_buf();
        let store = JsonFileStore::open(&root).map_err(|e| match e {
            StoreError::Io { path, source } => ConfigError::StorageRoot { path, source },
            other => ConfigError::StorageRoot {
                path: root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
            },
        })?;

        let registry = match &config.sensors.config_file {
            Some(path) => SensorRegistry::load(path)?,
            None => {
                tracing::info!("No local sensors file configured, accepting remote reports only");
                SensorRegistry::default()
            }
        };
        for sensor in registry.iter() {
            tracing::info!(
                sensor_id = %sensor.id,
                name = %sensor.name,
                pin = sensor.pin,
                interval_ms = sensor.poll_interval.as_millis() as u64,
                window = sensor.window_capacity,
                "Local sensor configured",
            );
        }

        Ok(Self {
            config,
            registry: Arc::new(registry),
            store: Arc::new(store),
            lines,
        })
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &JsonFileStore {
        &self.store
    }

    /// bind the listeners and start polling
    pub async fn start(self) -> Result<RunningService> {
        let store: Arc<dyn MeasurementStore> = self.store.clone();

        let listener = tokio::net::TcpListener::bind(self.config.http_addr())
            .await
            .with_context(|| format!("failed to bind http listener on {}", self.config.http_addr()))?;
        let http_addr = listener.local_addr()?;
        let http_token = CancellationToken::new();
        let app = gateway::router(IngestState::new(store.clone()));
        let shutdown = http_token.clone().cancelled_owned();
        let http_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
        tracing::info!(addr = %http_addr, "HTTP gateway listening");

        let (udp_addr, udp_task) = match UdpEcho::bind(self.config.udp_addr()).await {
            Ok(echo) => {
                let addr = echo.local_addr().ok();
                (addr, Some(tokio::spawn(echo.run())))
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::error!(error = %reason, "UDP listener disabled");
                (None, None)
            }
        };

        let scheduler = if self.registry.is_empty() {
            None
        } else {
            Some(PollingScheduler::start(&self.registry, self.lines.clone(), store))
        };

        Ok(RunningService {
            registry: self.registry,
            store: self.store,
            scheduler,
            http_addr,
            http_token,
            http_task,
            udp_addr,
            udp_task,
        })
    }
}

/// Handle to the serving process.
pub struct RunningService {
    registry: Arc<SensorRegistry>,
    store: Arc<JsonFileStore>,
    scheduler: Option<PollingScheduler>,
    http_addr: SocketAddr,
    http_token: CancellationToken,
    http_task: JoinHandle<()>,
    udp_addr: Option<SocketAddr>,
    udp_task: Option<JoinHandle<()>>,
}

impl RunningService {
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// `None` when the udp listener could not be bound
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &JsonFileStore {
        &self.store
    }

    pub fn scheduler(&self) -> Option<&PollingScheduler> {
        self.scheduler.as_ref()
    }

    /// stop polling, release hardware, close listeners
    pub async fn shutdown(self) {
        if let Some(scheduler) = self.scheduler {
            scheduler.shutdown().await;
        }

        self.http_token.cancel();
        if let Err(e) = self.http_task.await {
            tracing::error!(error = %e, "HTTP server task failed");
        }

        if let Some(task) = self.udp_task {
            task.abort();
            let _ = task.await;
        }
        tracing::info!("Service stopped");
    }
}

/// resolves on Ctrl-C, or SIGTERM on unix
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::warn!("Shutdown requested");
}
