//! ==============================================================================
//! scheduler.rs - per-sensor polling workers
//! ==============================================================================
//!
//! purpose:
//!     runs one independent polling loop per locally configured sensor.
//!     each tick: read the line -> feed the debounce window -> classify ->
//!     store the measurement -> sleep for the sensor's poll interval.
//!
//! worker lifecycle:
//!
//!     Created ──bind ok──▶ Running ──token cancelled──▶ StopRequested ──▶ Stopped
//!        │                                                                  ▲
//!        └──────────────────────────bind failed─────────────────────────────┘
//!
//!     all workers share one CancellationToken. it is checked at the top of
//!     every tick and raced against the sleep, so a stop is honored within
//!     one poll interval and never in the middle of a read.
//!
//! failure policy:
//!     - bind failure: that worker stops and is reported in startup_failures()
//!     - read failure: logged, the tick is skipped, nothing enters the window
//!     - store failure: logged, the worker keeps polling
//!
//!     reads and writes happen inline in the worker, without an await. on a
//!     multi-thread runtime they run under block_in_place so a slow fsync does
//!     not hold up the other workers or the timer driver.
//!
//! relationships:
//!     - uses: hal.rs (InputLines), debounce.rs, store.rs
//!     - used by: lifecycle.rs
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Local};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::debounce::DebounceWindow;
use crate::domain::{Measurement, SensorConfig};
use crate::hal::InputLines;
use crate::registry::SensorRegistry;
use crate::store::MeasurementStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

/// A worker that could not claim its input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
    pub sensor_id: String,
    pub pin: u8,
    pub reason: String,
}

struct Worker {
    sensor_id: String,
    pin: u8,
    state: watch::Receiver<WorkerState>,
    handle: JoinHandle<()>,
}

pub struct PollingScheduler {
    token: CancellationToken,
    lines: Arc<dyn InputLines>,
    workers: Vec<Worker>,
    failures: Arc<Mutex<Vec<StartupFailure>>>,
}

impl PollingScheduler {
    /// spawn one worker per configured sensor
    ///
    /// must be called from inside a tokio runtime.
    pub fn start(
        registry: &SensorRegistry,
        lines: Arc<dyn InputLines>,
        store: Arc<dyn MeasurementStore>,
    ) -> Self {
        let token = CancellationToken::new();
        let failures = Arc::new(Mutex::new(Vec::new()));

        let workers = registry
            .iter()
            .map(|sensor| {
                let (state_tx, state_rx) = watch::channel(WorkerState::Created);
                let ctx = WorkerContext {
                    sensor: sensor.clone(),
                    lines: lines.clone(),
                    store: store.clone(),
                    token: token.clone(),
                    state: state_tx,
                    failures: failures.clone(),
                };
                Worker {
                    sensor_id: sensor.id.clone(),
                    pin: sensor.pin,
                    state: state_rx,
                    handle: tokio::spawn(ctx.run()),
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = workers.len(), "Polling scheduler started");

        Self {
            token,
            lines,
            workers,
            failures,
        }
    }

    /// snapshot of every worker's state, keyed by sensor id
    pub fn worker_states(&self) -> BTreeMap<String, WorkerState> {
        self.workers
            .iter()
            .map(|w| (w.sensor_id.clone(), *w.state.borrow()))
            .collect()
    }

    /// watch one worker's state transitions
    pub fn watch_state(&self, sensor_id: &str) -> Option<watch::Receiver<WorkerState>> {
        self.workers
            .iter()
            .find(|w| w.sensor_id == sensor_id)
            .map(|w| w.state.clone())
    }

    pub fn startup_failures(&self) -> Vec<StartupFailure> {
        self.failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// stop every worker, wait for all of them, then release the lines
    ///
    /// consumes the scheduler, so it runs at most once.
    pub async fn shutdown(self) {
        tracing::info!("Stopping polling workers");
        self.token.cancel();

        let mut pins = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            pins.push(worker.pin);
            if let Err(e) = worker.handle.await {
                tracing::error!(sensor_id = %worker.sensor_id, error = %e, "Polling worker aborted");
            }
        }

        for pin in pins {
            self.lines.release(pin);
        }
        tracing::info!("Polling workers stopped, input lines released");
    }
}

struct WorkerContext {
    sensor: SensorConfig,
    lines: Arc<dyn InputLines>,
    store: Arc<dyn MeasurementStore>,
    token: CancellationToken,
    state: watch::Sender<WorkerState>,
    failures: Arc<Mutex<Vec<StartupFailure>>>,
}

impl WorkerContext {
    async fn run(self) {
        let sensor = &self.sensor;

        if let Err(e) = self.lines.bind(sensor.pin) {
            tracing::error!(sensor_id = %sensor.id, pin = sensor.pin, error = %e, "Could not bind input line");
            let failure = StartupFailure {
                sensor_id: sensor.id.clone(),
                pin: sensor.pin,
                reason: e.to_string(),
            };
            match self.failures.lock() {
                Ok(mut failures) => failures.push(failure),
                Err(poisoned) => poisoned.into_inner().push(failure),
            }
            self.state.send_replace(WorkerState::Stopped);
            return;
        }

        self.state.send_replace(WorkerState::Running);
        tracing::info!(
            sensor_id = %sensor.id,
            pin = sensor.pin,
            interval_ms = sensor.poll_interval.as_millis() as u64,
            window = sensor.window_capacity,
            "Polling started",
        );

        let mut window = DebounceWindow::new(sensor.window_capacity);
        let mut last_timestamp: Option<DateTime<Local>> = None;

        loop {
            if self.token.is_cancelled() {
                break;
            }

            run_inline(|| self.tick(&mut window, &mut last_timestamp));

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(sensor.poll_interval) => {}
            }
        }

        self.state.send_replace(WorkerState::StopRequested);
        tracing::info!(sensor_id = %sensor.id, "Polling stopped");
        self.state.send_replace(WorkerState::Stopped);
    }

    fn tick(&self, window: &mut DebounceWindow, last_timestamp: &mut Option<DateTime<Local>>) {
        let sensor = &self.sensor;

        let level = match self.lines.read(sensor.pin) {
            Ok(level) => level,
            Err(e) => {
                tracing::warn!(sensor_id = %sensor.id, pin = sensor.pin, error = %e, "Read failed, skipping tick");
                return;
            }
        };

        window.observe(level);
        let status = match window.classify() {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(sensor_id = %sensor.id, error = %e, "Classification failed");
                return;
            }
        };

        let timestamp = next_timestamp(*last_timestamp, Local::now());
        *last_timestamp = Some(timestamp);

        let measurement = Measurement {
            sensor_id: sensor.id.clone(),
            sensor_name: sensor.name.clone(),
            status,
            timestamp,
        };

        tracing::debug!(sensor_id = %sensor.id, level, status = %status, "Sensor read");
        if let Err(e) = self.store.append(&measurement) {
            tracing::error!(sensor_id = %sensor.id, operation = "append", error = %e, "Failed to store measurement");
        }
    }
}

/// keeps per-sensor timestamps strictly increasing even if the clock steps back
fn next_timestamp(last: Option<DateTime<Local>>, now: DateTime<Local>) -> DateTime<Local> {
    match last {
        Some(last) if now <= last => last + ChronoDuration::microseconds(1),
        _ => now,
    }
}

/// blocking work from inside a worker task
///
/// block_in_place panics on a current-thread runtime, where there is no
/// other thread to hand the scheduler to anyway.
fn run_inline<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;
    use crate::error::StoreError;
    use crate::hal::SimulatedLines;
    use crate::store::RecordKey;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStore {
        appended: Mutex<Vec<Measurement>>,
    }

    impl RecordingStore {
        fn for_sensor(&self, id: &str) -> Vec<Measurement> {
            self.appended
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.sensor_id == id)
                .cloned()
                .collect()
        }
    }

    impl MeasurementStore for RecordingStore {
        fn append(&self, m: &Measurement) -> Result<RecordKey, StoreError> {
            let mut appended = self.appended.lock().unwrap();
            appended.push(m.clone());
            Ok(RecordKey {
                sensor_id: m.sensor_id.clone(),
                name: appended.len().to_string(),
            })
        }
    }

    fn registry(src: &str) -> SensorRegistry {
        SensorRegistry::from_toml_str(src).unwrap()
    }

    async fn wait_for(scheduler: &PollingScheduler, id: &str, state: WorkerState) {
        let mut rx = scheduler.watch_state(id).unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for worker state")
            .unwrap();
    }

    async fn wait_for_count(store: &RecordingStore, id: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.for_sensor(id).len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for measurements");
    }

    #[tokio::test]
    async fn test_stuck_sensor_is_classified_after_window_fills() {
        let lines = Arc::new(SimulatedLines::new());
        lines.set_level(17, true);
        let store = Arc::new(RecordingStore::default());

        let scheduler = PollingScheduler::start(
            &registry("[float]\npin = 17\nwait = 0.01\nstuck_threshold = 3\nname = \"Float\"\n"),
            lines.clone(),
            store.clone(),
        );
        wait_for_count(&store, "float", 3).await;
        scheduler.shutdown().await;

        let measurements = store.for_sensor("float");
        assert!(measurements.iter().all(|m| m.status == Status::Stuck));
        assert!(measurements.iter().all(|m| m.sensor_name == "Float"));
        assert!(measurements.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_bind_failure_is_isolated() {
        let lines = Arc::new(SimulatedLines::new());
        lines.fail_bind(5);
        let store = Arc::new(RecordingStore::default());

        let scheduler = PollingScheduler::start(
            &registry("[broken]\npin = 5\nwait = 0.01\n\n[good]\npin = 6\nwait = 0.01\n"),
            lines.clone(),
            store.clone(),
        );
        wait_for(&scheduler, "good", WorkerState::Running).await;
        wait_for(&scheduler, "broken", WorkerState::Stopped).await;
        wait_for_count(&store, "good", 2).await;

        let failures = scheduler.startup_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].sensor_id, "broken");
        assert_eq!(failures[0].pin, 5);
        assert!(store.for_sensor("broken").is_empty());

        scheduler.shutdown().await;
        assert!(!lines.is_bound(6));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep_and_releases_lines() {
        let lines = Arc::new(SimulatedLines::new());
        let store = Arc::new(RecordingStore::default());

        let scheduler = PollingScheduler::start(
            &registry("[a]\npin = 1\nwait = 60\n\n[b]\npin = 2\nwait = 60\n"),
            lines.clone(),
            store.clone(),
        );
        wait_for(&scheduler, "a", WorkerState::Running).await;
        wait_for(&scheduler, "b", WorkerState::Running).await;
        wait_for_count(&store, "a", 1).await;
        wait_for_count(&store, "b", 1).await;

        let mut a_state = scheduler.watch_state("a").unwrap();
        let mut b_state = scheduler.watch_state("b").unwrap();
        tokio::time::timeout(Duration::from_secs(1), scheduler.shutdown())
            .await
            .expect("shutdown must not wait for the 60s poll interval");

        assert_eq!(*a_state.borrow_and_update(), WorkerState::Stopped);
        assert_eq!(*b_state.borrow_and_update(), WorkerState::Stopped);
        let mut released = lines.released();
        released.sort();
        assert_eq!(released, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_read_failure_skips_tick() {
        let lines = Arc::new(SimulatedLines::new());
        lines.fail_reads(9, true);
        let store = Arc::new(RecordingStore::default());

        let scheduler = PollingScheduler::start(
            &registry("[flaky]\npin = 9\nwait = 0.01\nstuck_threshold = 2\n"),
            lines.clone(),
            store.clone(),
        );
        wait_for(&scheduler, "flaky", WorkerState::Running).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.for_sensor("flaky").is_empty(), "no synthetic samples");

        lines.set_level(9, true);
        lines.fail_reads(9, false);
        wait_for_count(&store, "flaky", 1).await;
        scheduler.shutdown().await;

        // the first stored measurement saw exactly one real read
        assert_eq!(store.for_sensor("flaky")[0].status, Status::Stuck);
    }

    #[test]
    fn test_timestamps_bump_when_clock_stalls_or_steps_back() {
        let t0 = Local::now();
        assert_eq!(next_timestamp(None, t0), t0);

        let later = t0 + ChronoDuration::milliseconds(5);
        assert_eq!(next_timestamp(Some(t0), later), later);

        let bumped = next_timestamp(Some(t0), t0);
        assert_eq!(bumped, t0 + ChronoDuration::microseconds(1));

        let stepped_back = t0 - ChronoDuration::seconds(3);
        assert_eq!(next_timestamp(Some(t0), stepped_back), t0 + ChronoDuration::microseconds(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_store_does_not_stall_other_tasks() {
        struct SlowStore {
            entered: Mutex<bool>,
        }
        impl MeasurementStore for SlowStore {
            fn append(&self, m: &Measurement) -> Result<RecordKey, StoreError> {
                *self.entered.lock().unwrap() = true;
                std::thread::sleep(Duration::from_millis(300));
                Ok(RecordKey {
                    sensor_id: m.sensor_id.clone(),
                    name: "slow".to_string(),
                })
            }
        }

        let store = Arc::new(SlowStore { entered: Mutex::new(false) });
        let scheduler = PollingScheduler::start(
            &registry("[a]\npin = 1\nwait = 0.001\n\n[b]\npin = 2\nwait = 0.001\n"),
            Arc::new(SimulatedLines::new()),
            store.clone(),
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while !*store.entered.lock().unwrap() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("store never called");

        let elapsed = tokio::spawn(async {
            let started = std::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        })
        .await
        .unwrap();
        assert!(elapsed < Duration::from_millis(150), "timer stalled for {:?}", elapsed);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_failure_does_not_stop_worker() {
        struct FailingStore;
        impl MeasurementStore for FailingStore {
            fn append(&self, m: &Measurement) -> Result<RecordKey, StoreError> {
                Err(StoreError::InvalidSensorId(m.sensor_id.clone()))
            }
        }

        let lines = Arc::new(SimulatedLines::new());
        let scheduler = PollingScheduler::start(
            &registry("[a]\npin = 3\nwait = 0.01\n"),
            lines.clone(),
            Arc::new(FailingStore),
        );
        wait_for(&scheduler, "a", WorkerState::Running).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.worker_states()["a"], WorkerState::Running);
        scheduler.shutdown().await;
    }
}
