//! The polling loop that turns runtime state into gauge values.
//!
//! One collector runs per process, on its own task. Each tick connects if
//! needed, lists running containers, filters and inspects them one by one and
//! publishes a record per surviving container. Failures are confined to the
//! smallest unit they affect: a connection failure skips the tick, a listing
//! failure skips the tick, a container failure skips the container.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::container::{self, ContainerID};
use crate::error::ResultOkLogExt;
use crate::filter;
use crate::labels::CustomLabelMapping;
use crate::metrics::HealthMetrics;
use crate::runtime::{ContainerRuntime, ContainerSummary, RuntimeConnector};

/// Whether the collector currently holds a runtime connection.
///
/// Cheap to clone; read by the liveness endpoint.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus(Arc<AtomicBool>);

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Release);
    }
}

/// Collector behaviour taken from the configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub poll_interval: Duration,
    pub opt_in_only: bool,
    pub custom_labels: CustomLabelMapping,
}

/// Counts of what happened to the containers of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub listed: usize,
    pub filtered: usize,
    pub published: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No connection could be opened; nothing was written.
    Disconnected,
    /// Listing containers failed; nothing was written.
    ListingFailed,
    Completed(TickReport),
}

pub struct Collector<C: RuntimeConnector> {
    connector: C,
    runtime: Option<C::Runtime>,
    metrics: Arc<HealthMetrics>,
    settings: Settings,
    status: ConnectionStatus,
    tick: u64,
}

impl<C: RuntimeConnector> Collector<C> {
    pub fn new(connector: C, metrics: Arc<HealthMetrics>, settings: Settings) -> Self {
        Self {
            connector,
            runtime: None,
            metrics,
            settings,
            status: ConnectionStatus::default(),
            tick: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    /// Opens a runtime connection unless one is already held.
    async fn ensure_connected(&mut self) -> bool {
        if self.runtime.is_some() {
            return true;
        }
        match self.connector.connect().await {
            Ok(runtime) => {
                log::info!("Successfully connected to container runtime");
                self.runtime = Some(runtime);
                self.status.set(true);
                true
            }
            Err(err) => {
                log::warn!(
                    "Skipping metrics update, failed to connect to container runtime: {err}"
                );
                false
            }
        }
    }

    /// Runs one poll cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.ensure_connected().await {
            return TickOutcome::Disconnected;
        }
        let Some(runtime) = self.runtime.as_ref() else {
            return TickOutcome::Disconnected;
        };

        let summaries = match runtime.list_running().await {
            Ok(summaries) => summaries,
            Err(err) => {
                log::error!("Failed to list containers: {err}");
                return TickOutcome::ListingFailed;
            }
        };

        self.tick += 1;
        let tick = self.tick;
        let mut report = TickReport {
            listed: summaries.len(),
            ..TickReport::default()
        };
        let no_labels = HashMap::new();

        for summary in summaries.iter().filter(|s| !s.is_stopped()) {
            let labels = summary.labels.as_ref().unwrap_or(&no_labels);
            if !filter::eligible(labels, self.settings.opt_in_only) {
                log::trace!("Container {:?} is excluded from monitoring", summary.id);
                report.filtered += 1;
                continue;
            }

            match self.collect_container(runtime, summary, tick).await {
                Some(()) => report.published += 1,
                None => report.failed += 1,
            }
        }

        let expired = self.metrics.expire_stale(tick);
        if expired > 0 {
            log::debug!("Removed {expired} stale series");
        }

        TickOutcome::Completed(report)
    }

    async fn collect_container(
        &self,
        runtime: &C::Runtime,
        summary: &ContainerSummary,
        tick: u64,
    ) -> Option<()> {
        let id = ContainerID::new(summary.id.as_deref().unwrap_or_default())
            .ok_log_context("Skipping container")?;
        let descriptor = runtime
            .inspect(id.as_ref())
            .await
            .ok_log_context(&format!("Error processing container {id}"))?;

        let record = container::inspect(
            &descriptor,
            self.metrics.schema(),
            &self.settings.custom_labels,
        );
        self.metrics
            .publish(&record, tick)
            .ok_log_context(&format!("Error publishing container {id}"))?;
        log::debug!(
            "Container {} ({}) health: {} (failure streak {})",
            record.name,
            record.short_id,
            record.health,
            record.failure_streak
        );
        Some(())
    }

    /// Polls every `poll_interval` until `shutdown` turns `true` or its sender is
    /// dropped.
    ///
    /// The flag is only observed between ticks; a tick in progress always runs
    /// to completion, and a tick that overruns the interval delays the next one
    /// instead of overlapping it.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Starting collector with a poll interval of {} seconds",
            self.settings.poll_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let outcome = self.tick().await;
            log::trace!("Tick finished in {:?}: {:?}", started.elapsed(), outcome);
        }

        log::info!("Collector stopped");
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use crate::labels::{BASE_LABELS, resolve};
    use crate::runtime::{
        ContainerConfig, ContainerDescriptor, ContainerState, Error, HealthReport, Result,
    };

    fn daemon_error(operation: &'static str, status_code: u16, message: String) -> Error {
        Error::Docker {
            operation,
            source: bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            },
        }
    }

    #[derive(Debug, Clone, Default)]
    struct FakeRuntime {
        containers: Arc<Mutex<Vec<(ContainerSummary, Option<ContainerDescriptor>)>>>,
        fail_listing: Arc<AtomicBool>,
    }

    impl FakeRuntime {
        fn add(&self, id: &str, labels: &[(&str, &str)], health: Option<(&str, i64)>) {
            let labels: HashMap<String, String> = labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            let summary = ContainerSummary {
                id: Some(id.to_owned()),
                labels: Some(labels.clone()),
                state: Some("running".to_owned()),
            };
            let descriptor = ContainerDescriptor {
                id: Some(id.to_owned()),
                name: Some(format!("/{id}")),
                image: Some("sha256:0123456789abcdef".to_owned()),
                config: Some(ContainerConfig {
                    image: Some("nginx:latest".to_owned()),
                    labels: Some(labels),
                }),
                state: Some(ContainerState {
                    status: Some("running".to_owned()),
                    health: health.map(|(status, streak)| HealthReport {
                        status: Some(status.to_owned()),
                        failing_streak: Some(streak),
                    }),
                }),
            };
            self.containers
                .lock()
                .unwrap()
                .push((summary, Some(descriptor)));
        }

        fn add_vanishing(&self, id: &str) {
            let summary = ContainerSummary {
                id: Some(id.to_owned()),
                state: Some("running".to_owned()),
                ..ContainerSummary::default()
            };
            self.containers.lock().unwrap().push((summary, None));
        }

        fn clear(&self) {
            self.containers.lock().unwrap().clear();
        }
    }

    impl ContainerRuntime for FakeRuntime {
        async fn list_running(&self) -> Result<Vec<ContainerSummary>> {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(daemon_error(
                    "list containers",
                    500,
                    "daemon error".to_owned(),
                ));
            }
            Ok(self
                .containers
                .lock()
                .unwrap()
                .iter()
                .map(|(s, _)| s.clone())
                .collect())
        }

        async fn inspect(&self, id: &str) -> Result<ContainerDescriptor> {
            self.containers
                .lock()
                .unwrap()
                .iter()
                .find(|(s, _)| s.id.as_deref() == Some(id))
                .and_then(|(_, d)| d.clone())
                .ok_or_else(|| {
                    daemon_error("inspect container", 404, format!("No such container: {id}"))
                })
        }
    }

    #[derive(Debug, Clone, Default)]
    struct FakeConnector {
        runtime: FakeRuntime,
        failures_left: Arc<AtomicUsize>,
    }

    impl RuntimeConnector for FakeConnector {
        type Runtime = FakeRuntime;

        async fn connect(&self) -> Result<FakeRuntime> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Timeout {
                    operation: "ping",
                    timeout: Duration::from_secs(1),
                });
            }
            Ok(self.runtime.clone())
        }
    }

    fn collector(
        connector: FakeConnector,
        opt_in_only: bool,
        stale_after: u64,
    ) -> (Collector<FakeConnector>, Arc<HealthMetrics>) {
        let custom = CustomLabelMapping::default();
        let schema = resolve(&BASE_LABELS, &custom, false);
        let metrics = Arc::new(HealthMetrics::new(schema, "", stale_after).unwrap());
        let settings = Settings {
            poll_interval: Duration::from_millis(10),
            opt_in_only,
            custom_labels: custom,
        };
        (
            Collector::new(connector, Arc::clone(&metrics), settings),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_opted_out_container_is_not_exported() {
        let connector = FakeConnector::default();
        connector
            .runtime
            .add("aaaaaaaaaaaaaaaa", &[], Some(("healthy", 0)));
        connector.runtime.add(
            "bbbbbbbbbbbbbbbb",
            &[(filter::ENABLED_LABEL, "false")],
            Some(("unhealthy", 5)),
        );
        let (mut collector, metrics) = collector(connector, false, 0);

        let outcome = collector.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed(TickReport {
                listed: 2,
                filtered: 1,
                published: 1,
                failed: 0,
            })
        );

        let out = metrics.encode().unwrap();
        assert!(out.contains(r#"container_health_status{container_id="aaaaaaaaaaaa",container_name="aaaaaaaaaaaaaaaa",image="nginx:latest",service="",stack=""} 1"#));
        assert!(out.contains(r#"container_health_failure_streak{container_id="aaaaaaaaaaaa",container_name="aaaaaaaaaaaaaaaa",image="nginx:latest",service="",stack=""} 0"#));
        assert!(!out.contains("bbbbbbbbbbbb"));
        assert_eq!(metrics.series_count(), 1);
        assert!(collector.status().is_connected());
    }

    #[tokio::test]
    async fn test_opt_in_only_mode() {
        let connector = FakeConnector::default();
        connector.runtime.add("aaaaaaaaaaaa", &[], Some(("healthy", 0)));
        connector.runtime.add(
            "bbbbbbbbbbbb",
            &[(filter::ENABLED_LABEL, "TRUE")],
            Some(("starting", 0)),
        );
        let (mut collector, metrics) = collector(connector, true, 0);

        collector.tick().await;
        let out = metrics.encode().unwrap();
        assert!(!out.contains(r#"container_id="aaaaaaaaaaaa""#));
        assert!(out.contains(r#"container_id="bbbbbbbbbbbb""#));
    }

    #[tokio::test]
    async fn test_tick_is_idempotent() {
        let connector = FakeConnector::default();
        connector
            .runtime
            .add("aaaaaaaaaaaa", &[], Some(("unhealthy", 3)));
        connector.runtime.add("bbbbbbbbbbbb", &[], None);
        let (mut collector, metrics) = collector(connector, false, 0);

        collector.tick().await;
        let first = metrics.encode().unwrap();
        collector.tick().await;
        assert_eq!(metrics.encode().unwrap(), first);
        assert_eq!(metrics.series_count(), 2);
    }

    #[tokio::test]
    async fn test_connection_failure_skips_tick_and_retries() {
        let connector = FakeConnector::default();
        connector.failures_left.store(1, Ordering::SeqCst);
        connector.runtime.add("aaaaaaaaaaaa", &[], Some(("healthy", 0)));
        let (mut collector, metrics) = collector(connector, false, 0);

        assert_eq!(collector.tick().await, TickOutcome::Disconnected);
        assert!(!collector.status().is_connected());
        assert_eq!(metrics.series_count(), 0);

        assert!(matches!(collector.tick().await, TickOutcome::Completed(_)));
        assert!(collector.status().is_connected());
        assert_eq!(metrics.series_count(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_keeps_connection() {
        let connector = FakeConnector::default();
        connector.runtime.add("aaaaaaaaaaaa", &[], Some(("healthy", 0)));
        connector.runtime.fail_listing.store(true, Ordering::SeqCst);
        let runtime = connector.runtime.clone();
        let (mut collector, metrics) = collector(connector, false, 0);

        assert_eq!(collector.tick().await, TickOutcome::ListingFailed);
        assert!(collector.status().is_connected());
        assert_eq!(metrics.series_count(), 0);

        runtime.fail_listing.store(false, Ordering::SeqCst);
        assert!(matches!(collector.tick().await, TickOutcome::Completed(_)));
        assert_eq!(metrics.series_count(), 1);
    }

    #[tokio::test]
    async fn test_container_failure_does_not_abort_batch() {
        let connector = FakeConnector::default();
        connector.runtime.add_vanishing("cccccccccccc");
        connector.runtime.add("aaaaaaaaaaaa", &[], Some(("healthy", 0)));
        let (mut collector, metrics) = collector(connector, false, 0);

        let outcome = collector.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed(TickReport {
                listed: 2,
                filtered: 0,
                published: 1,
                failed: 1,
            })
        );
        assert_eq!(metrics.series_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_id_is_skipped() {
        let connector = FakeConnector::default();
        connector.runtime.add("../../info", &[], Some(("healthy", 0)));
        connector.runtime.add("aaaaaaaaaaaa", &[], Some(("healthy", 0)));
        let (mut collector, metrics) = collector(connector, false, 0);

        match collector.tick().await {
            TickOutcome::Completed(report) => {
                assert_eq!(report.failed, 1);
                assert_eq!(report.published, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(metrics.series_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_series_are_expired() {
        let connector = FakeConnector::default();
        connector.runtime.add("aaaaaaaaaaaa", &[], Some(("healthy", 0)));
        let runtime = connector.runtime.clone();
        let (mut collector, metrics) = collector(connector, false, 2);

        collector.tick().await;
        assert_eq!(metrics.series_count(), 1);

        runtime.clear();
        collector.tick().await;
        assert_eq!(metrics.series_count(), 1);
        collector.tick().await;
        assert_eq!(metrics.series_count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let connector = FakeConnector::default();
        connector.runtime.add("aaaaaaaaaaaa", &[], Some(("healthy", 0)));
        let (collector, metrics) = collector(connector, false, 0);
        let (tx, rx) = watch::channel(false);

        let handle = collector.spawn(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("collector did not stop")
            .expect("collector panicked");
        assert_eq!(metrics.series_count(), 1);
    }
}
