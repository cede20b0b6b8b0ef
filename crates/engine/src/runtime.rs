// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Prediction Trader. All rights reserved.
//
//  Licensed under the MIT License; you may not use this file except in
//  compliance with the License. You may obtain a copy of the License at
//  https://opensource.org/licenses/MIT
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Sidecar startup composition root and lifecycle orchestration.
//!
//! Startup runs a fixed stage order, publishing the lifecycle state after
//! every stage; a failure in any stage records `last_error`, clears UI
//! readiness, publishes, and aborts. Shutdown walks its phases in order:
//! stop intake, flush the ledger queue, close connectors, close the
//! database, then stop the services.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use strum::{AsRefStr, Display};

/// Boxed async startup/shutdown stage.
pub type StageHook = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Service started after dependency health checks pass and stopped during
/// shutdown.
#[async_trait]
pub trait LifecycleService: Send + Sync {
    /// Starts the service.
    ///
    /// # Errors
    ///
    /// Returns an error when the service cannot start; startup aborts.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stops the service.
    ///
    /// # Errors
    ///
    /// Returns an error when teardown fails.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Boot-time state reconciliation seam.
#[async_trait]
pub trait BootRehydrate: Send + Sync {
    /// Runs boot rehydration; failure keeps strategy execution disabled.
    ///
    /// # Errors
    ///
    /// Returns an error when reconciliation fails; startup aborts.
    async fn boot_rehydrate(&self) -> anyhow::Result<()>;
}

/// Required dependency polled once before services start.
#[async_trait]
pub trait DependencyHealth: Send + Sync {
    /// Returns `true` when the dependency is healthy.
    async fn healthcheck(&self) -> bool;
}

/// Sink receiving the lifecycle state after every stage and phase.
pub trait ReadinessPublisher: Send + Sync {
    /// Publishes one lifecycle snapshot.
    fn publish(&self, state: &LifecycleState);
}

/// Shutdown phases, published as they begin.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    StopIntake,
    FlushQueue,
    CloseConnectors,
    CloseDb,
    Stopped,
}

/// Aggregate readiness flags published to health consumers.
#[derive(Clone, Debug, PartialEq)]
pub struct LifecycleState {
    pub config_ready: bool,
    pub db_ready: bool,
    pub connectors_ready: bool,
    pub rate_limiter_ready: bool,
    pub rest_ready: bool,
    pub websocket_ready: bool,
    pub rehydrated: bool,
    pub consumers_ready: bool,
    pub routes_ready: bool,
    pub strategy_enabled: bool,
    pub execution_enabled: bool,
    pub tauri_ready: bool,
    pub ui_ready: bool,
    pub shutdown_phase: ShutdownPhase,
    pub last_error: Option<String>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            config_ready: false,
            db_ready: false,
            connectors_ready: false,
            rate_limiter_ready: false,
            rest_ready: false,
            websocket_ready: false,
            rehydrated: false,
            consumers_ready: false,
            routes_ready: false,
            strategy_enabled: false,
            execution_enabled: false,
            tauri_ready: false,
            ui_ready: false,
            shutdown_phase: ShutdownPhase::Running,
            last_error: None,
        }
    }
}

impl LifecycleState {
    /// Serializes the health payload published to consumers.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({
            "readiness": {
                "tauri": self.tauri_ready,
                "ui": self.ui_ready,
                "strategy": self.strategy_enabled,
                "execution": self.execution_enabled,
            },
            "startup": {
                "config": self.config_ready,
                "db": self.db_ready,
                "connectors": self.connectors_ready,
                "rate_limiter": self.rate_limiter_ready,
                "rest": self.rest_ready,
                "websocket": self.websocket_ready,
                "rehydrated": self.rehydrated,
                "consumers": self.consumers_ready,
                "routes": self.routes_ready,
            },
            "shutdown_phase": self.shutdown_phase.as_ref(),
            "last_error": self.last_error,
        })
    }
}

fn noop_hook() -> StageHook {
    Box::new(|| Box::pin(async { Ok(()) }))
}

/// Builds and orchestrates sidecar startup/shutdown dependencies.
pub struct SidecarCompositionRoot {
    state: LifecycleState,
    publisher: Arc<dyn ReadinessPublisher>,
    load_config: StageHook,
    open_db: StageHook,
    build_connectors: StageHook,
    init_rate_limiter: StageHook,
    rest_service: Option<Arc<dyn LifecycleService>>,
    websocket_service: Option<Arc<dyn LifecycleService>>,
    rehydrator: Option<Arc<dyn BootRehydrate>>,
    dependency_health_checks: Vec<Arc<dyn DependencyHealth>>,
    start_consumers: StageHook,
    start_routes: StageHook,
    stop_intake: StageHook,
    flush_queue: StageHook,
    close_connectors: StageHook,
    close_db: StageHook,
}

impl std::fmt::Debug for SidecarCompositionRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarCompositionRoot")
            .field("state", &self.state)
            .field("health_checks", &self.dependency_health_checks.len())
            .finish()
    }
}

impl SidecarCompositionRoot {
    /// Creates a new composition root with no-op stages.
    #[must_use]
    pub fn new(publisher: Arc<dyn ReadinessPublisher>) -> Self {
        Self {
            state: LifecycleState::default(),
            publisher,
            load_config: noop_hook(),
            open_db: noop_hook(),
            build_connectors: noop_hook(),
            init_rate_limiter: noop_hook(),
            rest_service: None,
            websocket_service: None,
            rehydrator: None,
            dependency_health_checks: Vec::new(),
            start_consumers: noop_hook(),
            start_routes: noop_hook(),
            stop_intake: noop_hook(),
            flush_queue: noop_hook(),
            close_connectors: noop_hook(),
            close_db: noop_hook(),
        }
    }

    /// Sets the config-loading stage.
    #[must_use]
    pub fn with_config_loader(mut self, hook: StageHook) -> Self {
        self.load_config = hook;
        self
    }

    /// Sets the database startup stage.
    #[must_use]
    pub fn with_db(mut self, hook: StageHook) -> Self {
        self.open_db = hook;
        self
    }

    /// Sets the connector construction stage.
    #[must_use]
    pub fn with_connectors(mut self, hook: StageHook) -> Self {
        self.build_connectors = hook;
        self
    }

    /// Sets the rate-limiter initialization stage.
    #[must_use]
    pub fn with_rate_limiter(mut self, hook: StageHook) -> Self {
        self.init_rate_limiter = hook;
        self
    }

    /// Sets the REST service.
    #[must_use]
    pub fn with_rest_service(mut self, service: Arc<dyn LifecycleService>) -> Self {
        self.rest_service = Some(service);
        self
    }

    /// Sets the WebSocket service.
    #[must_use]
    pub fn with_websocket_service(mut self, service: Arc<dyn LifecycleService>) -> Self {
        self.websocket_service = Some(service);
        self
    }

    /// Sets the boot rehydrator.
    #[must_use]
    pub fn with_rehydrator(mut self, rehydrator: Arc<dyn BootRehydrate>) -> Self {
        self.rehydrator = Some(rehydrator);
        self
    }

    /// Adds a required dependency health check.
    #[must_use]
    pub fn with_health_check(mut self, check: Arc<dyn DependencyHealth>) -> Self {
        self.dependency_health_checks.push(check);
        self
    }

    /// Sets the consumer-starting stage.
    #[must_use]
    pub fn with_consumer_starter(mut self, hook: StageHook) -> Self {
        self.start_consumers = hook;
        self
    }

    /// Sets the route-starting stage.
    #[must_use]
    pub fn with_route_starter(mut self, hook: StageHook) -> Self {
        self.start_routes = hook;
        self
    }

    /// Sets the shutdown intake-stop hook.
    #[must_use]
    pub fn with_stop_intake(mut self, hook: StageHook) -> Self {
        self.stop_intake = hook;
        self
    }

    /// Sets the shutdown queue-flush hook.
    #[must_use]
    pub fn with_flush_queue(mut self, hook: StageHook) -> Self {
        self.flush_queue = hook;
        self
    }

    /// Sets the shutdown connector-close hook.
    #[must_use]
    pub fn with_close_connectors(mut self, hook: StageHook) -> Self {
        self.close_connectors = hook;
        self
    }

    /// Sets the shutdown database-close hook.
    #[must_use]
    pub fn with_close_db(mut self, hook: StageHook) -> Self {
        self.close_db = hook;
        self
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Runs ordered startup, publishing readiness after each stage.
    ///
    /// # Errors
    ///
    /// Propagates the first failing stage after recording `last_error`,
    /// clearing UI readiness, and publishing.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let result = self.run_startup_stages().await;
        if let Err(error) = &result {
            self.state.last_error = Some(error.to_string());
            self.state.tauri_ready = false;
            self.state.ui_ready = false;
            self.publish();
        }
        result
    }

    async fn run_startup_stages(&mut self) -> anyhow::Result<()> {
        (self.load_config)().await?;
        self.state.config_ready = true;
        self.publish();

        (self.open_db)().await?;
        self.state.db_ready = true;
        self.publish();

        (self.build_connectors)().await?;
        self.state.connectors_ready = true;
        self.publish();

        (self.init_rate_limiter)().await?;
        self.state.rate_limiter_ready = true;
        self.publish();

        // Services are built here; they start after dependency checks.
        self.state.rest_ready = true;
        self.publish();
        self.state.websocket_ready = true;
        self.publish();

        if let Some(rehydrator) = &self.rehydrator {
            rehydrator.boot_rehydrate().await?;
        }
        self.state.rehydrated = true;
        self.state.strategy_enabled = true;
        self.state.execution_enabled = true;
        self.publish();

        for check in &self.dependency_health_checks {
            if !check.healthcheck().await {
                anyhow::bail!("required dependency healthcheck failed");
            }
        }

        if let Some(service) = &self.rest_service {
            service.start().await?;
        }
        if let Some(service) = &self.websocket_service {
            service.start().await?;
        }

        (self.start_consumers)().await?;
        self.state.consumers_ready = true;
        self.publish();

        (self.start_routes)().await?;
        self.state.routes_ready = true;
        self.state.tauri_ready = true;
        self.state.ui_ready = true;
        self.publish();

        Ok(())
    }

    /// Runs ordered shutdown, publishing each phase as it begins.
    ///
    /// # Errors
    ///
    /// Propagates the first failing phase hook.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.state.shutdown_phase = ShutdownPhase::StopIntake;
        self.publish();
        (self.stop_intake)().await?;

        self.state.shutdown_phase = ShutdownPhase::FlushQueue;
        self.publish();
        (self.flush_queue)().await?;

        self.state.shutdown_phase = ShutdownPhase::CloseConnectors;
        self.publish();
        (self.close_connectors)().await?;

        self.state.shutdown_phase = ShutdownPhase::CloseDb;
        self.publish();
        (self.close_db)().await?;

        if let Some(service) = &self.websocket_service {
            service.stop().await?;
        }
        if let Some(service) = &self.rest_service {
            service.stop().await?;
        }

        self.state.shutdown_phase = ShutdownPhase::Stopped;
        self.state.tauri_ready = false;
        self.state.ui_ready = false;
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        self.publisher.publish(&self.state);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    };

    use rstest::rstest;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingPublisher {
        snapshots: Mutex<Vec<Value>>,
    }

    impl ReadinessPublisher for RecordingPublisher {
        fn publish(&self, state: &LifecycleState) {
            self.snapshots.lock().unwrap().push(state.to_payload());
        }
    }

    #[derive(Debug, Default)]
    struct FakeService {
        started: AtomicBool,
        stopped: AtomicBool,
        fail_start: bool,
    }

    #[async_trait]
    impl LifecycleService for FakeService {
        async fn start(&self) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("service refused to start");
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FakeRehydrator {
        fail: bool,
        runs: AtomicU32,
    }

    #[async_trait]
    impl BootRehydrate for FakeRehydrator {
        async fn boot_rehydrate(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("rehydration exploded");
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FakeHealth {
        healthy: bool,
    }

    #[async_trait]
    impl DependencyHealth for FakeHealth {
        async fn healthcheck(&self) -> bool {
            self.healthy
        }
    }

    #[tokio::test]
    async fn test_successful_startup_publishes_each_stage() {
        let publisher = Arc::new(RecordingPublisher::default());
        let rest = Arc::new(FakeService::default());
        let websocket = Arc::new(FakeService::default());
        let rehydrator = Arc::new(FakeRehydrator {
            fail: false,
            runs: AtomicU32::new(0),
        });

        let mut root = SidecarCompositionRoot::new(Arc::clone(&publisher) as Arc<dyn ReadinessPublisher>)
            .with_rest_service(Arc::clone(&rest) as Arc<dyn LifecycleService>)
            .with_websocket_service(Arc::clone(&websocket) as Arc<dyn LifecycleService>)
            .with_rehydrator(Arc::clone(&rehydrator) as Arc<dyn BootRehydrate>)
            .with_health_check(Arc::new(FakeHealth { healthy: true }));

        root.start().await.unwrap();

        assert!(rest.started.load(Ordering::SeqCst));
        assert!(websocket.started.load(Ordering::SeqCst));
        assert_eq!(rehydrator.runs.load(Ordering::SeqCst), 1);

        let state = root.state();
        assert!(state.strategy_enabled);
        assert!(state.execution_enabled);
        assert!(state.tauri_ready);
        assert!(state.ui_ready);
        assert_eq!(state.last_error, None);

        let snapshots = publisher.snapshots.lock().unwrap();
        // config, db, connectors, rate limiter, rest built, ws built,
        // rehydrated, consumers, routes.
        assert_eq!(snapshots.len(), 9);
        assert_eq!(snapshots[0]["startup"]["config"], true);
        assert_eq!(snapshots[0]["startup"]["db"], false);
        assert_eq!(snapshots[6]["readiness"]["strategy"], true);
        assert_eq!(snapshots[8]["readiness"]["ui"], true);
    }

    #[tokio::test]
    async fn test_rehydration_failure_aborts_and_clears_readiness() {
        let publisher = Arc::new(RecordingPublisher::default());
        let rest = Arc::new(FakeService::default());

        let mut root = SidecarCompositionRoot::new(Arc::clone(&publisher) as Arc<dyn ReadinessPublisher>)
            .with_rest_service(Arc::clone(&rest) as Arc<dyn LifecycleService>)
            .with_rehydrator(Arc::new(FakeRehydrator {
                fail: true,
                runs: AtomicU32::new(0),
            }));

        let error = root.start().await.unwrap_err();
        assert!(error.to_string().contains("rehydration exploded"));

        let state = root.state();
        assert!(!state.rehydrated);
        assert!(!state.strategy_enabled);
        assert!(!state.tauri_ready);
        assert!(!state.ui_ready);
        assert_eq!(state.last_error, Some("rehydration exploded".to_string()));
        // The service built but never started.
        assert!(!rest.started.load(Ordering::SeqCst));

        let snapshots = publisher.snapshots.lock().unwrap();
        let last = snapshots.last().unwrap();
        assert_eq!(last["last_error"], "rehydration exploded");
        assert_eq!(last["readiness"]["ui"], false);
    }

    #[tokio::test]
    async fn test_failed_health_check_blocks_services_and_routes() {
        let publisher = Arc::new(RecordingPublisher::default());
        let rest = Arc::new(FakeService::default());
        let routes_started = Arc::new(AtomicBool::new(false));
        let routes_flag = Arc::clone(&routes_started);

        let mut root = SidecarCompositionRoot::new(publisher as Arc<dyn ReadinessPublisher>)
            .with_rest_service(Arc::clone(&rest) as Arc<dyn LifecycleService>)
            .with_health_check(Arc::new(FakeHealth { healthy: false }))
            .with_route_starter(Box::new(move || {
                let flag = Arc::clone(&routes_flag);
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }));

        let error = root.start().await.unwrap_err();
        assert!(error.to_string().contains("healthcheck failed"));
        assert!(!rest.started.load(Ordering::SeqCst));
        assert!(!routes_started.load(Ordering::SeqCst));
        assert!(!root.state().routes_ready);
    }

    #[tokio::test]
    async fn test_stage_failure_records_last_error() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut root = SidecarCompositionRoot::new(publisher as Arc<dyn ReadinessPublisher>)
            .with_db(Box::new(|| {
                Box::pin(async { anyhow::bail!("db is on fire") })
            }));

        let error = root.start().await.unwrap_err();
        assert!(error.to_string().contains("db is on fire"));
        assert!(root.state().config_ready);
        assert!(!root.state().db_ready);
    }

    #[tokio::test]
    async fn test_shutdown_runs_phases_in_order() {
        let publisher = Arc::new(RecordingPublisher::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        fn tracking_hook(order: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> StageHook {
            let order = Arc::clone(order);
            Box::new(move || {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                })
            })
        }

        let websocket = Arc::new(FakeService::default());
        let rest = Arc::new(FakeService::default());
        let mut root = SidecarCompositionRoot::new(Arc::clone(&publisher) as Arc<dyn ReadinessPublisher>)
            .with_websocket_service(Arc::clone(&websocket) as Arc<dyn LifecycleService>)
            .with_rest_service(Arc::clone(&rest) as Arc<dyn LifecycleService>)
            .with_stop_intake(tracking_hook(&order, "stop_intake"))
            .with_flush_queue(tracking_hook(&order, "flush_queue"))
            .with_close_connectors(tracking_hook(&order, "close_connectors"))
            .with_close_db(tracking_hook(&order, "close_db"));

        root.shutdown().await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["stop_intake", "flush_queue", "close_connectors", "close_db"]
        );
        assert!(websocket.stopped.load(Ordering::SeqCst));
        assert!(rest.stopped.load(Ordering::SeqCst));

        let state = root.state();
        assert_eq!(state.shutdown_phase, ShutdownPhase::Stopped);
        assert!(!state.ui_ready);

        let snapshots = publisher.snapshots.lock().unwrap();
        let phases: Vec<String> = snapshots
            .iter()
            .map(|snapshot| snapshot["shutdown_phase"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            phases,
            vec![
                "stop_intake",
                "flush_queue",
                "close_connectors",
                "close_db",
                "stopped"
            ]
        );
    }

    #[rstest]
    fn test_payload_shape() {
        let state = LifecycleState::default();
        let payload = state.to_payload();
        assert_eq!(payload["shutdown_phase"], "running");
        assert_eq!(payload["readiness"]["strategy"], false);
        assert_eq!(payload["startup"]["rehydrated"], false);
        assert_eq!(payload["last_error"], Value::Null);
    }
}
