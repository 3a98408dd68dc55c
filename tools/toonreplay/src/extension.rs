//! Activation lifetime of the engine and the toolbar commands.

use crate::config::ReplayConfig;
use crate::coordinator::{
    CoordinatorLink, ExecutionChannel, ExecutionCoordinator, FramePresenter, NotebookRunner,
    ReconnectGuard,
};
use crate::dom::OutputDom;
use crate::errors::ReplayError;
use crate::logging::ActivityLog;
use crate::notebook::{CellHandle, CellId, CellMetadata};
use crate::replay::recorder::Recorder;
use crate::replay::scheduler::ReplayScheduler;
use crate::replay::store::TrailStore;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

/// Host capabilities handed over at activation.
#[derive(Clone)]
pub struct HostBindings {
    pub dom: Arc<dyn OutputDom>,
    pub metadata: Arc<dyn CellMetadata>,
    pub channel: Arc<dyn ExecutionChannel>,
    pub runner: Arc<dyn NotebookRunner>,
    pub presenter: Arc<dyn FramePresenter>,
    pub log: Arc<dyn ActivityLog>,
}

/// One activation. Store, scheduler and recorder live exactly as long as this value.
pub struct Extension {
    store: Arc<TrailStore>,
    scheduler: Arc<ReplayScheduler>,
    recorder: Arc<Recorder>,
    link: Arc<CoordinatorLink>,
    channel: Arc<dyn ExecutionChannel>,
    runner: Arc<dyn NotebookRunner>,
    log: Arc<dyn ActivityLog>,
    pending_guard: Mutex<Option<Arc<ReconnectGuard>>>,
}

impl Extension {
    /// Wires the engine and subscribes the coordinator. Must run inside a Tokio runtime.
    pub fn activate(host: HostBindings, config: &ReplayConfig) -> Result<Self, ReplayError> {
        let runtime = Handle::try_current().map_err(|e| ReplayError::Runtime(e.to_string()))?;
        let output_class = config.dom.output_class.clone();

        let store = Arc::new(TrailStore::new(
            Arc::clone(&host.metadata),
            Arc::clone(&host.log),
        ));
        let scheduler = Arc::new(ReplayScheduler::new(
            Arc::clone(&store),
            Arc::clone(&host.dom),
            Arc::clone(&host.log),
            config.replay.clone(),
            output_class.clone(),
        ));
        let recorder = Arc::new(Recorder::new(
            Arc::clone(&store),
            Arc::clone(&host.dom),
            scheduler.status(),
            Arc::clone(&host.log),
            output_class,
        ));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::clone(&scheduler),
            Arc::clone(&host.metadata),
            Arc::clone(&host.presenter),
            config.coordinator.settle_delay(),
            runtime,
        ));
        let link = Arc::new(CoordinatorLink::new(Arc::clone(&host.channel), coordinator));
        link.attach();

        Ok(Self {
            store,
            scheduler,
            recorder,
            link,
            channel: host.channel,
            runner: host.runner,
            log: host.log,
            pending_guard: Mutex::new(None),
        })
    }

    /// Ends the activation: pending and running replays are dropped and
    /// nothing this activation installed stays subscribed. Idempotent.
    pub fn deactivate(&self) {
        self.scheduler.close();
        if let Some(guard) = self.pending_guard.lock().expect("guard slot lock").take() {
            guard.cancel();
        }
        self.link.close();
        self.recorder.disarm_all();
    }

    pub fn is_active(&self) -> bool {
        !self.scheduler.is_closed()
    }

    pub fn start_recording(&self, cell: &CellHandle) -> Result<(), ReplayError> {
        self.ensure_active()?;
        self.recorder.start_recording(cell);
        self.log.record(
            "info",
            "record_started",
            json!({"cell_id": cell.id.as_str()}),
        );
        Ok(())
    }

    pub fn stop_recording(&self, cell: &CellId) -> Result<(), ReplayError> {
        self.recorder.stop_recording(cell)?;
        let trail = self.store.get(cell);
        self.log.record(
            "info",
            "record_stopped",
            json!({
                "cell_id": cell.as_str(),
                "events": trail.len(),
                "clicks": trail.click_count(),
            }),
        );
        Ok(())
    }

    /// Clears and persists the trail, then re-runs the notebook with the
    /// coordinator detached until the re-run's notifications have passed.
    pub fn reset_cell(&self, cell: &CellId) -> Result<usize, ReplayError> {
        self.ensure_active()?;
        self.store.reset(cell);
        self.store.persist(cell)?;

        let mut slot = self.pending_guard.lock().expect("guard slot lock");
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        self.link.detach();
        let expected = match self.runner.rerun(cell) {
            Ok(expected) => expected,
            Err(error) => {
                self.link.attach();
                return Err(error);
            }
        };
        *slot = ReconnectGuard::install(
            Arc::clone(&self.link),
            Arc::clone(&self.channel),
            expected,
        );

        self.log.record(
            "info",
            "cell_reset",
            json!({"cell_id": cell.as_str(), "expected_notifications": expected}),
        );
        Ok(expected)
    }

    fn ensure_active(&self) -> Result<(), ReplayError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ReplayError::Deactivated)
        }
    }

    pub fn store(&self) -> &Arc<TrailStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<ReplayScheduler> {
        &self.scheduler
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn coordinator_attached(&self) -> bool {
        self.link.is_attached()
    }
}
