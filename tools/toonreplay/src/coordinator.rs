//! Turns cell-execution notifications into replay jobs.

use crate::errors::ReplayError;
use crate::notebook::{CellHandle, CellId, CellKind, CellMetadata};
use crate::replay::scheduler::{ReplayReport, ReplayScheduler};
use crate::tags::ComicTags;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// "Cell finished executing", as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellExecuted {
    pub cell: CellHandle,
    pub kind: CellKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub trait ExecutionHandler: Send + Sync {
    fn on_cell_executed(&self, event: &CellExecuted);
}

/// Host subscription point for execution notifications.
pub trait ExecutionChannel: Send + Sync {
    fn connect(&self, handler: Arc<dyn ExecutionHandler>) -> SubscriptionId;
    /// Returns false when `id` was not connected.
    fn disconnect(&self, id: SubscriptionId) -> bool;
}

/// The cosmetic layer that lays a cell out as a comic frame.
pub trait FramePresenter: Send + Sync {
    fn apply_final_frame(&self, cell: &CellId, tags: &ComicTags);
}

pub trait NotebookRunner: Send + Sync {
    /// Starts re-running the notebook for `cell`'s reset and returns how many
    /// execution notifications that run will deliver. Notifications arrive
    /// after this returns.
    fn rerun(&self, cell: &CellId) -> Result<usize, ReplayError>;
}

/// In-process channel. `emit` delivers to a snapshot of the subscribers, so
/// handlers may connect or disconnect while being notified.
#[derive(Default)]
pub struct LocalExecutionChannel {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<dyn ExecutionHandler>)>>,
}

impl LocalExecutionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: &CellExecuted) -> usize {
        let snapshot = self
            .subscribers
            .lock()
            .expect("channel lock")
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect::<Vec<_>>();
        for handler in &snapshot {
            handler.on_cell_executed(event);
        }
        snapshot.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("channel lock").len()
    }
}

impl ExecutionChannel for LocalExecutionChannel {
    fn connect(&self, handler: Arc<dyn ExecutionHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .expect("channel lock")
            .push((id, handler));
        id
    }

    fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().expect("channel lock");
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }
}

/// Settles, enqueues a replay, then applies the cell's final comic frame.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    scheduler: Arc<ReplayScheduler>,
    metadata: Arc<dyn CellMetadata>,
    presenter: Arc<dyn FramePresenter>,
    settle_delay: Duration,
    runtime: Handle,
}

impl ExecutionCoordinator {
    pub fn new(
        scheduler: Arc<ReplayScheduler>,
        metadata: Arc<dyn CellMetadata>,
        presenter: Arc<dyn FramePresenter>,
        settle_delay: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            scheduler,
            metadata,
            presenter,
            settle_delay,
            runtime,
        }
    }

    /// Spawns the settle/replay/present task for a code cell; other kinds are ignored.
    pub fn handle_execution(
        &self,
        event: &CellExecuted,
    ) -> Option<JoinHandle<Option<ReplayReport>>> {
        if event.kind != CellKind::Code {
            return None;
        }
        let coordinator = self.clone();
        let cell = event.cell.clone();
        Some(self.runtime.spawn(async move { coordinator.replay_then_present(cell).await }))
    }

    async fn replay_then_present(&self, cell: CellHandle) -> Option<ReplayReport> {
        tokio::time::sleep(self.settle_delay).await;
        // Deactivated while settling.
        if self.scheduler.is_closed() {
            return None;
        }
        let ticket = self.scheduler.enqueue(cell.clone());
        // Joining a drain already in flight: present now, the replay finishes on its own.
        let report = if ticket.started_idle() {
            ticket.finished().await
        } else {
            None
        };
        if !self.scheduler.is_closed() {
            self.present(&cell.id);
        }
        report
    }

    fn present(&self, cell: &CellId) {
        let tags = ComicTags::parse(&self.metadata.tags(cell));
        if tags.is_comic_cell() {
            self.presenter.apply_final_frame(cell, &tags);
        }
    }
}

impl ExecutionHandler for ExecutionCoordinator {
    fn on_cell_executed(&self, event: &CellExecuted) {
        let _ = self.handle_execution(event);
    }
}

#[derive(Default)]
struct LinkState {
    subscription: Option<SubscriptionId>,
    closed: bool,
}

/// The coordinator's subscription, detachable around a reset re-run.
/// Once closed it never attaches again.
pub struct CoordinatorLink {
    channel: Arc<dyn ExecutionChannel>,
    handler: Arc<dyn ExecutionHandler>,
    state: Mutex<LinkState>,
}

impl CoordinatorLink {
    pub fn new(channel: Arc<dyn ExecutionChannel>, handler: Arc<dyn ExecutionHandler>) -> Self {
        Self {
            channel,
            handler,
            state: Mutex::new(LinkState::default()),
        }
    }

    /// Returns false if already attached or closed.
    pub fn attach(&self) -> bool {
        let mut state = self.state.lock().expect("link lock");
        if state.closed || state.subscription.is_some() {
            return false;
        }
        state.subscription = Some(self.channel.connect(Arc::clone(&self.handler)));
        true
    }

    pub fn detach(&self) -> bool {
        match self.state.lock().expect("link lock").subscription.take() {
            Some(id) => self.channel.disconnect(id),
            None => false,
        }
    }

    /// Detaches and refuses every later `attach`.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("link lock");
        state.closed = true;
        if let Some(id) = state.subscription.take() {
            self.channel.disconnect(id);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().expect("link lock").subscription.is_some()
    }
}

/// Swallows the notifications of a reset re-run, then re-attaches the coordinator.
pub struct ReconnectGuard {
    link: Arc<CoordinatorLink>,
    channel: Arc<dyn ExecutionChannel>,
    remaining: Mutex<usize>,
    own_subscription: OnceLock<SubscriptionId>,
}

impl ReconnectGuard {
    /// Re-attaches immediately and returns `None` when `expected` is 0.
    pub fn install(
        link: Arc<CoordinatorLink>,
        channel: Arc<dyn ExecutionChannel>,
        expected: usize,
    ) -> Option<Arc<Self>> {
        if expected == 0 {
            link.attach();
            return None;
        }
        let guard = Arc::new(Self {
            link,
            channel: Arc::clone(&channel),
            remaining: Mutex::new(expected),
            own_subscription: OnceLock::new(),
        });
        let id = channel.connect(guard.clone());
        let _ = guard.own_subscription.set(id);
        Some(guard)
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock().expect("guard lock")
    }

    /// Drops the guard without re-attaching, e.g. on deactivation.
    pub fn cancel(&self) {
        *self.remaining.lock().expect("guard lock") = 0;
        if let Some(id) = self.own_subscription.get() {
            self.channel.disconnect(*id);
        }
    }
}

impl ExecutionHandler for ReconnectGuard {
    fn on_cell_executed(&self, _event: &CellExecuted) {
        let mut remaining = self.remaining.lock().expect("guard lock");
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining > 0 {
            return;
        }
        drop(remaining);
        if let Some(id) = self.own_subscription.get() {
            self.channel.disconnect(*id);
        }
        self.link.attach();
    }
}
