//! Single-flight replay of queued trails.
//!
//! `enqueue` appends a job; if nothing is draining it spawns one drain task
//! that pops jobs in FIFO order and steps through each trail with a fixed
//! delay between events. Only the drain task clears the status flags.
//! `close` ends the scheduler for good: queued and in-flight jobs report
//! `Superseded` and later enqueues are refused.

use crate::config::ReplaySettings;
use crate::dom::{EventKind, NodeId, OutputDom, Rect, SyntheticEvent};
use crate::logging::ActivityLog;
use crate::notebook::{CellHandle, CellId};
use crate::replay::resolve::{absolute_position, descend, output_element};
use crate::replay::store::TrailStore;
use crate::replay::trail::TrailEvent;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Flags shared with the recorder, which only reads them.
#[derive(Debug, Default)]
pub struct ReplayStatus {
    dispatching: AtomicBool,
    replaying: AtomicBool,
}

impl ReplayStatus {
    /// A drain task is running.
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    /// True from drain start until the queue is empty; recorder input is ignored.
    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    pub(crate) fn set_dispatching(&self, value: bool) {
        self.dispatching.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_replaying(&self, value: bool) {
        self.replaying.store(value, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    Completed,
    /// Nothing recorded; no step ran.
    Empty,
    /// The trail was reset or re-recorded mid-replay, or the scheduler was
    /// closed; remaining steps dropped.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub cell: CellId,
    pub dispatched: usize,
    pub skipped: usize,
    pub outcome: ReplayOutcome,
}

impl ReplayReport {
    fn new(cell: CellId, outcome: ReplayOutcome) -> Self {
        Self {
            cell,
            dispatched: 0,
            skipped: 0,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The sample was persisted without a usable position.
    NoPosition,
    MissingChild,
    NoLayoutBox,
    PathMismatch,
    NoHitTarget,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPosition => "no_position",
            Self::MissingChild => "missing_child",
            Self::NoLayoutBox => "no_layout_box",
            Self::PathMismatch => "path_mismatch",
            Self::NoHitTarget => "no_hit_target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Dispatched { node: NodeId, event: SyntheticEvent },
    Skipped(SkipReason),
}

/// Completion handle for one enqueued job.
#[derive(Debug)]
pub struct ReplayTicket {
    started_idle: bool,
    done: oneshot::Receiver<ReplayReport>,
}

impl ReplayTicket {
    /// Whether the scheduler was idle when this job was enqueued.
    pub fn started_idle(&self) -> bool {
        self.started_idle
    }

    /// Resolves once the job's trail has been fully stepped (or dropped).
    /// `None` only if the drain task died before reaching the job.
    pub async fn finished(self) -> Option<ReplayReport> {
        self.done.await.ok()
    }
}

struct ReplayJob {
    cell: CellHandle,
    done: oneshot::Sender<ReplayReport>,
}

pub struct ReplayScheduler {
    store: Arc<TrailStore>,
    dom: Arc<dyn OutputDom>,
    log: Arc<dyn ActivityLog>,
    settings: ReplaySettings,
    output_class: String,
    status: Arc<ReplayStatus>,
    queue: Mutex<VecDeque<ReplayJob>>,
    closed: AtomicBool,
}

impl ReplayScheduler {
    pub fn new(
        store: Arc<TrailStore>,
        dom: Arc<dyn OutputDom>,
        log: Arc<dyn ActivityLog>,
        settings: ReplaySettings,
        output_class: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dom,
            log,
            settings,
            output_class: output_class.into(),
            status: Arc::new(ReplayStatus::default()),
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> Arc<ReplayStatus> {
        Arc::clone(&self.status)
    }

    pub fn is_idle(&self) -> bool {
        !self.status.is_dispatching()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().expect("replay queue lock").len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drops every queued job and stops the in-flight one at its next step.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = self
            .queue
            .lock()
            .expect("replay queue lock")
            .drain(..)
            .collect::<Vec<_>>();
        let count = dropped.len();
        for job in dropped {
            let _ = job
                .done
                .send(ReplayReport::new(job.cell.id, ReplayOutcome::Superseded));
        }
        self.log
            .record("info", "scheduler_closed", json!({"dropped": count}));
    }

    /// Queues a replay of `cell`'s trail against its output area.
    ///
    /// Must be called from within a Tokio runtime: starting a drain spawns a task.
    pub fn enqueue(self: &Arc<Self>, cell: CellHandle) -> ReplayTicket {
        let (done, rx) = oneshot::channel();
        let mut queue = self.queue.lock().expect("replay queue lock");
        if self.is_closed() {
            let _ = done.send(ReplayReport::new(cell.id, ReplayOutcome::Superseded));
            return ReplayTicket {
                started_idle: false,
                done: rx,
            };
        }
        let idle = !self.status.is_dispatching();

        if idle && queue.is_empty() && self.store.is_empty(&cell.id) {
            let _ = done.send(ReplayReport::new(cell.id, ReplayOutcome::Empty));
            return ReplayTicket {
                started_idle: true,
                done: rx,
            };
        }

        queue.push_back(ReplayJob { cell, done });
        if idle {
            self.status.set_dispatching(true);
            self.status.set_replaying(true);
            drop(queue);
            self.log
                .record("info", "drain_started", json!({"queued": self.queued()}));
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.drain().await });
        }

        ReplayTicket {
            started_idle: idle,
            done: rx,
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let job = {
                let mut queue = self.queue.lock().expect("replay queue lock");
                match queue.pop_front() {
                    Some(job) => job,
                    None => {
                        self.status.set_replaying(false);
                        self.status.set_dispatching(false);
                        break;
                    }
                }
            };
            let report = self.replay_job(&job.cell).await;
            let _ = job.done.send(report);
        }
        self.log.record("info", "drain_idle", json!({}));
    }

    async fn replay_job(&self, cell: &CellHandle) -> ReplayReport {
        let (trail, generation) = self.store.snapshot(&cell.id);
        if trail.is_empty() {
            return ReplayReport::new(cell.id.clone(), ReplayOutcome::Empty);
        }
        self.log.record(
            "info",
            "job_started",
            json!({"cell_id": cell.id.as_str(), "events": trail.len()}),
        );

        let mut report = ReplayReport::new(cell.id.clone(), ReplayOutcome::Completed);
        let mut click_index = 0;
        for (index, event) in trail.events().enumerate() {
            tokio::time::sleep(self.settings.step_delay()).await;

            if self.is_closed() {
                self.log.record(
                    "info",
                    "job_cancelled",
                    json!({"cell_id": cell.id.as_str(), "step": index}),
                );
                report.outcome = ReplayOutcome::Superseded;
                break;
            }
            if self.store.generation(&cell.id) != generation {
                self.log.record(
                    "warn",
                    "trail_superseded",
                    json!({"cell_id": cell.id.as_str(), "step": index}),
                );
                report.outcome = ReplayOutcome::Superseded;
                break;
            }

            // The click cursor advances even when the step is skipped, so later
            // clicks keep their own paths.
            let click_path = if event.kind.is_click() {
                click_index += 1;
                trail.click_path(click_index - 1)
            } else {
                None
            };

            match self.step(cell.output_area, &event, click_path) {
                StepOutcome::Dispatched { .. } => report.dispatched += 1,
                StepOutcome::Skipped(reason) => {
                    report.skipped += 1;
                    self.log.record(
                        "debug",
                        "step_skipped",
                        json!({
                            "cell_id": cell.id.as_str(),
                            "step": index,
                            "kind": event.kind.as_str(),
                            "reason": reason.as_str(),
                        }),
                    );
                }
            }
        }

        self.log.record(
            "info",
            "job_finished",
            json!({
                "cell_id": cell.id.as_str(),
                "dispatched": report.dispatched,
                "skipped": report.skipped,
                "outcome": report.outcome,
            }),
        );
        report
    }

    /// Replays one sample against the output area's current layout.
    pub fn step(
        &self,
        output_area: NodeId,
        event: &TrailEvent,
        click_path: Option<&[usize]>,
    ) -> StepOutcome {
        if !event.has_position() {
            return StepOutcome::Skipped(SkipReason::NoPosition);
        }
        let dom = self.dom.as_ref();
        let Some(child) = dom.child_at(output_area, event.child_index) else {
            return StepOutcome::Skipped(SkipReason::MissingChild);
        };
        let output = output_element(dom, child, &self.output_class);
        dom.scroll_into_view(output);
        let Some(rect) = dom.bounding_rect(output).filter(Rect::is_finite) else {
            return StepOutcome::Skipped(SkipReason::NoLayoutBox);
        };
        let (x, y) = absolute_position(&rect, event.relative_x, event.relative_y);

        if event.kind.is_click() {
            let Some(target) = descend(dom, output, click_path.unwrap_or_default()) else {
                return StepOutcome::Skipped(SkipReason::PathMismatch);
            };
            let (x, y) = match dom.bounding_rect(target).filter(Rect::is_finite) {
                Some(bounds) if !bounds.is_degenerate(self.settings.degenerate_box_px) => {
                    bounds.clamp_point(x, y)
                }
                bounds => {
                    let origin = bounds.unwrap_or(rect);
                    self.log.record(
                        "debug",
                        "degenerate_box",
                        json!({"node": target.0, "width": origin.width, "height": origin.height}),
                    );
                    (
                        origin.left + self.settings.fallback_offset_px,
                        origin.top + self.settings.fallback_offset_px,
                    )
                }
            };
            return self.fire(target, event.kind, x, y);
        }

        match dom.element_from_point(x, y) {
            Some(target) => self.fire(target, event.kind, x, y),
            None => StepOutcome::Skipped(SkipReason::NoHitTarget),
        }
    }

    fn fire(&self, node: NodeId, kind: EventKind, client_x: f64, client_y: f64) -> StepOutcome {
        let event = SyntheticEvent {
            kind,
            client_x,
            client_y,
            bubbles: true,
        };
        self.dom.dispatch(node, &event);
        StepOutcome::Dispatched { node, event }
    }
}
