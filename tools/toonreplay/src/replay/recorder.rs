//! Captures pointer events on a cell's rendered outputs into its trail.
//!
//! The host owns the real listeners; it forwards whatever the armed nodes
//! receive to [`Recorder::on_element_event`] and document-level drag events
//! to [`Recorder::on_document_event`].

use crate::dom::{
    EventKind, NodeId, OutputDom, PointerEvent, Rect, DRAG_LISTENERS, ELEMENT_LISTENERS,
};
use crate::errors::ReplayError;
use crate::logging::ActivityLog;
use crate::notebook::{CellHandle, CellId};
use crate::replay::resolve::{descent_path, output_element, relative_position, stacked_output_of};
use crate::replay::scheduler::ReplayStatus;
use crate::replay::store::TrailStore;
use crate::replay::trail::TrailEvent;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What happened to one forwarded pointer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Recorded { cell: CellId, child_index: usize },
    /// A replay is dispatching; the event is most likely its own echo.
    Suppressed,
    /// The target is not inside any armed cell's outputs.
    Unresolved,
    /// Not a kind this entry point records, or no drag in progress.
    Ignored,
}

#[derive(Debug, Clone)]
struct ArmedCell {
    output_area: NodeId,
    armed_nodes: Vec<NodeId>,
}

/// Frozen at mousedown; the rest of the drag reuses it without re-resolving.
#[derive(Debug, Clone)]
struct DragAnchor {
    cell: CellId,
    child_index: usize,
    rect: Rect,
}

#[derive(Default)]
struct RecorderState {
    armed: HashMap<CellId, ArmedCell>,
    drag: Option<DragAnchor>,
}

pub struct Recorder {
    store: Arc<TrailStore>,
    dom: Arc<dyn OutputDom>,
    status: Arc<ReplayStatus>,
    log: Arc<dyn ActivityLog>,
    output_class: String,
    state: Mutex<RecorderState>,
}

impl Recorder {
    pub fn new(
        store: Arc<TrailStore>,
        dom: Arc<dyn OutputDom>,
        status: Arc<ReplayStatus>,
        log: Arc<dyn ActivityLog>,
        output_class: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dom,
            status,
            log,
            output_class: output_class.into(),
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Re-arms the cell: old listeners off, trail cleared, listeners on every
    /// current output sub-element.
    pub fn start_recording(&self, cell: &CellHandle) {
        let mut state = self.state.lock().expect("recorder lock");
        if let Some(previous) = state.armed.remove(&cell.id) {
            self.disarm_nodes(&previous);
        }
        if state.drag.as_ref().is_some_and(|anchor| anchor.cell == cell.id) {
            self.dom.detach_document_listeners(&DRAG_LISTENERS);
            state.drag = None;
        }

        self.store.reset(&cell.id);

        let armed_nodes = self
            .dom
            .children(cell.output_area)
            .into_iter()
            .map(|child| output_element(self.dom.as_ref(), child, &self.output_class))
            .collect::<Vec<_>>();
        for node in &armed_nodes {
            self.dom.attach_listeners(*node, &ELEMENT_LISTENERS);
        }
        state.armed.insert(
            cell.id.clone(),
            ArmedCell {
                output_area: cell.output_area,
                armed_nodes,
            },
        );
    }

    /// Persists the trail. Listeners stay armed until the next start or `disarm`.
    pub fn stop_recording(&self, cell: &CellId) -> Result<(), ReplayError> {
        self.store.persist(cell)
    }

    /// Drops the cell's listeners entirely, e.g. on extension teardown.
    pub fn disarm(&self, cell: &CellId) {
        let mut state = self.state.lock().expect("recorder lock");
        if let Some(previous) = state.armed.remove(cell) {
            self.disarm_nodes(&previous);
        }
        if state.drag.as_ref().is_some_and(|anchor| anchor.cell == *cell) {
            self.dom.detach_document_listeners(&DRAG_LISTENERS);
            state.drag = None;
        }
    }

    pub fn disarm_all(&self) {
        let mut state = self.state.lock().expect("recorder lock");
        for (_, previous) in state.armed.drain() {
            self.disarm_nodes(&previous);
        }
        if state.drag.take().is_some() {
            self.dom.detach_document_listeners(&DRAG_LISTENERS);
        }
    }

    pub fn is_armed(&self, cell: &CellId) -> bool {
        self.state
            .lock()
            .expect("recorder lock")
            .armed
            .contains_key(cell)
    }

    pub fn drag_in_progress(&self) -> bool {
        self.state.lock().expect("recorder lock").drag.is_some()
    }

    /// Handles a click, dblclick or mousedown seen by an armed output node.
    pub fn on_element_event(&self, event: &PointerEvent) -> CaptureOutcome {
        if !ELEMENT_LISTENERS.contains(&event.kind) {
            return CaptureOutcome::Ignored;
        }
        if self.status.is_replaying() {
            self.log_suppressed(event);
            return CaptureOutcome::Suppressed;
        }

        let mut state = self.state.lock().expect("recorder lock");
        let Some((cell, child_index, output)) = self.resolve_target(&state, event.target) else {
            self.log_unresolved(event, "target outside armed outputs");
            return CaptureOutcome::Unresolved;
        };
        let Some(rect) = self.dom.bounding_rect(output) else {
            self.log_unresolved(event, "output has no layout box");
            return CaptureOutcome::Unresolved;
        };

        let (relative_x, relative_y) = relative_position(&rect, event.client_x, event.client_y);
        let sample = TrailEvent {
            kind: event.kind,
            relative_x,
            relative_y,
            child_index,
        };

        if event.kind.is_click() {
            let dom = self.dom.as_ref();
            let under_pointer = dom
                .element_from_point(event.client_x, event.client_y)
                .unwrap_or(event.target);
            let path = descent_path(dom, under_pointer, output)
                .or_else(|| descent_path(dom, event.target, output))
                .unwrap_or_default();
            self.store
                .with_trail(&cell, |trail| trail.push_click(sample, path));
        } else {
            self.store.with_trail(&cell, |trail| trail.push(sample));
            if state.drag.is_none() {
                self.dom.attach_document_listeners(&DRAG_LISTENERS);
            }
            state.drag = Some(DragAnchor {
                cell: cell.clone(),
                child_index,
                rect,
            });
        }

        CaptureOutcome::Recorded { cell, child_index }
    }

    /// Handles document-level mousemove/mouseup while a drag is anchored.
    pub fn on_document_event(&self, event: &PointerEvent) -> CaptureOutcome {
        if !DRAG_LISTENERS.contains(&event.kind) {
            return CaptureOutcome::Ignored;
        }
        if self.status.is_replaying() {
            self.log_suppressed(event);
            return CaptureOutcome::Suppressed;
        }

        let mut state = self.state.lock().expect("recorder lock");
        let Some(anchor) = state.drag.clone() else {
            return CaptureOutcome::Ignored;
        };
        let (relative_x, relative_y) =
            relative_position(&anchor.rect, event.client_x, event.client_y);
        self.store.with_trail(&anchor.cell, |trail| {
            trail.push(TrailEvent {
                kind: event.kind,
                relative_x,
                relative_y,
                child_index: anchor.child_index,
            })
        });

        if event.kind == EventKind::MouseUp {
            self.dom.detach_document_listeners(&DRAG_LISTENERS);
            state.drag = None;
        }

        CaptureOutcome::Recorded {
            cell: anchor.cell,
            child_index: anchor.child_index,
        }
    }

    fn resolve_target(
        &self,
        state: &RecorderState,
        target: NodeId,
    ) -> Option<(CellId, usize, NodeId)> {
        let dom = self.dom.as_ref();
        state.armed.iter().find_map(|(cell, armed)| {
            let (index, child) = stacked_output_of(dom, armed.output_area, target)?;
            Some((cell.clone(), index, output_element(dom, child, &self.output_class)))
        })
    }

    fn disarm_nodes(&self, armed: &ArmedCell) {
        for node in &armed.armed_nodes {
            self.dom.detach_listeners(*node, &ELEMENT_LISTENERS);
        }
    }

    fn log_suppressed(&self, event: &PointerEvent) {
        self.log.record(
            "debug",
            "event_suppressed",
            json!({"kind": event.kind.as_str(), "target": event.target.0}),
        );
    }

    fn log_unresolved(&self, event: &PointerEvent, reason: &str) {
        self.log.record(
            "debug",
            "event_unresolved",
            json!({"kind": event.kind.as_str(), "target": event.target.0, "reason": reason}),
        );
    }
}
