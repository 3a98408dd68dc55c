use std::path::Path;
use std::sync::Arc;
use toonreplay::config::ReplaySettings;
use toonreplay::dom::fixture::FixtureDom;
use toonreplay::dom::{EventKind, NodeId, PointerEvent, Rect};
use toonreplay::logging::MemoryLog;
use toonreplay::notebook::{CellHandle, CellId, CellMetadata, NotebookDocument};
use toonreplay::replay::recorder::{CaptureOutcome, Recorder};
use toonreplay::replay::scheduler::ReplayScheduler;
use toonreplay::replay::store::TrailStore;
use toonreplay::replay::trail::{CHILD_INDEX_KEY, CLICK_PATHS_KEY, EVENT_TYPE_KEY};
use toonreplay::runtime::FakeFileSystem;

const OUTPUT_CLASS: &str = "jp-OutputArea-output";

const EMPTY_NOTEBOOK: &str = r#"{
    "nbformat": 4, "nbformat_minor": 5, "metadata": {},
    "cells": [
        {"id": "plot", "cell_type": "code", "metadata": {}, "source": [],
         "outputs": [], "execution_count": 1}
    ]
}"#;

/// Three stacked outputs, each 200x100, one under the other.
fn stacked_layout(dom: &FixtureDom) -> (NodeId, Vec<NodeId>) {
    let area = dom.add_node(None, &["jp-OutputArea"], None);
    let outputs = (0..3)
        .map(|row| {
            let rect = Rect::new(0.0, f64::from(row) * 100.0, 200.0, 100.0);
            let child = dom.add_node(Some(area), &["jp-OutputArea-child"], Some(rect));
            dom.add_node(Some(child), &[OUTPUT_CLASS], Some(rect))
        })
        .collect();
    (area, outputs)
}

fn pointer(kind: EventKind, target: NodeId, x: f64, y: f64) -> PointerEvent {
    PointerEvent {
        kind,
        target,
        client_x: x,
        client_y: y,
    }
}

fn recorder_for(
    document: Arc<NotebookDocument>,
    dom: &FixtureDom,
) -> (Arc<TrailStore>, Recorder, Arc<ReplayScheduler>) {
    let log = Arc::new(MemoryLog::new());
    let store = Arc::new(TrailStore::new(document, log.clone()));
    let scheduler = Arc::new(ReplayScheduler::new(
        store.clone(),
        Arc::new(dom.clone()),
        log.clone(),
        ReplaySettings::default(),
        OUTPUT_CLASS,
    ));
    let recorder = Recorder::new(
        store.clone(),
        Arc::new(dom.clone()),
        scheduler.status(),
        log,
        OUTPUT_CLASS,
    );
    (store, recorder, scheduler)
}

#[test]
fn drag_is_pinned_to_the_mousedown_output_and_survives_save() {
    let dom = FixtureDom::new();
    let (area, outputs) = stacked_layout(&dom);
    let document = Arc::new(NotebookDocument::parse(EMPTY_NOTEBOOK).expect("notebook"));
    let (_store, recorder, _scheduler) = recorder_for(document.clone(), &dom);
    let cell = CellHandle::new(CellId::new("plot"), area);

    recorder.start_recording(&cell);
    recorder.on_element_event(&pointer(EventKind::MouseDown, outputs[2], 50.0, 250.0));
    // Moves wander across the other outputs; they must not re-resolve.
    recorder.on_document_event(&pointer(EventKind::MouseMove, outputs[0], 60.0, 20.0));
    recorder.on_document_event(&pointer(EventKind::MouseMove, outputs[1], 70.0, 120.0));
    let last = recorder.on_document_event(&pointer(EventKind::MouseUp, outputs[1], 70.0, 120.0));
    assert_eq!(
        last,
        CaptureOutcome::Recorded {
            cell: cell.id.clone(),
            child_index: 2
        }
    );
    recorder.stop_recording(&cell.id).expect("persist");

    assert_eq!(
        document.get(&cell.id, CHILD_INDEX_KEY),
        Some(serde_json::json!([2, 2, 2, 2]))
    );
    assert_eq!(
        document.get(&cell.id, EVENT_TYPE_KEY),
        Some(serde_json::json!(["mousedown", "mousemove", "mousemove", "mouseup"]))
    );

    let fs = FakeFileSystem::default();
    document
        .save(Path::new("/saved.ipynb"), &fs)
        .expect("save");
    let reloaded = Arc::new(
        NotebookDocument::load(Path::new("/saved.ipynb"), &fs).expect("reload"),
    );
    let (fresh_store, _, _) = recorder_for(reloaded, &dom);
    let trail = fresh_store.get(&cell.id);
    assert_eq!(trail.len(), 4);
    let second = trail.event(1).expect("first move");
    assert_eq!((second.relative_x, second.relative_y), (0.3, -1.8));
}

#[test]
fn second_mousedown_does_not_stack_document_listeners() {
    let dom = FixtureDom::new();
    let (area, outputs) = stacked_layout(&dom);
    let document = Arc::new(NotebookDocument::parse(EMPTY_NOTEBOOK).expect("notebook"));
    let (_store, recorder, _scheduler) = recorder_for(document, &dom);
    recorder.start_recording(&CellHandle::new(CellId::new("plot"), area));

    recorder.on_element_event(&pointer(EventKind::MouseDown, outputs[0], 10.0, 10.0));
    recorder.on_element_event(&pointer(EventKind::MouseDown, outputs[1], 10.0, 110.0));
    assert_eq!(dom.document_attach_count(), 1);

    recorder.on_document_event(&pointer(EventKind::MouseUp, outputs[1], 10.0, 110.0));
    assert!(dom.document_listeners().is_empty());
    assert_eq!(
        recorder.on_document_event(&pointer(EventKind::MouseMove, outputs[1], 10.0, 110.0)),
        CaptureOutcome::Ignored
    );
}

#[tokio::test(start_paused = true)]
async fn recorded_click_replays_onto_the_same_nested_element_after_relayout() {
    let dom = FixtureDom::new();
    let (area, outputs) = stacked_layout(&dom);
    let output = outputs[1];
    let _axis = dom.add_node(Some(output), &[], Some(Rect::new(0.0, 100.0, 20.0, 100.0)));
    let legend = dom.add_node(Some(output), &[], Some(Rect::new(150.0, 100.0, 50.0, 50.0)));
    let _swatch = dom.add_node(Some(legend), &[], Some(Rect::new(150.0, 100.0, 10.0, 10.0)));
    let entry = dom.add_node(Some(legend), &[], Some(Rect::new(160.0, 110.0, 30.0, 10.0)));

    let document = Arc::new(NotebookDocument::parse(EMPTY_NOTEBOOK).expect("notebook"));
    let (store, recorder, scheduler) = recorder_for(document, &dom);
    let cell = CellHandle::new(CellId::new("plot"), area);
    recorder.start_recording(&cell);
    recorder.on_element_event(&pointer(EventKind::Click, output, 170.0, 115.0));
    recorder.stop_recording(&cell.id).expect("persist");
    assert_eq!(store.get(&cell.id).click_path(0), Some(&[1usize, 1][..]));

    // Re-render: the legend moves to the left edge; the click must follow it.
    dom.set_rect(legend, Some(Rect::new(0.0, 150.0, 50.0, 50.0)));
    dom.set_rect(entry, Some(Rect::new(10.0, 160.0, 30.0, 10.0)));

    scheduler
        .enqueue(cell.clone())
        .finished()
        .await
        .expect("report");
    let dispatched = dom.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].node, entry);
    let event = dispatched[0].event;
    assert!(event.client_x >= 10.0 && event.client_x < 40.0);
    assert!(event.client_y >= 160.0 && event.client_y < 170.0);
}

#[test]
fn persisted_keys_cover_every_parallel_sequence() {
    let dom = FixtureDom::new();
    let (area, outputs) = stacked_layout(&dom);
    let document = Arc::new(NotebookDocument::parse(EMPTY_NOTEBOOK).expect("notebook"));
    let (_store, recorder, _scheduler) = recorder_for(document.clone(), &dom);
    let cell = CellHandle::new(CellId::new("plot"), area);

    recorder.start_recording(&cell);
    recorder.on_element_event(&pointer(EventKind::DblClick, outputs[0], 100.0, 50.0));
    recorder.stop_recording(&cell.id).expect("persist");

    for key in [
        EVENT_TYPE_KEY,
        "relativeMousePosXArray",
        "relativeMousePosYArray",
        CHILD_INDEX_KEY,
        CLICK_PATHS_KEY,
    ] {
        assert!(document.get(&cell.id, key).is_some(), "missing {key}");
    }
    assert_eq!(
        document.get(&cell.id, CLICK_PATHS_KEY),
        Some(serde_json::json!([[]]))
    );
}
