use crate::errors::ReplayError;
use crate::logging::ActivityLog;
use crate::notebook::{CellId, CellMetadata};
use crate::replay::trail::ActionTrail;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct StoredTrail {
    trail: ActionTrail,
    /// Bumped on every reset so an in-flight replay can tell its copy is stale.
    generation: u64,
}

/// Registry of action trails keyed by cell, hydrated lazily from cell metadata.
///
/// Entries are never evicted; they live as long as the extension is active.
pub struct TrailStore {
    metadata: Arc<dyn CellMetadata>,
    log: Arc<dyn ActivityLog>,
    entries: Mutex<HashMap<CellId, StoredTrail>>,
}

impl TrailStore {
    pub fn new(metadata: Arc<dyn CellMetadata>, log: Arc<dyn ActivityLog>) -> Self {
        Self {
            metadata,
            log,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a copy of the cell's trail, creating (and hydrating) it on first use.
    pub fn get(&self, cell: &CellId) -> ActionTrail {
        self.with_trail(cell, |trail| trail.clone())
    }

    /// Whether the cell has nothing recorded, without copying the trail.
    pub fn is_empty(&self, cell: &CellId) -> bool {
        self.with_trail(cell, |trail| trail.is_empty())
    }

    /// Trail copy plus the generation it belongs to.
    pub fn snapshot(&self, cell: &CellId) -> (ActionTrail, u64) {
        let mut entries = self.entries.lock().expect("trail store lock");
        let entry = self.entry(&mut entries, cell);
        (entry.trail.clone(), entry.generation)
    }

    pub fn generation(&self, cell: &CellId) -> u64 {
        let mut entries = self.entries.lock().expect("trail store lock");
        self.entry(&mut entries, cell).generation
    }

    pub fn with_trail<R>(&self, cell: &CellId, f: impl FnOnce(&mut ActionTrail) -> R) -> R {
        let mut entries = self.entries.lock().expect("trail store lock");
        f(&mut self.entry(&mut entries, cell).trail)
    }

    /// Clears every sequence of the cell's trail; the entry itself stays.
    pub fn reset(&self, cell: &CellId) {
        let mut entries = self.entries.lock().expect("trail store lock");
        let entry = self.entry(&mut entries, cell);
        entry.trail.clear();
        entry.generation += 1;
    }

    /// Writes the in-memory trail back into the cell's metadata.
    pub fn persist(&self, cell: &CellId) -> Result<(), ReplayError> {
        let trail = self.get(cell);
        for (key, value) in trail.to_metadata()? {
            self.metadata.set(cell, key, value)?;
        }
        Ok(())
    }

    pub fn contains(&self, cell: &CellId) -> bool {
        self.entries
            .lock()
            .expect("trail store lock")
            .contains_key(cell)
    }

    fn entry<'a>(
        &self,
        entries: &'a mut HashMap<CellId, StoredTrail>,
        cell: &CellId,
    ) -> &'a mut StoredTrail {
        entries
            .entry(cell.clone())
            .or_insert_with(|| StoredTrail {
                trail: self.hydrate(cell),
                generation: 0,
            })
    }

    fn hydrate(&self, cell: &CellId) -> ActionTrail {
        match ActionTrail::from_metadata(|key| self.metadata.get(cell, key)) {
            Ok(Some(trail)) => trail,
            Ok(None) => ActionTrail::new(),
            Err(error) => {
                self.log.record(
                    "warn",
                    "trail_malformed",
                    json!({"cell_id": cell.as_str(), "error": error.to_string()}),
                );
                ActionTrail::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TrailStore;
    use crate::dom::EventKind;
    use crate::logging::MemoryLog;
    use crate::notebook::{CellId, CellKind, CellMetadata, InMemoryNotebook};
    use crate::replay::trail::{
        TrailEvent, CHILD_INDEX_KEY, CLICK_PATHS_KEY, EVENT_TYPE_KEY, RELATIVE_X_KEY,
        RELATIVE_Y_KEY,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn notebook_with(cell: &CellId) -> Arc<InMemoryNotebook> {
        let notebook = Arc::new(InMemoryNotebook::new());
        notebook.add_cell(cell, CellKind::Code);
        notebook
    }

    fn drag_sample(kind: EventKind) -> TrailEvent {
        TrailEvent {
            kind,
            relative_x: 0.5,
            relative_y: 0.125,
            child_index: 1,
        }
    }

    #[test]
    fn persist_then_fresh_store_round_trips() {
        let cell = CellId::new("c1");
        let notebook = notebook_with(&cell);
        let store = TrailStore::new(notebook.clone(), Arc::new(MemoryLog::new()));
        store.with_trail(&cell, |trail| {
            trail.push(drag_sample(EventKind::MouseDown));
            trail.push(drag_sample(EventKind::MouseUp));
            trail.push_click(drag_sample(EventKind::Click), vec![2, 0]);
        });
        store.persist(&cell).expect("persist");

        let reloaded = TrailStore::new(notebook, Arc::new(MemoryLog::new()));
        assert!(!reloaded.contains(&cell));
        assert_eq!(reloaded.get(&cell), store.get(&cell));
        assert!(reloaded.contains(&cell));
    }

    #[test]
    fn reset_clears_content_and_bumps_generation() {
        let cell = CellId::new("c1");
        let store = TrailStore::new(notebook_with(&cell), Arc::new(MemoryLog::new()));
        store.with_trail(&cell, |trail| trail.push(drag_sample(EventKind::MouseMove)));
        let before = store.generation(&cell);

        store.reset(&cell);

        let trail = store.get(&cell);
        assert!(trail.is_empty());
        assert_eq!(trail.click_count(), 0);
        assert_eq!(store.generation(&cell), before + 1);
    }

    #[test]
    fn in_memory_trail_wins_over_metadata_after_first_lookup() {
        let cell = CellId::new("c1");
        let notebook = notebook_with(&cell);
        let store = TrailStore::new(notebook.clone(), Arc::new(MemoryLog::new()));
        assert!(store.get(&cell).is_empty());

        notebook
            .set(&cell, EVENT_TYPE_KEY, json!(["mousedown"]))
            .expect("set");
        assert!(store.get(&cell).is_empty());
    }

    #[test]
    fn malformed_metadata_hydrates_empty_and_logs() {
        let cell = CellId::new("c1");
        let notebook = notebook_with(&cell);
        notebook
            .set(&cell, EVENT_TYPE_KEY, json!(["mousedown", "bogus"]))
            .expect("set");
        let log = Arc::new(MemoryLog::new());
        let store = TrailStore::new(notebook, log.clone());

        assert!(store.get(&cell).is_empty());
        assert_eq!(log.event_types(), vec!["trail_malformed"]);
    }

    #[test]
    fn persist_for_unknown_cell_is_an_error() {
        let notebook = Arc::new(InMemoryNotebook::new());
        let store = TrailStore::new(notebook, Arc::new(MemoryLog::new()));
        assert!(store.persist(&CellId::new("ghost")).is_err());
    }

    #[test]
    fn null_positions_hydrate_without_dropping_the_trail() {
        let cell = CellId::new("c1");
        let notebook = notebook_with(&cell);
        for (key, value) in [
            (EVENT_TYPE_KEY, json!(["mousedown", "mousemove", "mouseup"])),
            (RELATIVE_X_KEY, json!([0.1, null, 0.1])),
            (RELATIVE_Y_KEY, json!([0.1, null, 0.1])),
            (CHILD_INDEX_KEY, json!([0, 0, 0])),
            (CLICK_PATHS_KEY, json!([])),
        ] {
            notebook.set(&cell, key, value).expect("set");
        }
        let log = Arc::new(MemoryLog::new());
        let store = TrailStore::new(notebook, log.clone());

        assert_eq!(store.get(&cell).len(), 3);
        assert!(!store.is_empty(&cell));
        assert!(log.event_types().is_empty());
    }

    #[test]
    fn is_empty_tracks_recording_and_reset() {
        let cell = CellId::new("c1");
        let store = TrailStore::new(notebook_with(&cell), Arc::new(MemoryLog::new()));
        assert!(store.is_empty(&cell));
        store.with_trail(&cell, |trail| trail.push(drag_sample(EventKind::MouseDown)));
        assert!(!store.is_empty(&cell));
        store.reset(&cell);
        assert!(store.is_empty(&cell));
    }
}
