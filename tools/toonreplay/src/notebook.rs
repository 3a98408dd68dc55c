//! Host document model seam: per-cell metadata and cell kinds.

use crate::dom::NodeId;
use crate::errors::ReplayError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rendered cell: its identity plus the node holding its stacked outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellHandle {
    pub id: CellId,
    pub output_area: NodeId,
}

impl CellHandle {
    pub fn new(id: CellId, output_area: NodeId) -> Self {
        Self { id, output_area }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Code,
    Markdown,
    Raw,
}

impl CellKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code" => Some(Self::Code),
            "markdown" => Some(Self::Markdown),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

pub trait CellMetadata: Send + Sync {
    fn get(&self, cell: &CellId, key: &str) -> Option<Value>;
    fn set(&self, cell: &CellId, key: &str, value: Value) -> Result<(), ReplayError>;
    fn kind(&self, cell: &CellId) -> Option<CellKind>;

    fn tags(&self, cell: &CellId) -> Vec<String> {
        match self.get(cell, "tags") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct CellRecord {
    kind: CellKind,
    metadata: Map<String, Value>,
}

/// Metadata store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryNotebook {
    cells: Mutex<BTreeMap<CellId, CellRecord>>,
}

impl InMemoryNotebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cell(&self, id: &CellId, kind: CellKind) {
        self.cells.lock().expect("notebook lock").insert(
            id.clone(),
            CellRecord {
                kind,
                metadata: Map::new(),
            },
        );
    }

    pub fn set_tags(&self, id: &CellId, tags: &[&str]) -> Result<(), ReplayError> {
        let tags = tags.iter().map(|t| Value::String(t.to_string())).collect();
        self.set(id, "tags", Value::Array(tags))
    }

    pub fn metadata(&self, id: &CellId) -> Option<Map<String, Value>> {
        self.cells
            .lock()
            .expect("notebook lock")
            .get(id)
            .map(|record| record.metadata.clone())
    }
}

impl CellMetadata for InMemoryNotebook {
    fn get(&self, cell: &CellId, key: &str) -> Option<Value> {
        self.cells
            .lock()
            .expect("notebook lock")
            .get(cell)
            .and_then(|record| record.metadata.get(key).cloned())
    }

    fn set(&self, cell: &CellId, key: &str, value: Value) -> Result<(), ReplayError> {
        let mut cells = self.cells.lock().expect("notebook lock");
        let record = cells
            .get_mut(cell)
            .ok_or_else(|| ReplayError::UnknownCell(cell.to_string()))?;
        record.metadata.insert(key.to_string(), value);
        Ok(())
    }

    fn kind(&self, cell: &CellId) -> Option<CellKind> {
        self.cells
            .lock()
            .expect("notebook lock")
            .get(cell)
            .map(|record| record.kind)
    }
}

/// An nbformat-4 `.ipynb` document. Cells are addressed by their `id` field,
/// or `cell-<index>` for documents written before cell ids existed.
#[derive(Debug)]
pub struct NotebookDocument {
    root: Mutex<Value>,
}

impl NotebookDocument {
    pub fn parse(json: &str) -> Result<Self, ReplayError> {
        let root: Value =
            serde_json::from_str(json).map_err(|e| ReplayError::Notebook(e.to_string()))?;
        if !root.get("cells").is_some_and(Value::is_array) {
            return Err(ReplayError::Notebook(
                "notebook has no cells array".to_string(),
            ));
        }
        Ok(Self {
            root: Mutex::new(root),
        })
    }

    pub fn load(path: &Path, fs: &dyn FileSystem) -> Result<Self, ReplayError> {
        Self::parse(&fs.read_to_string(path)?)
    }

    pub fn save(&self, path: &Path, fs: &dyn FileSystem) -> Result<(), ReplayError> {
        let root = self.root.lock().expect("notebook lock");
        let mut rendered = serde_json::to_string_pretty(&*root)
            .map_err(|e| ReplayError::Notebook(e.to_string()))?;
        rendered.push('\n');
        fs.write_string(path, &rendered)
    }

    pub fn cell_ids(&self) -> Vec<CellId> {
        let root = self.root.lock().expect("notebook lock");
        cells(&root)
            .iter()
            .enumerate()
            .map(|(index, cell)| cell_id_of(cell, index))
            .collect()
    }

    fn with_cell<R>(&self, id: &CellId, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        let mut root = self.root.lock().expect("notebook lock");
        let cells = root.get_mut("cells")?.as_array_mut()?;
        cells
            .iter_mut()
            .enumerate()
            .find(|(index, cell)| cell_id_of(cell, *index) == *id)
            .map(|(_, cell)| f(cell))
    }
}

fn cells(root: &Value) -> &[Value] {
    root.get("cells")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn cell_id_of(cell: &Value, index: usize) -> CellId {
    match cell.get("id").and_then(Value::as_str) {
        Some(id) => CellId::new(id),
        None => CellId::new(format!("cell-{index}")),
    }
}

impl CellMetadata for NotebookDocument {
    fn get(&self, cell: &CellId, key: &str) -> Option<Value> {
        self.with_cell(cell, |value| value.get("metadata")?.get(key).cloned())
            .flatten()
    }

    fn set(&self, cell: &CellId, key: &str, value: Value) -> Result<(), ReplayError> {
        self.with_cell(cell, |entry| {
            let Some(object) = entry.as_object_mut() else {
                return Err(ReplayError::Notebook(format!("cell {cell} is not an object")));
            };
            let metadata = object
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(metadata) = metadata.as_object_mut() else {
                return Err(ReplayError::Notebook(format!(
                    "cell {cell} metadata is not an object"
                )));
            };
            metadata.insert(key.to_string(), value);
            Ok(())
        })
        .ok_or_else(|| ReplayError::UnknownCell(cell.to_string()))?
    }

    fn kind(&self, cell: &CellId) -> Option<CellKind> {
        self.with_cell(cell, |value| {
            value
                .get("cell_type")
                .and_then(Value::as_str)
                .and_then(CellKind::parse)
        })
        .flatten()
    }
}
