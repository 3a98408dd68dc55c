use crate::dom::{EventKind, NodeId, OutputDom, Rect, SyntheticEvent};
use crate::errors::ReplayError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Serializable tree description of a fixture DOM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureNodeSpec {
    pub id: u64,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub children: Vec<FixtureNodeSpec>,
}

/// A layout file: a DOM tree plus the node that plays a cell's output area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureLayout {
    pub output_area: u64,
    pub root: FixtureNodeSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    pub node: NodeId,
    pub event: SyntheticEvent,
}

type DispatchHook = Arc<dyn Fn(NodeId, &SyntheticEvent) + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct FixtureNode {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    classes: Vec<String>,
    rect: Option<Rect>,
}

#[derive(Default)]
struct FixtureState {
    nodes: BTreeMap<NodeId, FixtureNode>,
    roots: Vec<NodeId>,
    next_id: u64,
    listeners: BTreeMap<NodeId, BTreeSet<EventKind>>,
    document_listeners: BTreeSet<EventKind>,
    document_attach_count: usize,
    dispatched: Vec<DispatchedEvent>,
    scrolled: Vec<NodeId>,
}

/// In-memory DOM used by tests and by the `simulate` command.
#[derive(Default, Clone)]
pub struct FixtureDom {
    state: Arc<Mutex<FixtureState>>,
    hook: Arc<Mutex<Option<DispatchHook>>>,
}

impl FixtureDom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_layout(layout: &FixtureLayout) -> Result<(Self, NodeId), ReplayError> {
        let dom = Self::new();
        dom.insert_spec(None, &layout.root)?;
        let output_area = NodeId(layout.output_area);
        if !dom.contains(output_area) {
            return Err(ReplayError::Fixture(format!(
                "output_area {} is not part of the layout",
                layout.output_area
            )));
        }
        Ok((dom, output_area))
    }

    pub fn parse_layout(json: &str) -> Result<(Self, NodeId), ReplayError> {
        let layout: FixtureLayout =
            serde_json::from_str(json).map_err(|e| ReplayError::Fixture(e.to_string()))?;
        Self::from_layout(&layout)
    }

    fn insert_spec(&self, parent: Option<NodeId>, spec: &FixtureNodeSpec) -> Result<(), ReplayError> {
        let id = NodeId(spec.id);
        {
            let mut state = self.state.lock().expect("fixture lock");
            if state.nodes.contains_key(&id) {
                return Err(ReplayError::Fixture(format!("duplicate node id {}", spec.id)));
            }
            state.next_id = state.next_id.max(spec.id + 1);
            state.nodes.insert(
                id,
                FixtureNode {
                    parent,
                    children: Vec::new(),
                    classes: spec.classes.clone(),
                    rect: spec.rect,
                },
            );
            link_child(&mut state, parent, id);
        }
        for child in &spec.children {
            self.insert_spec(Some(id), child)?;
        }
        Ok(())
    }

    /// Appends a node under `parent` (or as a new root) and returns its id.
    pub fn add_node(&self, parent: Option<NodeId>, classes: &[&str], rect: Option<Rect>) -> NodeId {
        let mut state = self.state.lock().expect("fixture lock");
        state.next_id = state.next_id.max(1);
        let id = NodeId(state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id,
            FixtureNode {
                parent,
                children: Vec::new(),
                classes: classes.iter().map(|c| c.to_string()).collect(),
                rect,
            },
        );
        link_child(&mut state, parent, id);
        id
    }

    pub fn set_rect(&self, node: NodeId, rect: Option<Rect>) {
        if let Some(entry) = self.state.lock().expect("fixture lock").nodes.get_mut(&node) {
            entry.rect = rect;
        }
    }

    /// Detaches every child subtree of `node`, as a re-render would.
    pub fn clear_children(&self, node: NodeId) {
        let mut state = self.state.lock().expect("fixture lock");
        let Some(entry) = state.nodes.get_mut(&node) else {
            return;
        };
        let mut pending = std::mem::take(&mut entry.children);
        while let Some(child) = pending.pop() {
            if let Some(removed) = state.nodes.remove(&child) {
                pending.extend(removed.children);
            }
            state.listeners.remove(&child);
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.state.lock().expect("fixture lock").nodes.contains_key(&node)
    }

    /// Installs a callback run after every dispatch, outside the fixture lock.
    pub fn set_dispatch_hook(&self, hook: impl Fn(NodeId, &SyntheticEvent) + Send + Sync + 'static) {
        *self.hook.lock().expect("hook lock") = Some(Arc::new(hook));
    }

    pub fn dispatched(&self) -> Vec<DispatchedEvent> {
        self.state.lock().expect("fixture lock").dispatched.clone()
    }

    pub fn scrolled(&self) -> Vec<NodeId> {
        self.state.lock().expect("fixture lock").scrolled.clone()
    }

    pub fn listeners(&self, node: NodeId) -> BTreeSet<EventKind> {
        self.state
            .lock()
            .expect("fixture lock")
            .listeners
            .get(&node)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document_listeners(&self) -> BTreeSet<EventKind> {
        self.state.lock().expect("fixture lock").document_listeners.clone()
    }

    pub fn document_attach_count(&self) -> usize {
        self.state.lock().expect("fixture lock").document_attach_count
    }
}

fn link_child(state: &mut FixtureState, parent: Option<NodeId>, id: NodeId) {
    match parent {
        Some(parent) => {
            if let Some(entry) = state.nodes.get_mut(&parent) {
                entry.children.push(id);
            }
        }
        None => state.roots.push(id),
    }
}

fn hit_test(state: &FixtureState, node: NodeId, x: f64, y: f64) -> Option<NodeId> {
    let entry = state.nodes.get(&node)?;
    for child in entry.children.iter().rev() {
        if let Some(hit) = hit_test(state, *child, x, y) {
            return Some(hit);
        }
    }
    match entry.rect {
        Some(rect) if rect.contains(x, y) => Some(node),
        _ => None,
    }
}

impl OutputDom for FixtureDom {
    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.state
            .lock()
            .expect("fixture lock")
            .nodes
            .get(&node)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.state
            .lock()
            .expect("fixture lock")
            .nodes
            .get(&node)
            .and_then(|entry| entry.parent)
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.state
            .lock()
            .expect("fixture lock")
            .nodes
            .get(&node)
            .is_some_and(|entry| entry.classes.iter().any(|c| c == class))
    }

    fn bounding_rect(&self, node: NodeId) -> Option<Rect> {
        self.state
            .lock()
            .expect("fixture lock")
            .nodes
            .get(&node)
            .and_then(|entry| entry.rect)
    }

    fn scroll_into_view(&self, node: NodeId) {
        self.state.lock().expect("fixture lock").scrolled.push(node);
    }

    fn element_from_point(&self, x: f64, y: f64) -> Option<NodeId> {
        let state = self.state.lock().expect("fixture lock");
        state
            .roots
            .iter()
            .rev()
            .find_map(|root| hit_test(&state, *root, x, y))
    }

    fn dispatch(&self, node: NodeId, event: &SyntheticEvent) {
        self.state
            .lock()
            .expect("fixture lock")
            .dispatched
            .push(DispatchedEvent {
                node,
                event: *event,
            });
        let hook = self.hook.lock().expect("hook lock").clone();
        if let Some(hook) = hook {
            hook(node, event);
        }
    }

    fn attach_listeners(&self, node: NodeId, kinds: &[EventKind]) {
        self.state
            .lock()
            .expect("fixture lock")
            .listeners
            .entry(node)
            .or_default()
            .extend(kinds.iter().copied());
    }

    fn detach_listeners(&self, node: NodeId, kinds: &[EventKind]) {
        let mut state = self.state.lock().expect("fixture lock");
        if let Some(set) = state.listeners.get_mut(&node) {
            for kind in kinds {
                set.remove(kind);
            }
            if set.is_empty() {
                state.listeners.remove(&node);
            }
        }
    }

    fn attach_document_listeners(&self, kinds: &[EventKind]) {
        let mut state = self.state.lock().expect("fixture lock");
        state.document_attach_count += 1;
        state.document_listeners.extend(kinds.iter().copied());
    }

    fn detach_document_listeners(&self, kinds: &[EventKind]) {
        let mut state = self.state.lock().expect("fixture lock");
        for kind in kinds {
            state.document_listeners.remove(kind);
        }
    }
}
