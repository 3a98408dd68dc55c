//! Host DOM seam.
//!
//! The engine never touches a browser directly. It reads geometry and child
//! ordering through [`OutputDom`] and hands synthetic pointer events back to
//! it. `fixture::FixtureDom` is the in-memory implementation.

pub mod fixture;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.top + self.height
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    /// True when either side is at or below `epsilon`, or any field is not finite.
    pub fn is_degenerate(&self, epsilon: f64) -> bool {
        !(self.is_finite() && self.width > epsilon && self.height > epsilon)
    }

    /// Pulls a point inside the box. Never panics, even on a non-finite box.
    pub fn clamp_point(&self, x: f64, y: f64) -> (f64, f64) {
        let max_x = self.left + (self.width - 1.0).max(0.0);
        let max_y = self.top + (self.height - 1.0).max(0.0);
        (x.max(self.left).min(max_x), y.max(self.top).min(max_y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Click,
    #[serde(rename = "dblclick")]
    DblClick,
    MouseDown,
    MouseMove,
    MouseUp,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::DblClick => "dblclick",
            Self::MouseDown => "mousedown",
            Self::MouseMove => "mousemove",
            Self::MouseUp => "mouseup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "click" => Some(Self::Click),
            "dblclick" => Some(Self::DblClick),
            "mousedown" => Some(Self::MouseDown),
            "mousemove" => Some(Self::MouseMove),
            "mouseup" => Some(Self::MouseUp),
            _ => None,
        }
    }

    /// Click-like events carry a descent path and are dispatched on an exact node.
    pub fn is_click(self) -> bool {
        matches!(self, Self::Click | Self::DblClick)
    }
}

/// Listeners armed on every output sub-element while recording.
pub const ELEMENT_LISTENERS: [EventKind; 3] =
    [EventKind::Click, EventKind::DblClick, EventKind::MouseDown];

/// Document-level listeners armed for the duration of one drag.
pub const DRAG_LISTENERS: [EventKind; 2] = [EventKind::MouseMove, EventKind::MouseUp];

/// A native pointer event as forwarded by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: EventKind,
    pub target: NodeId,
    pub client_x: f64,
    pub client_y: f64,
}

/// A pointer event synthesized during replay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyntheticEvent {
    pub kind: EventKind,
    pub client_x: f64,
    pub client_y: f64,
    pub bubbles: bool,
}

pub trait OutputDom: Send + Sync {
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn has_class(&self, node: NodeId, class: &str) -> bool;
    fn bounding_rect(&self, node: NodeId) -> Option<Rect>;
    fn scroll_into_view(&self, node: NodeId);
    fn element_from_point(&self, x: f64, y: f64) -> Option<NodeId>;
    fn dispatch(&self, node: NodeId, event: &SyntheticEvent);
    fn attach_listeners(&self, node: NodeId, kinds: &[EventKind]);
    fn detach_listeners(&self, node: NodeId, kinds: &[EventKind]);
    fn attach_document_listeners(&self, kinds: &[EventKind]);
    fn detach_document_listeners(&self, kinds: &[EventKind]);

    fn child_at(&self, node: NodeId, index: usize) -> Option<NodeId> {
        self.children(node).get(index).copied()
    }

    fn sibling_index(&self, node: NodeId) -> Option<usize> {
        let parent = self.parent(node)?;
        self.children(parent).iter().position(|child| *child == node)
    }
}
