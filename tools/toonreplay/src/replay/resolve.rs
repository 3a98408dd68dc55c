//! Positional addressing inside a cell's output area.
//!
//! Rendered outputs (plots, widgets) carry no stable identity, so every node
//! is addressed by sibling indices relative to the output area.

use crate::dom::{NodeId, OutputDom, Rect};

/// The rendered output element of one stacked output: the first node carrying
/// `output_class`, searching `child` itself first and then depth-first.
/// Falls back to `child` when no node carries the class.
pub fn output_element(dom: &dyn OutputDom, child: NodeId, output_class: &str) -> NodeId {
    let mut pending = vec![child];
    while let Some(node) = pending.pop() {
        if dom.has_class(node, output_class) {
            return node;
        }
        pending.extend(dom.children(node).into_iter().rev());
    }
    child
}

/// Walks up from `node` to the stacked output directly under `area`.
/// Returns that output's sibling index and node.
pub fn stacked_output_of(dom: &dyn OutputDom, area: NodeId, node: NodeId) -> Option<(usize, NodeId)> {
    let mut current = node;
    loop {
        let parent = dom.parent(current)?;
        if parent == area {
            let index = dom.children(area).iter().position(|c| *c == current)?;
            return Some((index, current));
        }
        current = parent;
    }
}

/// Sibling indices from `node` up to (not including) `ancestor`, innermost first.
/// `None` when `node` is not inside `ancestor`.
pub fn descent_path(dom: &dyn OutputDom, node: NodeId, ancestor: NodeId) -> Option<Vec<usize>> {
    let mut path = Vec::new();
    let mut current = node;
    while current != ancestor {
        path.push(dom.sibling_index(current)?);
        current = dom.parent(current)?;
    }
    Some(path)
}

/// Follows an innermost-first path down from `start`, outermost index first.
pub fn descend(dom: &dyn OutputDom, start: NodeId, path: &[usize]) -> Option<NodeId> {
    path.iter()
        .rev()
        .try_fold(start, |node, index| dom.child_at(node, *index))
}

/// Fractional position of a client point inside `rect`. A zero-sized side maps to 0.
pub fn relative_position(rect: &Rect, client_x: f64, client_y: f64) -> (f64, f64) {
    (
        fraction(client_x - rect.left, rect.width),
        fraction(client_y - rect.top, rect.height),
    )
}

fn fraction(offset: f64, extent: f64) -> f64 {
    let value = offset / extent;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn absolute_position(rect: &Rect, relative_x: f64, relative_y: f64) -> (f64, f64) {
    (
        rect.left + rect.width * relative_x,
        rect.top + rect.height * relative_y,
    )
}
