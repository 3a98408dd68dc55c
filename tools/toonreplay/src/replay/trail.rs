//! The recorded pointer trail of one cell.
//!
//! Stored as parallel sequences so the persisted form matches the cell
//! metadata keys one-to-one.

use crate::dom::EventKind;
use crate::errors::ReplayError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const EVENT_TYPE_KEY: &str = "mouseEventType";
pub const RELATIVE_X_KEY: &str = "relativeMousePosXArray";
pub const RELATIVE_Y_KEY: &str = "relativeMousePosYArray";
pub const CHILD_INDEX_KEY: &str = "childIndexArray";
pub const CLICK_PATHS_KEY: &str = "mouseClickTrails";

/// One sample of a trail, assembled from the parallel sequences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrailEvent {
    pub kind: EventKind,
    pub relative_x: f64,
    pub relative_y: f64,
    pub child_index: usize,
}

impl TrailEvent {
    /// False for samples recorded over a zero-sized box, persisted as `null`.
    pub fn has_position(&self) -> bool {
        self.relative_x.is_finite() && self.relative_y.is_finite()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionTrail {
    #[serde(rename = "mouseEventType")]
    event_types: Vec<EventKind>,
    #[serde(rename = "relativeMousePosXArray", deserialize_with = "nullable_positions")]
    relative_x: Vec<f64>,
    #[serde(rename = "relativeMousePosYArray", deserialize_with = "nullable_positions")]
    relative_y: Vec<f64>,
    #[serde(rename = "childIndexArray")]
    child_indices: Vec<usize>,
    /// Innermost-first sibling indices, one entry per click or dblclick.
    #[serde(rename = "mouseClickTrails")]
    click_paths: Vec<Vec<usize>>,
}

impl ActionTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.event_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_types.is_empty()
    }

    pub fn clear(&mut self) {
        self.event_types.clear();
        self.relative_x.clear();
        self.relative_y.clear();
        self.child_indices.clear();
        self.click_paths.clear();
    }

    /// Appends a non-click sample.
    pub fn push(&mut self, event: TrailEvent) {
        debug_assert!(!event.kind.is_click(), "click samples need a descent path");
        self.push_sample(event);
    }

    /// Appends a click or dblclick sample together with its descent path.
    pub fn push_click(&mut self, event: TrailEvent, descent_path: Vec<usize>) {
        debug_assert!(event.kind.is_click(), "only clicks carry a descent path");
        self.push_sample(event);
        self.click_paths.push(descent_path);
    }

    fn push_sample(&mut self, event: TrailEvent) {
        self.event_types.push(event.kind);
        self.relative_x.push(event.relative_x);
        self.relative_y.push(event.relative_y);
        self.child_indices.push(event.child_index);
    }

    pub fn event(&self, index: usize) -> Option<TrailEvent> {
        Some(TrailEvent {
            kind: *self.event_types.get(index)?,
            relative_x: *self.relative_x.get(index)?,
            relative_y: *self.relative_y.get(index)?,
            child_index: *self.child_indices.get(index)?,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = TrailEvent> + '_ {
        (0..self.len()).filter_map(|index| self.event(index))
    }

    pub fn click_path(&self, click_index: usize) -> Option<&[usize]> {
        self.click_paths.get(click_index).map(Vec::as_slice)
    }

    pub fn click_count(&self) -> usize {
        self.click_paths.len()
    }

    pub fn last_child_index(&self) -> Option<usize> {
        self.child_indices.last().copied()
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        let len = self.event_types.len();
        if self.relative_x.len() != len
            || self.relative_y.len() != len
            || self.child_indices.len() != len
        {
            return Err(ReplayError::Metadata(format!(
                "parallel sequences disagree: types={} x={} y={} children={}",
                len,
                self.relative_x.len(),
                self.relative_y.len(),
                self.child_indices.len()
            )));
        }
        let clicks = self.event_types.iter().filter(|k| k.is_click()).count();
        if clicks != self.click_paths.len() {
            return Err(ReplayError::Metadata(format!(
                "{clicks} click events but {} descent paths",
                self.click_paths.len()
            )));
        }
        Ok(())
    }

    /// The metadata entries that persist this trail.
    pub fn to_metadata(&self) -> Result<Vec<(&'static str, Value)>, ReplayError> {
        Ok(vec![
            (EVENT_TYPE_KEY, to_value(&self.event_types)?),
            (RELATIVE_X_KEY, to_value(&self.relative_x)?),
            (RELATIVE_Y_KEY, to_value(&self.relative_y)?),
            (CHILD_INDEX_KEY, to_value(&self.child_indices)?),
            (CLICK_PATHS_KEY, to_value(&self.click_paths)?),
        ])
    }

    /// Rebuilds a trail from metadata. `Ok(None)` means nothing was persisted.
    pub fn from_metadata(
        lookup: impl Fn(&str) -> Option<Value>,
    ) -> Result<Option<Self>, ReplayError> {
        let Some(event_types) = lookup(EVENT_TYPE_KEY) else {
            return Ok(None);
        };
        let field = |key: &str| {
            lookup(key).ok_or_else(|| ReplayError::Metadata(format!("missing {key}")))
        };
        let trail = Self {
            event_types: from_value(EVENT_TYPE_KEY, event_types)?,
            relative_x: positions(RELATIVE_X_KEY, field(RELATIVE_X_KEY)?)?,
            relative_y: positions(RELATIVE_Y_KEY, field(RELATIVE_Y_KEY)?)?,
            child_indices: from_value(CHILD_INDEX_KEY, field(CHILD_INDEX_KEY)?)?,
            click_paths: from_value(CLICK_PATHS_KEY, field(CLICK_PATHS_KEY)?)?,
        };
        trail.validate()?;
        Ok(Some(trail))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ReplayError> {
    serde_json::to_value(value).map_err(|e| ReplayError::Metadata(e.to_string()))
}

fn from_value<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, ReplayError> {
    serde_json::from_value(value).map_err(|e| ReplayError::Metadata(format!("{key}: {e}")))
}

/// A `null` position becomes NaN; the replay step skips it.
fn positions(key: &str, value: Value) -> Result<Vec<f64>, ReplayError> {
    let raw: Vec<Option<f64>> = from_value(key, value)?;
    Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn nullable_positions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    let raw = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}
