//! Serializable composition state.
//!
//! These structs are what a project stores. The engine builds its runtime
//! (compiled graphs, shared patterns, the track arena) from them.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::curve::{Curve, CurveError, CurveMode, CurvePoint};
use crate::node_def::NodeDef;
use crate::pattern::{DelaySet, PatternState};

/// A complete composition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositionState {
    /// Seconds per measure.
    pub base_speed: f64,
    /// Global variables exposed to every voice as clip inputs.
    #[serde(default)]
    pub globals: BTreeMap<String, f64>,
    #[serde(default)]
    pub synths: Vec<SynthState>,
    #[serde(default)]
    pub patterns: Vec<PatternState>,
    pub root: TrackState,
}

impl Default for CompositionState {
    fn default() -> Self {
        Self {
            base_speed: 2.0,
            globals: BTreeMap::new(),
            synths: Vec::new(),
            patterns: Vec::new(),
            root: TrackState::Compound { children: Vec::new() },
        }
    }
}

/// A node-graph synthesizer: its nodes plus the curves they look up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthState {
    pub name: String,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub curves: Vec<CurveState>,
}

/// A named curve as stored: `[position, value]` pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveState {
    pub name: String,
    #[serde(default)]
    pub mode: CurveMode,
    pub points: Vec<[f64; 2]>,
}

impl CurveState {
    /// Build the runtime curve, validating point order.
    pub fn to_curve(&self) -> Result<Curve, CurveError> {
        let points: Vec<CurvePoint> = self
            .points
            .iter()
            .map(|[p, v]| CurvePoint::new(*p, *v))
            .collect();
        Curve::from_points(&points, self.mode)
    }
}

/// A node of the track tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackState {
    /// Mixes its children.
    Compound { children: Vec<TrackState> },
    /// Plays patterns at measure delays.
    Simple { placements: Vec<PlacementState> },
}

/// A pattern placed at a set of measure delays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacementState {
    pub pattern: String,
    pub delays: DelaySet,
}
