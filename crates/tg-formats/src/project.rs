//! TOML project files.
//!
//! A project is the player settings plus a composition. Synths store their
//! graphs as node-script text so they stay hand-editable:
//!
//! ```toml
//! base_speed = 2.0
//!
//! [player]
//! sample_rate = 44100
//!
//! [[synths]]
//! name = "lead"
//! script = """
//! frequency;relay;f
//! f;input;freq
//! output;unit sine;phase
//! """
//!
//! [[patterns]]
//! name = "riff"
//! divisions = 4
//! synth = "lead"
//! notes = [{ delay = 0, length = 2, pitch = 0.0 }]
//!
//! [root]
//! kind = "simple"
//! placements = [{ pattern = "riff", delays = [0, 1] }]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tg_ir::{CompositionState, CurveState, PatternState, PlayerConfig, SynthState, TrackState};
use tracing::{debug, warn};

use crate::node_script::{parse_node_script, write_node_script};
use crate::FormatError;

fn default_base_speed() -> f64 {
    CompositionState::default().base_speed
}

fn default_root() -> TrackState {
    TrackState::Compound {
        children: Vec::new(),
    }
}

/// On-disk project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Seconds per measure.
    #[serde(default = "default_base_speed")]
    pub base_speed: f64,
    #[serde(default)]
    pub globals: BTreeMap<String, f64>,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub synths: Vec<SynthEntry>,
    #[serde(default)]
    pub patterns: Vec<PatternState>,
    #[serde(default = "default_root")]
    pub root: TrackState,
}

/// A synth as stored: node-script text plus curves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthEntry {
    pub name: String,
    pub script: String,
    #[serde(default)]
    pub curves: Vec<CurveState>,
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self::from_state(&CompositionState::default(), PlayerConfig::default())
    }
}

impl ProjectFile {
    /// Load from a project file
    pub fn load(path: &Path) -> Result<Self, FormatError> {
        let content = std::fs::read_to_string(path)?;
        let project = Self::parse(&content)?;
        debug!(path = %path.display(), synths = project.synths.len(), "loaded project");
        Ok(project)
    }

    pub fn parse(content: &str) -> Result<Self, FormatError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), FormatError> {
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, FormatError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Capture a composition and player settings.
    pub fn from_state(state: &CompositionState, player: PlayerConfig) -> Self {
        Self {
            base_speed: state.base_speed,
            globals: state.globals.clone(),
            player,
            synths: state
                .synths
                .iter()
                .map(|s| SynthEntry {
                    name: s.name.clone(),
                    script: write_node_script(&s.nodes),
                    curves: s.curves.clone(),
                })
                .collect(),
            patterns: state.patterns.clone(),
            root: state.root.clone(),
        }
    }

    /// The composition this project describes. Bad script lines are
    /// logged and dropped; the rest of each synth still loads.
    pub fn composition_state(&self) -> CompositionState {
        let synths = self
            .synths
            .iter()
            .map(|entry| {
                let script = parse_node_script(&entry.script);
                if !script.is_clean() {
                    warn!(
                        synth = %entry.name,
                        skipped = script.issues.len(),
                        "synth loaded with skipped lines"
                    );
                }
                SynthState {
                    name: entry.name.clone(),
                    nodes: script.nodes,
                    curves: entry.curves.clone(),
                }
            })
            .collect();

        let patterns = self
            .patterns
            .iter()
            .map(|p| {
                let mut p = p.clone();
                p.notes.sort_by_key(|n| n.delay);
                p
            })
            .collect();

        CompositionState {
            base_speed: self.base_speed,
            globals: self.globals.clone(),
            synths,
            patterns,
            root: self.root.clone(),
        }
    }
}
