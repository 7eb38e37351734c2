//! Composition runtime: the root of the track tree plus the synthesizer
//! and pattern registries and the global variables.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tg_ir::{CompositionState, MetaSamples};
use tracing::{debug, info};

use crate::error::{BuildError, EvalError};
use crate::synth::GraphSynth;
use crate::track::{Pattern, TimeBounds, TrackTree};
use crate::voice::{Synthesizer, VoiceKey, VoiceSet};

/// Global variables shared with the control thread. Edits land in the
/// next playback pass.
pub type GlobalsHandle = Arc<Mutex<BTreeMap<String, f64>>>;

/// Anything the player can pull buffers from.
pub trait BufferSource: Send {
    /// Prepare for a playback pass starting at absolute sample `start_pos`.
    fn begin(&mut self, start_pos: i64);

    /// Render additively into `buffer`. Buffers arrive in playback order.
    fn render(&mut self, buffer: &mut MetaSamples) -> Result<(), EvalError>;

    /// Seconds per measure.
    fn speed(&self) -> f64;

    /// Whether nothing sounds at or after `position`.
    fn is_finished(&self, position: i64, sample_rate: u32) -> bool;
}

/// Root owner of the track tree.
pub struct Composition {
    base_speed: f64,
    globals_static: GlobalsHandle,
    globals_dynamic: BTreeMap<String, f64>,
    synths: HashMap<String, Arc<dyn Synthesizer>>,
    patterns: HashMap<String, Arc<Pattern>>,
    tree: TrackTree,
    live_voices: VoiceSet,
}

impl Composition {
    /// An empty composition at `base_speed` seconds per measure.
    pub fn new(base_speed: f64) -> Self {
        Self {
            base_speed,
            globals_static: GlobalsHandle::default(),
            globals_dynamic: BTreeMap::new(),
            synths: HashMap::new(),
            patterns: HashMap::new(),
            tree: TrackTree::new(),
            live_voices: VoiceSet::new(),
        }
    }

    /// Build the runtime from stored state: compile every synth, bind
    /// patterns to their synths, then build the track tree.
    pub fn from_state(state: &CompositionState) -> Result<Self, BuildError> {
        let mut composition = Self::new(state.base_speed);
        *composition.lock_globals() = state.globals.clone();

        for synth in &state.synths {
            composition.register_synth(Arc::new(GraphSynth::from_state(synth)?));
        }
        for pattern in &state.patterns {
            let synth = composition
                .synths
                .get(&pattern.synth)
                .cloned()
                .ok_or_else(|| BuildError::UnknownSynth {
                    pattern: pattern.name.clone(),
                    synth: pattern.synth.clone(),
                })?;
            composition
                .patterns
                .insert(pattern.name.clone(), Arc::new(Pattern::new(pattern, synth)));
        }

        let patterns = &composition.patterns;
        composition.tree = TrackTree::from_state(&state.root, &|name| patterns.get(name).cloned())?;
        debug!(
            synths = composition.synths.len(),
            patterns = composition.patterns.len(),
            tracks = composition.tree.len(),
            "built composition"
        );
        Ok(composition)
    }

    pub fn base_speed(&self) -> f64 {
        self.base_speed
    }

    pub fn set_base_speed(&mut self, seconds_per_measure: f64) {
        self.base_speed = seconds_per_measure;
    }

    /// Add or replace a synthesizer. Patterns already bound keep the old
    /// one.
    pub fn register_synth(&mut self, synth: Arc<dyn Synthesizer>) {
        self.synths.insert(synth.name().to_string(), synth);
    }

    pub fn synth(&self, name: &str) -> Option<&Arc<dyn Synthesizer>> {
        self.synths.get(name)
    }

    pub fn pattern(&self, name: &str) -> Option<&Arc<Pattern>> {
        self.patterns.get(name)
    }

    pub fn insert_pattern(&mut self, pattern: Arc<Pattern>) {
        self.patterns.insert(pattern.name().to_string(), pattern);
    }

    pub fn tree(&self) -> &TrackTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut TrackTree {
        &mut self.tree
    }

    /// Handle for editing globals from another thread.
    pub fn globals(&self) -> GlobalsHandle {
        Arc::clone(&self.globals_static)
    }

    pub fn set_global(&self, name: &str, value: f64) {
        self.lock_globals().insert(name.to_string(), value);
    }

    fn lock_globals(&self) -> MutexGuard<'_, BTreeMap<String, f64>> {
        self.globals_static.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the globals taken at the start of the current pass.
    pub fn globals_dynamic(&self) -> &BTreeMap<String, f64> {
        &self.globals_dynamic
    }

    /// Start a playback pass: snapshot the globals and drop every voice
    /// left from a previous pass.
    pub fn begin_playback(&mut self) {
        let snapshot = self.lock_globals().clone();
        self.globals_dynamic = snapshot;
        self.tree.clear_voices();
        self.live_voices.clear();
        info!(globals = self.globals_dynamic.len(), "playback pass started");
    }

    /// Render the whole tree and any live voices into `buffer`.
    pub fn render(&mut self, buffer: &mut MetaSamples) -> Result<(), EvalError> {
        buffer.speed_mult = self.base_speed;
        buffer.variables.clone_from(&self.globals_dynamic);
        let root = self.tree.root();
        self.tree.apply_to(root, buffer)?;

        if !self.live_voices.is_empty() {
            self.live_voices.render(&mut buffer.samples)?;
        }
        Ok(())
    }

    /// Start a live voice on the named synthesizer.
    pub fn spawn_live(&mut self, synth: &str, pitch: f64, sample_rate: u32) -> Option<VoiceKey> {
        let voice = self.synths.get(synth)?.spawn_live_voice(pitch, sample_rate);
        Some(self.live_voices.insert(voice))
    }

    /// Ask a live voice to fade out.
    pub fn release_live(&mut self, key: VoiceKey) -> bool {
        match self.live_voices.get_mut(key) {
            Some(voice) => {
                voice.request_kill();
                true
            }
            None => false,
        }
    }

    pub fn live_voice_count(&self) -> usize {
        self.live_voices.len()
    }

    /// Bounds of the whole tree in measures.
    pub fn time_bounds(&self) -> TimeBounds {
        self.tree.time_bounds(self.tree.root())
    }

    /// First sample after the last measure, or `None` when empty.
    pub fn end_sample(&self, sample_rate: u32) -> Option<i64> {
        let bounds = self.time_bounds();
        if bounds.is_empty() {
            return None;
        }
        Some((bounds.end * self.base_speed * sample_rate as f64).round() as i64)
    }

    /// Ask every voice to finish.
    pub fn kill_voices(&mut self) {
        self.tree.kill_voices();
        self.live_voices.kill_all();
    }
}

impl BufferSource for Composition {
    fn begin(&mut self, start_pos: i64) {
        debug!(start_pos, "begin");
        self.begin_playback();
    }

    fn render(&mut self, buffer: &mut MetaSamples) -> Result<(), EvalError> {
        Composition::render(self, buffer)
    }

    fn speed(&self) -> f64 {
        self.base_speed
    }

    fn is_finished(&self, position: i64, sample_rate: u32) -> bool {
        let sounding = self.live_voice_count() > 0 || self.tree.has_live_voices(self.tree.root());
        if sounding {
            return false;
        }
        self.end_sample(sample_rate).map_or(true, |end| position >= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_ir::{NodeDef, NoteSpan, PatternState, PlacementState, SynthState, TrackState};

    fn state() -> CompositionState {
        let mut pattern = PatternState::new("beat", 2, "lead");
        pattern.add_note(NoteSpan::new(0, 1, 0.0));
        CompositionState {
            base_speed: 1.0,
            globals: [("gain".to_string(), 0.5)].into_iter().collect(),
            synths: vec![SynthState {
                name: "lead".into(),
                nodes: vec![
                    NodeDef::parse_line("g;input;gain").unwrap(),
                    NodeDef::parse_line("output;relay;g").unwrap(),
                ],
                curves: Vec::new(),
            }],
            patterns: vec![pattern],
            root: TrackState::Compound {
                children: vec![TrackState::Simple {
                    placements: vec![PlacementState {
                        pattern: "beat".into(),
                        delays: [0, 2].into_iter().collect(),
                    }],
                }],
            },
        }
    }

    #[test]
    fn builds_runtime_from_state() {
        let comp = Composition::from_state(&state()).unwrap();
        assert!(comp.synth("lead").is_some());
        assert_eq!(comp.pattern("beat").unwrap().length_measures(), 1);
        assert_eq!(comp.time_bounds(), TimeBounds::new(0.0, 3.0));
        assert_eq!(comp.end_sample(8), Some(24));
    }

    #[test]
    fn unknown_references_fail_to_build() {
        let mut bad = state();
        bad.patterns[0].synth = "nope".into();
        assert!(matches!(
            Composition::from_state(&bad),
            Err(BuildError::UnknownSynth { .. })
        ));

        let mut bad = state();
        bad.root = TrackState::Simple {
            placements: vec![PlacementState {
                pattern: "ghost".into(),
                delays: [0].into_iter().collect(),
            }],
        };
        assert_eq!(
            Composition::from_state(&bad).map(|_| ()),
            Err(BuildError::UnknownPattern("ghost".into()))
        );
    }

    #[test]
    fn globals_are_snapshotted_at_playback_start() {
        let mut comp = Composition::from_state(&state()).unwrap();
        let globals = comp.globals();
        comp.begin_playback();

        globals.lock().unwrap().insert("gain".into(), 2.0);
        let mut buffer = MetaSamples::new(8, 0, 4, 1.0);
        comp.render(&mut buffer).unwrap();
        assert_eq!(buffer.samples.data(), &[0.5; 4]);

        comp.begin_playback();
        let mut buffer = MetaSamples::new(8, 16, 4, 1.0);
        comp.render(&mut buffer).unwrap();
        assert_eq!(buffer.samples.data(), &[2.0; 4]);
    }

    #[test]
    fn finished_after_last_measure_and_voices() {
        let mut comp = Composition::from_state(&state()).unwrap();
        comp.begin(0);
        assert!(!comp.is_finished(0, 8));
        assert!(comp.is_finished(24, 8));

        let key = comp.spawn_live("lead", 0.0, 8).unwrap();
        assert!(!comp.is_finished(24, 8));
        assert!(comp.release_live(key));
        let mut buffer = MetaSamples::new(8, 24, 4, 1.0);
        comp.render(&mut buffer).unwrap();
        assert_eq!(comp.live_voice_count(), 0);
        assert!(comp.is_finished(28, 8));
        assert!(comp.spawn_live("nope", 0.0, 8).is_none());
    }

    #[test]
    fn empty_composition_is_finished_immediately() {
        let comp = Composition::from_state(&CompositionState::default()).unwrap();
        assert_eq!(comp.end_sample(44100), None);
        assert!(comp.is_finished(0, 44100));
    }
}
