//! Composition tree: patterns placed on simple layers, mixed by compound
//! layers.
//!
//! Tracks live in a `SlotMap` arena. A compound layer's parent is either
//! the composition root or another compound layer, expressed by
//! [`Parent`]. Time bounds are in measures; an empty layer reports
//! [`TimeBounds::EMPTY`], `(+inf, -inf)`, which is the identity of
//! [`TimeBounds::union`].

use std::fmt;
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};
use tg_ir::{DelaySet, MetaSamples, NoteSpan, PatternState, TrackState};
use tracing::trace;

use crate::error::{BuildError, EvalError};
use crate::voice::{NoteEvent, Synthesizer, VoiceSet};

new_key_type! {
    /// Key of a track in a [`TrackTree`].
    pub struct TrackKey;
}

/// Owner of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parent {
    /// Directly under the composition.
    Root,
    /// Inside a compound layer.
    Nested(TrackKey),
}

/// Half-open `[start, end)` interval in measures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeBounds {
    pub start: f64,
    pub end: f64,
}

impl TimeBounds {
    /// Bounds of a layer with nothing in it.
    pub const EMPTY: TimeBounds = TimeBounds {
        start: f64::INFINITY,
        end: f64::NEG_INFINITY,
    };

    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        !(self.start < self.end)
    }

    /// Smallest interval covering both.
    pub fn union(self, other: TimeBounds) -> TimeBounds {
        TimeBounds {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Whether this interval overlaps `[start, end)`.
    pub fn intersects(&self, start: f64, end: f64) -> bool {
        self.start < end && start < self.end
    }
}

/// Runtime pattern shared by every placement of it.
pub struct Pattern {
    name: String,
    divisions: u32,
    notes: Vec<NoteSpan>,
    length_measures: u32,
    synth: Arc<dyn Synthesizer>,
}

impl Pattern {
    pub fn new(state: &PatternState, synth: Arc<dyn Synthesizer>) -> Self {
        let mut notes = state.notes.clone();
        notes.sort_by_key(|n| n.delay);
        Self {
            name: state.name.clone(),
            divisions: state.divisions.max(1),
            notes,
            length_measures: state.length_measures(),
            synth,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn divisions(&self) -> u32 {
        self.divisions
    }

    pub fn notes(&self) -> &[NoteSpan] {
        &self.notes
    }

    pub fn length_measures(&self) -> u32 {
        self.length_measures
    }

    pub fn synth(&self) -> &Arc<dyn Synthesizer> {
        &self.synth
    }

    /// Append the notes of a placement at `delay` measures whose first
    /// sample falls inside `target`'s window.
    pub fn collect_notes(&self, delay: u32, target: &MetaSamples, out: &mut Vec<NoteEvent>) {
        let divisions = self.divisions as f64;
        let sr = target.sample_rate() as f64;
        for note in &self.notes {
            let start = target.measure_to_sample(delay as f64 + note.delay as f64 / divisions);
            if start < target.start_pos || start >= target.end_pos {
                continue;
            }
            let end = target.measure_to_sample(delay as f64 + note.end() as f64 / divisions);
            out.push(NoteEvent {
                offset: (start - target.start_pos) as usize,
                start_time: start as f64 / sr,
                length: (end - start).max(0) as usize,
                pitch: note.pitch,
            });
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("name", &self.name)
            .field("divisions", &self.divisions)
            .field("notes", &self.notes.len())
            .field("synth", &self.synth.name())
            .finish()
    }
}

/// A pattern and the measure delays it is placed at.
#[derive(Clone, Debug)]
pub struct Placement {
    pub pattern: Arc<Pattern>,
    pub delays: DelaySet,
}

impl Placement {
    pub fn time_bounds(&self) -> TimeBounds {
        match (self.delays.first(), self.delays.last()) {
            (Some(first), Some(last)) => TimeBounds::new(
                first as f64,
                last as f64 + self.pattern.length_measures() as f64,
            ),
            _ => TimeBounds::EMPTY,
        }
    }
}

/// Leaf layer: plays placed patterns through their synthesizers.
pub struct TrackLayerSimple {
    parent: TrackKey,
    placements: Vec<Placement>,
    voices: VoiceSet,
    scratch: Vec<NoteEvent>,
}

impl TrackLayerSimple {
    fn new(parent: TrackKey) -> Self {
        Self {
            parent,
            placements: Vec::new(),
            voices: VoiceSet::new(),
            scratch: Vec::new(),
        }
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Place `pattern` at `delay` measures. Returns false if it was
    /// already placed there or `delay` is above `MAX_DELAY`.
    pub fn place(&mut self, pattern: &Arc<Pattern>, delay: u32) -> bool {
        match self.placements.iter_mut().find(|p| Arc::ptr_eq(&p.pattern, pattern)) {
            Some(placement) => placement.delays.insert(delay),
            None => {
                let mut delays = DelaySet::new();
                if !delays.insert(delay) {
                    return false;
                }
                self.placements.push(Placement {
                    pattern: Arc::clone(pattern),
                    delays,
                });
                true
            }
        }
    }

    /// Remove one placement of the named pattern.
    pub fn unplace(&mut self, pattern: &str, delay: u32) -> bool {
        let Some(idx) = self.placements.iter().position(|p| p.pattern.name() == pattern) else {
            return false;
        };
        let removed = self.placements[idx].delays.remove(delay);
        if self.placements[idx].delays.is_empty() {
            self.placements.remove(idx);
        }
        removed
    }

    pub fn time_bounds(&self) -> TimeBounds {
        self.placements
            .iter()
            .map(Placement::time_bounds)
            .fold(TimeBounds::EMPTY, TimeBounds::union)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Spawn voices for notes starting in the window, render every live
    /// voice into a scratch buffer, layer it onto `buffer`, then drop dead
    /// voices.
    pub fn apply_to(&mut self, buffer: &mut MetaSamples) -> Result<(), EvalError> {
        self.spawn(buffer)?;
        if self.voices.is_empty() {
            return Ok(());
        }

        let mut scratch = buffer.shaped_like();
        self.voices.render(&mut scratch.samples)?;
        scratch.layer_onto(buffer);
        Ok(())
    }

    fn spawn(&mut self, buffer: &MetaSamples) -> Result<(), EvalError> {
        let (window_start, window_end) = (buffer.start_measure(), buffer.end_measure());
        for placement in &self.placements {
            let pattern = &placement.pattern;
            let length = pattern.length_measures() as f64;
            self.scratch.clear();
            for delay in placement.delays.iter() {
                let bounds = TimeBounds::new(delay as f64, delay as f64 + length);
                if bounds.intersects(window_start, window_end) {
                    pattern.collect_notes(delay, buffer, &mut self.scratch);
                }
            }
            if !self.scratch.is_empty() {
                trace!(pattern = %pattern.name(), notes = self.scratch.len(), "spawning");
                pattern.synth().spawn_voices(&self.scratch, buffer, &mut self.voices)?;
            }
        }
        Ok(())
    }

    /// Ask every voice to finish.
    pub fn kill_voices(&mut self) {
        self.voices.kill_all();
    }

    pub fn clear_voices(&mut self) {
        self.voices.clear();
    }
}

impl fmt::Debug for TrackLayerSimple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackLayerSimple")
            .field("parent", &self.parent)
            .field("placements", &self.placements)
            .field("voices", &self.voices.len())
            .finish()
    }
}

/// Inner layer: mixes its children.
#[derive(Clone, Debug)]
pub struct TrackLayerCompound {
    parent: Parent,
    children: Vec<TrackKey>,
}

impl TrackLayerCompound {
    pub fn parent(&self) -> Parent {
        self.parent
    }

    pub fn children(&self) -> &[TrackKey] {
        &self.children
    }
}

#[derive(Debug)]
pub enum Track {
    Compound(TrackLayerCompound),
    Simple(TrackLayerSimple),
}

impl Track {
    pub fn parent(&self) -> Parent {
        match self {
            Track::Compound(c) => c.parent,
            Track::Simple(s) => Parent::Nested(s.parent),
        }
    }
}

/// Arena of tracks with a compound root.
#[derive(Debug)]
pub struct TrackTree {
    tracks: SlotMap<TrackKey, Track>,
    root: TrackKey,
}

impl Default for TrackTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackTree {
    pub fn new() -> Self {
        let mut tracks = SlotMap::with_key();
        let root = tracks.insert(Track::Compound(TrackLayerCompound {
            parent: Parent::Root,
            children: Vec::new(),
        }));
        Self { tracks, root }
    }

    /// Build from stored state. A simple root is wrapped in a compound
    /// root.
    pub fn from_state(
        state: &TrackState,
        patterns: &dyn Fn(&str) -> Option<Arc<Pattern>>,
    ) -> Result<Self, BuildError> {
        let mut tree = Self::new();
        let root = tree.root;
        match state {
            TrackState::Compound { children } => {
                for child in children {
                    tree.build(root, child, patterns)?;
                }
            }
            simple => tree.build(root, simple, patterns)?,
        }
        Ok(tree)
    }

    fn build(
        &mut self,
        parent: TrackKey,
        state: &TrackState,
        patterns: &dyn Fn(&str) -> Option<Arc<Pattern>>,
    ) -> Result<(), BuildError> {
        match state {
            TrackState::Compound { children } => {
                let key = self.insert_child(
                    parent,
                    Track::Compound(TrackLayerCompound {
                        parent: Parent::Nested(parent),
                        children: Vec::new(),
                    }),
                );
                for child in children {
                    self.build(key, child, patterns)?;
                }
            }
            TrackState::Simple { placements } => {
                let mut layer = TrackLayerSimple::new(parent);
                for placement in placements {
                    let pattern = patterns(&placement.pattern)
                        .ok_or_else(|| BuildError::UnknownPattern(placement.pattern.clone()))?;
                    for delay in placement.delays.iter() {
                        layer.place(&pattern, delay);
                    }
                }
                self.insert_child(parent, Track::Simple(layer));
            }
        }
        Ok(())
    }

    pub fn root(&self) -> TrackKey {
        self.root
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, key: TrackKey) -> Option<&Track> {
        self.tracks.get(key)
    }

    pub fn simple_mut(&mut self, key: TrackKey) -> Option<&mut TrackLayerSimple> {
        match self.tracks.get_mut(key) {
            Some(Track::Simple(layer)) => Some(layer),
            _ => None,
        }
    }

    pub fn parent(&self, key: TrackKey) -> Option<Parent> {
        self.tracks.get(key).map(Track::parent)
    }

    pub fn children(&self, key: TrackKey) -> &[TrackKey] {
        match self.tracks.get(key) {
            Some(Track::Compound(c)) => &c.children,
            _ => &[],
        }
    }

    fn attach(&mut self, parent: TrackKey, track: Track) -> Option<TrackKey> {
        if !matches!(self.tracks.get(parent), Some(Track::Compound(_))) {
            return None;
        }
        Some(self.insert_child(parent, track))
    }

    fn insert_child(&mut self, parent: TrackKey, track: Track) -> TrackKey {
        let key = self.tracks.insert(track);
        if let Some(Track::Compound(c)) = self.tracks.get_mut(parent) {
            c.children.push(key);
        }
        key
    }

    /// Add an empty compound layer under a compound `parent`.
    pub fn add_compound(&mut self, parent: TrackKey) -> Option<TrackKey> {
        self.attach(
            parent,
            Track::Compound(TrackLayerCompound {
                parent: Parent::Nested(parent),
                children: Vec::new(),
            }),
        )
    }

    /// Add an empty simple layer under a compound `parent`.
    pub fn add_simple(&mut self, parent: TrackKey) -> Option<TrackKey> {
        self.attach(parent, Track::Simple(TrackLayerSimple::new(parent)))
    }

    /// Remove a track and everything below it. The root stays.
    pub fn remove(&mut self, key: TrackKey) -> bool {
        if key == self.root {
            return false;
        }
        let Some(track) = self.tracks.remove(key) else {
            return false;
        };
        if let Parent::Nested(parent) = track.parent() {
            if let Some(Track::Compound(c)) = self.tracks.get_mut(parent) {
                c.children.retain(|&k| k != key);
            }
        }
        if let Track::Compound(c) = track {
            for child in c.children {
                self.remove(child);
            }
        }
        true
    }

    /// Union of the bounds below `key`.
    pub fn time_bounds(&self, key: TrackKey) -> TimeBounds {
        match self.tracks.get(key) {
            Some(Track::Simple(s)) => s.time_bounds(),
            Some(Track::Compound(c)) => c
                .children
                .iter()
                .map(|&child| self.time_bounds(child))
                .fold(TimeBounds::EMPTY, TimeBounds::union),
            None => TimeBounds::EMPTY,
        }
    }

    pub fn has_live_voices(&self, key: TrackKey) -> bool {
        match self.tracks.get(key) {
            Some(Track::Simple(s)) => !s.voices.is_empty(),
            Some(Track::Compound(c)) => c.children.iter().any(|&k| self.has_live_voices(k)),
            None => false,
        }
    }

    /// Render the track at `key` additively into `buffer`.
    ///
    /// A compound layer renders each child whose bounds meet the window,
    /// or that still has voices sounding, into one scratch buffer and
    /// layers that onto `buffer`.
    pub fn apply_to(&mut self, key: TrackKey, buffer: &mut MetaSamples) -> Result<(), EvalError> {
        let children = match self.tracks.get_mut(key) {
            Some(Track::Simple(layer)) => return layer.apply_to(buffer),
            Some(Track::Compound(c)) if !c.children.is_empty() => c.children.clone(),
            _ => return Ok(()),
        };

        let (window_start, window_end) = (buffer.start_measure(), buffer.end_measure());
        let mut scratch = buffer.shaped_like();
        for child in children {
            let audible = self.time_bounds(child).intersects(window_start, window_end)
                || self.has_live_voices(child);
            if audible {
                self.apply_to(child, &mut scratch)?;
            }
        }
        scratch.layer_onto(buffer);
        Ok(())
    }

    fn simple_layers_mut(&mut self) -> impl Iterator<Item = &mut TrackLayerSimple> + '_ {
        self.tracks.values_mut().filter_map(|t| match t {
            Track::Simple(s) => Some(s),
            Track::Compound(_) => None,
        })
    }

    /// Ask every voice in the tree to finish.
    pub fn kill_voices(&mut self) {
        self.simple_layers_mut().for_each(TrackLayerSimple::kill_voices);
    }

    /// Drop every voice immediately.
    pub fn clear_voices(&mut self) {
        self.simple_layers_mut().for_each(TrackLayerSimple::clear_voices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeGraph;
    use crate::synth::GraphSynth;
    use tg_ir::NodeDef;

    fn synth(lines: &[&str]) -> Arc<dyn Synthesizer> {
        let graph =
            NodeGraph::from_defs(lines.iter().map(|l| NodeDef::parse_line(l).unwrap())).unwrap();
        Arc::new(GraphSynth::new("s", graph))
    }

    fn pattern(name: &str, divisions: u32, notes: &[(u32, u32, f64)], s: Arc<dyn Synthesizer>) -> Arc<Pattern> {
        let mut state = PatternState::new(name, divisions, "s");
        for &(d, l, p) in notes {
            state.add_note(NoteSpan::new(d, l, p));
        }
        Arc::new(Pattern::new(&state, s))
    }

    #[test]
    fn bounds_union_and_empty_sentinel() {
        let mut tree = TrackTree::new();
        let root = tree.root();
        assert_eq!(tree.time_bounds(root), TimeBounds::EMPTY);
        assert!(tree.time_bounds(root).is_empty());

        let p = pattern("p", 4, &[(0, 6, 0.0)], synth(&["output;c;1"]));
        let a = tree.add_simple(root).unwrap();
        let inner = tree.add_compound(root).unwrap();
        let b = tree.add_simple(inner).unwrap();
        tree.simple_mut(a).unwrap().place(&p, 3);
        tree.simple_mut(b).unwrap().place(&p, 1);
        tree.simple_mut(b).unwrap().place(&p, 7);

        assert_eq!(tree.time_bounds(a), TimeBounds::new(3.0, 5.0));
        assert_eq!(tree.time_bounds(inner), TimeBounds::new(1.0, 9.0));
        assert_eq!(tree.time_bounds(root), TimeBounds::new(1.0, 9.0));
    }

    #[test]
    fn parents_are_tagged() {
        let mut tree = TrackTree::new();
        let root = tree.root();
        let inner = tree.add_compound(root).unwrap();
        let leaf = tree.add_simple(inner).unwrap();
        assert_eq!(tree.parent(root), Some(Parent::Root));
        assert_eq!(tree.parent(inner), Some(Parent::Nested(root)));
        assert_eq!(tree.parent(leaf), Some(Parent::Nested(inner)));
        assert_eq!(tree.add_simple(leaf), None);

        assert!(tree.remove(inner));
        assert!(tree.get(leaf).is_none());
        assert!(tree.children(root).is_empty());
        assert!(!tree.remove(root));
    }

    #[test]
    fn notes_spawn_only_inside_the_window() {
        // 1 measure = 8 samples at rate 8, speed 1; two divisions.
        let p = pattern("p", 2, &[(0, 1, 0.0), (1, 1, 0.0)], synth(&["output;c;1"]));
        let mut layer = TrackLayerSimple::new(TrackKey::default());
        layer.place(&p, 0);

        let mut buffer = MetaSamples::new(8, 0, 4, 1.0);
        layer.apply_to(&mut buffer).unwrap();
        assert_eq!(buffer.samples.data(), &[1.0; 4]);
        // First note ended exactly at the window edge.
        assert_eq!(layer.voice_count(), 0);

        let mut buffer = MetaSamples::new(8, 2, 4, 1.0);
        layer.apply_to(&mut buffer).unwrap();
        // Second note starts at sample 4.
        assert_eq!(buffer.samples.data(), &[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(layer.voice_count(), 1);
    }

    #[test]
    fn voices_continue_across_buffers() {
        let p = pattern("p", 1, &[(0, 1, 0.0)], synth(&["output;input;position"]));
        let mut layer = TrackLayerSimple::new(TrackKey::default());
        layer.place(&p, 0);

        let mut out = Vec::new();
        for k in 0..3 {
            let mut buffer = MetaSamples::new(4, k * 2, 2, 1.0);
            layer.apply_to(&mut buffer).unwrap();
            out.extend_from_slice(buffer.samples.data());
        }
        assert_eq!(out, vec![0.0, 0.25, 0.5, 0.75, 0.0, 0.0]);
        assert_eq!(layer.voice_count(), 0);
    }

    #[test]
    fn compound_mix_is_additive() {
        let p1 = pattern("p1", 4, &[(0, 3, 0.0), (2, 2, 5.0)], synth(&["t;input;time", "output;sinf;t"]));
        let p2 = pattern("p2", 3, &[(1, 2, 3.0)], synth(&["p;input;pitch", "output;*;p;rate"]));

        let build = |with_a: bool, with_b: bool| {
            let mut tree = TrackTree::new();
            let root = tree.root();
            if with_a {
                let a = tree.add_simple(root).unwrap();
                tree.simple_mut(a).unwrap().place(&p1, 0);
            }
            if with_b {
                let b = tree.add_simple(root).unwrap();
                tree.simple_mut(b).unwrap().place(&p2, 0);
                tree.simple_mut(b).unwrap().place(&p2, 1);
            }
            tree
        };
        let render = |mut tree: TrackTree| {
            let root = tree.root();
            let mut out = Vec::new();
            for k in 0..5 {
                let mut buffer = MetaSamples::new(12, k * 7, 7, 1.0);
                tree.apply_to(root, &mut buffer).unwrap();
                out.extend_from_slice(buffer.samples.data());
            }
            out
        };

        let together = render(build(true, true));
        let a = render(build(true, false));
        let b = render(build(false, true));
        assert!(together.iter().any(|v| *v != 0.0));
        for i in 0..together.len() {
            assert!((together[i] - (a[i] + b[i])).abs() < 1e-12, "sample {}", i);
        }
    }

    #[test]
    fn unplace_drops_empty_placements() {
        let p = pattern("p", 1, &[(0, 1, 0.0)], synth(&["output;c;1"]));
        let mut layer = TrackLayerSimple::new(TrackKey::default());
        assert!(layer.place(&p, 2));
        assert!(!layer.place(&p, 2));
        assert!(layer.place(&p, 4));
        assert!(layer.unplace("p", 2));
        assert_eq!(layer.placements().len(), 1);
        assert!(layer.unplace("p", 4));
        assert!(layer.placements().is_empty());
        assert!(!layer.unplace("p", 4));

        assert!(!layer.place(&p, u32::MAX));
        assert!(layer.placements().is_empty());
    }
}
