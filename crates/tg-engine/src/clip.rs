//! Clip audio renderer.
//!
//! A clip is a bounded time interval whose waveform is the `output` node
//! of a graph sampled once per output sample, with the `frequency` node
//! driving phase accumulation.

use std::collections::HashMap;

use crate::error::EvalError;
use crate::graph::{Frame, NodeGraph, UserInputs};

/// Node whose samples drive phase accumulation.
pub const FREQUENCY_NODE: &str = "frequency";
/// Node whose samples are the clip's audio.
pub const OUTPUT_NODE: &str = "output";

/// Progress of an incremental render: the next sample index and the
/// phase accumulated up to it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClipCursor {
    pub index: usize,
    pub phase: f64,
}

/// A time interval rendered through a node graph, with lazily filled
/// audio and frequency caches.
#[derive(Clone, Debug)]
pub struct Clip {
    start_time: f64,
    end_time: f64,
    sample_rate: u32,
    graph_name: String,
    inputs: HashMap<String, f64>,
    /// 0 until inputs are registered.
    length: usize,
    audio_cache: Vec<f64>,
    audio_valid: bool,
    freq_cache: Vec<f64>,
    freq_valid: bool,
}

impl Clip {
    /// A clip over `[start_time, end_time)` seconds. It renders nothing
    /// until inputs are registered with [`Clip::update_inputs`].
    pub fn new(graph_name: &str, start_time: f64, end_time: f64, sample_rate: u32) -> Self {
        Self {
            start_time,
            end_time,
            sample_rate,
            graph_name: graph_name.to_string(),
            inputs: HashMap::new(),
            length: 0,
            audio_cache: Vec::new(),
            audio_valid: false,
            freq_cache: Vec::new(),
            freq_valid: false,
        }
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Rendered length in samples.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn inputs(&self) -> &HashMap<String, f64> {
        &self.inputs
    }

    /// Register the clip's declared inputs. Derives the length and
    /// invalidates both caches.
    pub fn update_inputs(&mut self, inputs: HashMap<String, f64>) {
        self.inputs = inputs;
        let seconds = (self.end_time - self.start_time).max(0.0);
        self.length = (seconds * self.sample_rate as f64).round() as usize;
        self.invalidate();
    }

    /// Change one registered input.
    pub fn set_input(&mut self, name: &str, value: f64) {
        self.inputs.insert(name.to_string(), value);
        self.invalidate();
    }

    /// Drop both caches; they are rebuilt on the next read.
    pub fn invalidate(&mut self) {
        self.audio_valid = false;
        self.freq_valid = false;
    }

    pub fn is_audio_valid(&self) -> bool {
        self.audio_valid
    }

    pub fn is_freq_valid(&self) -> bool {
        self.freq_valid
    }

    /// Samples of the `frequency` node. A graph without one reads as 0 Hz.
    ///
    /// `graph` must be the graph this clip names; it is bound to the clip
    /// for the duration of the call.
    pub fn get_freq(&mut self, graph: &mut NodeGraph) -> Result<&[f64], EvalError> {
        self.ensure_freq(graph)?;
        Ok(&self.freq_cache)
    }

    /// Samples of the `output` node, accumulating phase from the frequency
    /// samples.
    pub fn get_audio(&mut self, graph: &mut NodeGraph) -> Result<&[f64], EvalError> {
        self.ensure_freq(graph)?;
        if !self.audio_valid {
            self.bind(graph);
            self.audio_cache.clear();
            let sr = self.sample_rate as f64;
            let mut phase = 0.0;
            for i in 0..self.length {
                phase += self.freq_cache[i] / sr;
                let value = self.output_at(graph, i, phase)?;
                self.audio_cache.push(value);
            }
            self.audio_valid = true;
        }
        Ok(&self.audio_cache)
    }

    /// Render the next `out.len()` samples after `cursor` into `out`,
    /// stopping at the end of the clip. Returns how many were written.
    ///
    /// Only the requested samples are evaluated, in the same order and
    /// with the same phase accumulation as [`Clip::get_audio`], so chunks
    /// concatenate to the cached render. The caches are not touched.
    pub fn render_next(
        &self,
        graph: &mut NodeGraph,
        cursor: &mut ClipCursor,
        out: &mut [f64],
    ) -> Result<usize, EvalError> {
        let n = out.len().min(self.length.saturating_sub(cursor.index));
        if n == 0 {
            return Ok(0);
        }
        self.bind(graph);
        let has_freq = graph.contains(FREQUENCY_NODE);
        let sr = self.sample_rate as f64;
        let mut phase = cursor.phase;
        for (k, slot) in out[..n].iter_mut().enumerate() {
            let i = cursor.index + k;
            let freq = if has_freq { self.frequency_at(graph, i)? } else { 0.0 };
            phase += freq / sr;
            *slot = self.output_at(graph, i, phase)?;
        }
        cursor.index += n;
        cursor.phase = phase;
        Ok(n)
    }

    /// Whether `cursor` has rendered the whole clip.
    pub fn is_exhausted(&self, cursor: &ClipCursor) -> bool {
        cursor.index >= self.length
    }

    fn ensure_freq(&mut self, graph: &mut NodeGraph) -> Result<(), EvalError> {
        if self.freq_valid {
            return Ok(());
        }
        self.freq_cache.clear();
        if graph.contains(FREQUENCY_NODE) {
            self.bind(graph);
            for i in 0..self.length {
                let value = self.frequency_at(graph, i)?;
                self.freq_cache.push(value);
            }
        } else {
            self.freq_cache.resize(self.length, 0.0);
        }
        self.freq_valid = true;
        Ok(())
    }

    fn frequency_at(&self, graph: &mut NodeGraph, i: usize) -> Result<f64, EvalError> {
        graph.set_frame(self.frame_at(i));
        graph.get_value(FREQUENCY_NODE)
    }

    fn output_at(&self, graph: &mut NodeGraph, i: usize, phase: f64) -> Result<f64, EvalError> {
        graph.set_frame(Frame {
            phase,
            ..self.frame_at(i)
        });
        graph.get_value(OUTPUT_NODE)
    }

    fn bind(&self, graph: &mut NodeGraph) {
        graph.set_user(UserInputs {
            start: self.start_time,
            end: self.end_time,
            values: self.inputs.clone(),
        });
    }

    fn frame_at(&self, i: usize) -> Frame {
        let position = i as f64 / self.sample_rate as f64;
        Frame {
            time: self.start_time + position,
            position,
            rate: i as f64 / self.length as f64,
            phase: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;
    use tg_ir::NodeDef;

    fn graph(lines: &[&str]) -> NodeGraph {
        NodeGraph::from_defs(lines.iter().map(|l| NodeDef::parse_line(l).unwrap())).unwrap()
    }

    #[test]
    fn renders_time_driven_sine() {
        let mut g = graph(&["output;relay;osc", "osc;sinf;t", "t;input;time"]);
        let mut clip = Clip::new("g", 0.0, 1.0, 8);
        clip.update_inputs(HashMap::new());
        let audio = clip.get_audio(&mut g).unwrap();
        assert_eq!(audio.len(), 8);
        for (i, v) in audio.iter().enumerate() {
            assert!((v - (TAU * i as f64 / 8.0).sin()).abs() < 1e-12);
        }
    }

    #[test]
    fn phase_advances_before_output_is_read() {
        let f = 3.0;
        let sr = 64;
        let mut g = graph(&["frequency;c;3", "output;sinf;phase"]);
        let mut clip = Clip::new("g", 0.0, 0.5, sr);
        clip.update_inputs(HashMap::new());
        let audio = clip.get_audio(&mut g).unwrap().to_vec();
        for (i, v) in audio.iter().enumerate() {
            let t = (i + 1) as f64 / sr as f64;
            assert!((v - (TAU * f * t).sin()).abs() < 1e-9, "sample {}", i);
        }
    }

    #[test]
    fn frequency_samples_follow_the_graph() {
        let mut g = graph(&["frequency;*;rate;100", "output;c;0"]);
        let mut clip = Clip::new("g", 2.0, 3.0, 4);
        clip.update_inputs(HashMap::new());
        assert_eq!(clip.get_freq(&mut g).unwrap(), &[0.0, 25.0, 50.0, 75.0]);
    }

    #[test]
    fn missing_frequency_node_reads_zero() {
        let mut g = graph(&["output;input;phase"]);
        let mut clip = Clip::new("g", 0.0, 1.0, 4);
        clip.update_inputs(HashMap::new());
        assert_eq!(clip.get_freq(&mut g).unwrap(), &[0.0; 4]);
        assert_eq!(clip.get_audio(&mut g).unwrap(), &[0.0; 4]);
    }

    #[test]
    fn missing_output_node_is_an_error() {
        let mut g = graph(&["frequency;c;1"]);
        let mut clip = Clip::new("g", 0.0, 1.0, 4);
        clip.update_inputs(HashMap::new());
        assert_eq!(
            clip.get_audio(&mut g).map(|a| a.len()),
            Err(EvalError::KeyNotFound("output".into()))
        );
        assert!(!clip.is_audio_valid());
    }

    #[test]
    fn caches_invalidate_on_inputs_and_are_idempotent() {
        let mut g = graph(&["g;input;gain", "output;*;g;position"]);
        let mut clip = Clip::new("g", 0.0, 1.0, 4);
        assert!(clip.is_empty());
        assert!(clip.get_audio(&mut g).unwrap().is_empty());

        let mut inputs = HashMap::new();
        inputs.insert("gain".to_string(), 2.0);
        clip.update_inputs(inputs);
        assert!(!clip.is_audio_valid());
        assert!(!clip.is_freq_valid());

        let first = clip.get_audio(&mut g).unwrap().to_vec();
        let second = clip.get_audio(&mut g).unwrap().to_vec();
        assert_eq!(first, vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(first, second);

        clip.set_input("gain", 4.0);
        assert!(!clip.is_audio_valid());
        assert_eq!(clip.get_audio(&mut g).unwrap(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn chunked_render_matches_cached_audio() {
        let lines = ["frequency;*;rate;40", "s;sinf;phase", "output;*;s;position"];
        let mut clip = Clip::new("g", 0.25, 1.0, 64);
        clip.update_inputs(HashMap::new());
        let whole = clip.get_audio(&mut graph(&lines)).unwrap().to_vec();

        let mut g = graph(&lines);
        let mut cursor = ClipCursor::default();
        let mut chunked = Vec::new();
        let mut chunk = [0.0; 7];
        loop {
            let n = clip.render_next(&mut g, &mut cursor, &mut chunk).unwrap();
            if n == 0 {
                break;
            }
            chunked.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(chunked, whole);
        assert!(clip.is_exhausted(&cursor));
    }

    #[test]
    fn render_next_evaluates_only_the_requested_samples() {
        let mut g = graph(&["frequency;c;440", "output;sinf;phase"]);
        let mut clip = Clip::new("g", 0.0, 4.0, 44100);
        clip.update_inputs(HashMap::new());
        g.reset_recalc_count();

        let mut cursor = ClipCursor::default();
        let mut out = [0.0; 16];
        assert_eq!(clip.render_next(&mut g, &mut cursor, &mut out).unwrap(), 16);
        assert_eq!(cursor.index, 16);
        // one frequency constant plus one output per sample
        assert_eq!(g.recalc_count(), 17);
        assert!(!clip.is_exhausted(&cursor));
    }

    #[test]
    fn renders_after_a_node_is_removed() {
        let mut g = graph(&["output;+;t;1", "t;input;time", "k;sinf;t"]);
        g.remove_node("k").unwrap();
        let mut clip = Clip::new("g", 0.0, 1.0, 4);
        clip.update_inputs(HashMap::new());
        assert_eq!(clip.get_audio(&mut g).unwrap(), &[1.0, 1.25, 1.5, 1.75]);
    }

    #[test]
    fn start_and_end_are_clip_bounds() {
        let mut g = graph(&["output;-;end;start"]);
        let mut clip = Clip::new("g", 1.5, 2.0, 4);
        clip.update_inputs(HashMap::new());
        assert_eq!(clip.get_audio(&mut g).unwrap(), &[0.5, 0.5]);
    }
}
