//! Node-graph synthesizer.
//!
//! Every note becomes a `ClipVoice`: a clip over the note's time span,
//! streamed through the voice's own clone of the synth graph one segment
//! at a time. Clip inputs are the composition variables plus `pitch`,
//! `freq` and `length`.

use std::collections::{BTreeMap, HashMap};

use tg_ir::{pitch_to_freq, MetaSamples, SampleBuffer, SynthState};
use tracing::trace;

use crate::clip::{Clip, ClipCursor};
use crate::error::{BuildError, EvalError};
use crate::graph::NodeGraph;
use crate::voice::{NoteEvent, Synthesizer, Voice, VoiceSet};

/// Length of the clip behind a live voice.
pub const LIVE_HOLD_SECONDS: f64 = 4.0;

/// Fade applied when a sounding voice is killed.
pub const KILL_FADE_SECONDS: f64 = 0.005;

/// A synthesizer defined by a node graph.
#[derive(Clone, Debug)]
pub struct GraphSynth {
    name: String,
    graph: NodeGraph,
}

impl GraphSynth {
    pub fn new(name: &str, graph: NodeGraph) -> Self {
        Self {
            name: name.to_string(),
            graph,
        }
    }

    /// Compile a synth's nodes and attach its curves.
    pub fn from_state(state: &SynthState) -> Result<Self, BuildError> {
        let mut graph = NodeGraph::from_defs(state.nodes.iter().cloned()).map_err(|source| {
            BuildError::Graph {
                synth: state.name.clone(),
                source,
            }
        })?;
        for curve in &state.curves {
            let built = curve.to_curve().map_err(|source| BuildError::Curve {
                synth: state.name.clone(),
                curve: curve.name.clone(),
                source,
            })?;
            graph.set_curve(&curve.name, built);
        }
        Ok(Self::new(&state.name, graph))
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }
}

fn note_inputs(pitch: f64, seconds: f64, variables: &BTreeMap<String, f64>) -> HashMap<String, f64> {
    let mut inputs: HashMap<String, f64> = variables.iter().map(|(k, v)| (k.clone(), *v)).collect();
    inputs.insert("pitch".to_string(), pitch);
    inputs.insert("freq".to_string(), pitch_to_freq(pitch));
    inputs.insert("length".to_string(), seconds);
    inputs
}

impl Synthesizer for GraphSynth {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn_voices(
        &self,
        notes: &[NoteEvent],
        target: &MetaSamples,
        voices: &mut VoiceSet,
    ) -> Result<(), EvalError> {
        let sr = target.sample_rate();
        for note in notes {
            let seconds = note.length as f64 / sr as f64;
            let mut clip = Clip::new(&self.name, note.start_time, note.start_time + seconds, sr);
            clip.update_inputs(note_inputs(note.pitch, seconds, &target.variables));
            voices.insert(Box::new(ClipVoice::new(clip, self.graph.clone(), note.offset)));
        }
        trace!(synth = %self.name, count = notes.len(), "spawned voices");
        Ok(())
    }

    fn spawn_live_voice(&self, pitch: f64, sample_rate: u32) -> Box<dyn Voice> {
        let mut clip = Clip::new(&self.name, 0.0, LIVE_HOLD_SECONDS, sample_rate);
        clip.update_inputs(note_inputs(pitch, LIVE_HOLD_SECONDS, &BTreeMap::new()));
        Box::new(ClipVoice::new(clip, self.graph.clone(), 0))
    }
}

#[derive(Clone, Copy, Debug)]
struct Fade {
    remaining: usize,
    total: usize,
}

/// Plays one clip, after `delay` samples of silence.
#[derive(Clone, Debug)]
pub struct ClipVoice {
    clip: Clip,
    graph: NodeGraph,
    delay: usize,
    cursor: ClipCursor,
    fade: Option<Fade>,
    alive: bool,
}

impl ClipVoice {
    pub fn new(clip: Clip, graph: NodeGraph, delay: usize) -> Self {
        Self {
            clip,
            graph,
            delay,
            cursor: ClipCursor::default(),
            fade: None,
            alive: true,
        }
    }

    pub fn clip(&self) -> &Clip {
        &self.clip
    }
}

impl Voice for ClipVoice {
    fn next_segment(&mut self, len: usize) -> Result<SampleBuffer, EvalError> {
        let mut out = SampleBuffer::new(self.clip.sample_rate(), len);
        if !self.alive {
            return Ok(out);
        }
        let lead = self.delay.min(len);
        self.delay -= lead;
        if lead == len {
            return Ok(out);
        }

        let end = match self.fade {
            Some(fade) => (lead + fade.remaining).min(len),
            None => len,
        };
        let slice = &mut out.data_mut()[lead..end];
        let written = self.clip.render_next(&mut self.graph, &mut self.cursor, slice)?;
        if let Some(fade) = &mut self.fade {
            for slot in &mut slice[..written] {
                *slot *= fade.remaining as f64 / fade.total as f64;
                fade.remaining -= 1;
            }
            if fade.remaining == 0 {
                self.alive = false;
            }
        }
        if self.clip.is_exhausted(&self.cursor) {
            self.alive = false;
        }
        Ok(out)
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn request_kill(&mut self) {
        if self.cursor.index == 0 {
            self.alive = false;
        } else if self.fade.is_none() {
            let total = ((KILL_FADE_SECONDS * self.clip.sample_rate() as f64) as usize).max(1);
            self.fade = Some(Fade {
                remaining: total,
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_ir::NodeDef;

    fn synth(lines: &[&str]) -> GraphSynth {
        let graph =
            NodeGraph::from_defs(lines.iter().map(|l| NodeDef::parse_line(l).unwrap())).unwrap();
        GraphSynth::new("test", graph)
    }

    fn drain(voice: &mut dyn Voice, chunk: usize, chunks: usize) -> Vec<f64> {
        let mut all = Vec::new();
        for _ in 0..chunks {
            all.extend_from_slice(voice.next_segment(chunk).unwrap().data());
        }
        all
    }

    #[test]
    fn segments_are_contiguous_after_delay() {
        let s = synth(&["output;input;position"]);
        let mut voices = VoiceSet::new();
        let target = MetaSamples::new(10, 0, 4, 1.0);
        let note = NoteEvent {
            offset: 3,
            start_time: 0.3,
            length: 5,
            pitch: 0.0,
        };
        s.spawn_voices(&[note], &target, &mut voices).unwrap();
        let key = voices.keys().next().unwrap();
        let voice = voices.get_mut(key).unwrap();
        let out = drain(voice, 4, 3);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0]);
        assert!(!voice.is_alive());
    }

    #[test]
    fn inputs_include_pitch_freq_length_and_globals() {
        let s = synth(&["f;input;freq", "g;input;gain", "l;input;length", "output;*;f;g;l"]);
        let mut voices = VoiceSet::new();
        let mut target = MetaSamples::new(4, 0, 4, 1.0);
        target.variables.insert("gain".to_string(), 0.5);
        let note = NoteEvent {
            offset: 0,
            start_time: 0.0,
            length: 2,
            pitch: 12.0,
        };
        s.spawn_voices(&[note], &target, &mut voices).unwrap();
        let key = voices.keys().next().unwrap();
        let voice = voices.get_mut(key).unwrap();
        let out = voice.next_segment(2).unwrap();
        // 880 Hz * 0.5 * 0.5 s
        for v in out.data() {
            assert!((v - 220.0).abs() < 1e-9);
        }
    }

    #[test]
    fn long_voice_streams_the_cached_clip() {
        let lines = ["frequency;input;freq", "output;unit triangle;phase"];
        let s = synth(&lines);
        let mut clip = Clip::new("test", 0.0, 2.0, 1000);
        clip.update_inputs(note_inputs(-3.0, 2.0, &BTreeMap::new()));
        let mut voice = ClipVoice::new(clip.clone(), s.graph().clone(), 5);

        let streamed = drain(&mut voice, 300, 7);
        let whole = clip.get_audio(&mut s.graph().clone()).unwrap();
        assert_eq!(&streamed[..5], &[0.0; 5]);
        assert_eq!(&streamed[5..2005], whole);
        assert!(streamed[2005..].iter().all(|&x| x == 0.0));
        assert!(!voice.is_alive());
    }

    #[test]
    fn kill_before_start_is_silent() {
        let s = synth(&["output;c;1"]);
        let mut voices = VoiceSet::new();
        let target = MetaSamples::new(10, 0, 4, 1.0);
        let note = NoteEvent {
            offset: 8,
            start_time: 0.8,
            length: 5,
            pitch: 0.0,
        };
        s.spawn_voices(&[note], &target, &mut voices).unwrap();
        let key = voices.keys().next().unwrap();
        let voice = voices.get_mut(key).unwrap();
        voice.request_kill();
        assert!(!voice.is_alive());
        assert_eq!(voice.next_segment(4).unwrap().data(), &[0.0; 4]);
    }

    #[test]
    fn live_voice_fades_out_when_killed() {
        let s = synth(&["output;c;1"]);
        let mut voice = s.spawn_live_voice(0.0, 1000);
        assert_eq!(voice.next_segment(10).unwrap().data(), &[1.0; 10]);
        voice.request_kill();
        let tail = voice.next_segment(10).unwrap();
        assert_eq!(tail.data(), &[1.0, 0.8, 0.6, 0.4, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(!voice.is_alive());
    }

    #[test]
    fn render_errors_surface_from_next_segment() {
        let s = synth(&["output;+;missing;1"]);
        let mut voice = s.spawn_live_voice(0.0, 100);
        assert_eq!(
            voice.next_segment(4).map(|b| b.len()),
            Err(EvalError::KeyNotFound("missing".into()))
        );
    }
}
