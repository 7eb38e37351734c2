//! Voice and synthesizer capabilities consumed by the composition tree.

use std::fmt;

use slotmap::{new_key_type, SlotMap};
use tg_ir::{MetaSamples, SampleBuffer};

use crate::error::EvalError;

new_key_type! {
    /// Key of a live voice within its owning layer.
    pub struct VoiceKey;
}

/// Live voices owned by one layer, kept in spawn order.
///
/// Keys stay valid while the voice lives. Rendering walks the voices in
/// the order they were inserted, so mixing does not depend on slot reuse.
#[derive(Default)]
pub struct VoiceSet {
    slots: SlotMap<VoiceKey, Box<dyn Voice>>,
    order: Vec<VoiceKey>,
}

impl VoiceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, voice: Box<dyn Voice>) -> VoiceKey {
        let key = self.slots.insert(voice);
        self.order.push(key);
        key
    }

    pub fn get_mut(&mut self, key: VoiceKey) -> Option<&mut (dyn Voice + 'static)> {
        self.slots.get_mut(key).map(|v| v.as_mut())
    }

    /// Keys in spawn order.
    pub fn keys(&self) -> impl Iterator<Item = VoiceKey> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
    }

    /// Ask every voice to finish.
    pub fn kill_all(&mut self) {
        for voice in self.slots.values_mut() {
            voice.request_kill();
        }
    }

    /// Draw the next `target.len()` samples from every voice in spawn
    /// order, add them onto `target`, then drop voices that finished.
    pub fn render(&mut self, target: &mut SampleBuffer) -> Result<(), EvalError> {
        let len = target.len();
        for &key in &self.order {
            if let Some(voice) = self.slots.get_mut(key) {
                voice.next_segment(len)?.layer_onto(target, 0, 0);
            }
        }
        self.slots.retain(|_, voice| voice.is_alive());
        let slots = &self.slots;
        self.order.retain(|&key| slots.contains_key(key));
        Ok(())
    }
}

impl fmt::Debug for VoiceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceSet").field("len", &self.len()).finish()
    }
}

/// A note ready to spawn, positioned against the buffer being rendered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    /// Samples from the buffer's `start_pos` to the note's first sample.
    pub offset: usize,
    /// Absolute start in seconds.
    pub start_time: f64,
    /// Length in samples.
    pub length: usize,
    /// Semitones from A4.
    pub pitch: f64,
}

/// A stateful synthesizer instance producing successive segments until
/// exhausted.
pub trait Voice: Send {
    /// Produce the next `len` samples. Segments are contiguous: the first
    /// sample of one call follows the last sample of the previous one.
    fn next_segment(&mut self, len: usize) -> Result<SampleBuffer, EvalError>;

    /// False once the voice has nothing left to play.
    fn is_alive(&self) -> bool;

    /// Ask the voice to finish. It may fade out over a few more segments.
    fn request_kill(&mut self);
}

/// Something that turns notes into voices.
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Create one voice per note in `notes`, in order, rendering for
    /// `target`'s sample rate and variables.
    fn spawn_voices(
        &self,
        notes: &[NoteEvent],
        target: &MetaSamples,
        voices: &mut VoiceSet,
    ) -> Result<(), EvalError>;

    /// A voice for interactive playback that sounds until killed.
    fn spawn_live_voice(&self, pitch: f64, sample_rate: u32) -> Box<dyn Voice>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Tagged {
        tag: u8,
        remaining: usize,
        log: Arc<Mutex<Vec<u8>>>,
    }

    impl Voice for Tagged {
        fn next_segment(&mut self, len: usize) -> Result<SampleBuffer, EvalError> {
            self.log.lock().unwrap().push(self.tag);
            self.remaining = self.remaining.saturating_sub(1);
            let mut out = SampleBuffer::new(10, len);
            out.data_mut().fill(self.tag as f64);
            Ok(out)
        }

        fn is_alive(&self) -> bool {
            self.remaining > 0
        }

        fn request_kill(&mut self) {
            self.remaining = 0;
        }
    }

    #[test]
    fn renders_in_spawn_order_after_slot_reuse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tagged = |tag, remaining| {
            Box::new(Tagged {
                tag,
                remaining,
                log: Arc::clone(&log),
            }) as Box<dyn Voice>
        };

        let mut voices = VoiceSet::new();
        voices.insert(tagged(1, 5));
        let short = voices.insert(tagged(2, 1));
        voices.insert(tagged(3, 5));

        let mut target = SampleBuffer::new(10, 2);
        voices.render(&mut target).unwrap();
        assert_eq!(target.data(), &[6.0, 6.0]);
        assert_eq!(voices.len(), 2);
        assert!(voices.get_mut(short).is_none());

        // takes the slot the finished voice left behind
        let late = voices.insert(tagged(4, 5));
        assert_eq!(voices.keys().last(), Some(late));
        voices.render(&mut target).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 1, 3, 4]);
    }

    #[test]
    fn kill_all_drops_voices_on_next_render() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut voices = VoiceSet::new();
        for tag in 0..3 {
            voices.insert(Box::new(Tagged {
                tag,
                remaining: 10,
                log: Arc::clone(&log),
            }));
        }
        voices.kill_all();
        voices.render(&mut SampleBuffer::new(10, 4)).unwrap();
        assert!(voices.is_empty());
        assert_eq!(voices.keys().count(), 0);
    }
}
