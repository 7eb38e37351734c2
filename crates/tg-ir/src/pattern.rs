//! Patterns: reusable timed note collections bound to one synthesizer.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Concert pitch of A4 in Hz; pitches are semitones relative to it.
pub const A4_HZ: f64 = 440.0;

/// Frequency in Hz of a pitch given in semitones from A4.
pub fn pitch_to_freq(pitch: f64) -> f64 {
    A4_HZ * libm::pow(2.0, pitch / 12.0)
}

/// One note of a pattern: `(delay, length, pitch)`.
///
/// `delay` and `length` count pattern divisions; `pitch` is semitones
/// from A4.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteSpan {
    pub delay: u32,
    pub length: u32,
    pub pitch: f64,
}

impl NoteSpan {
    pub const fn new(delay: u32, length: u32, pitch: f64) -> Self {
        Self { delay, length, pitch }
    }

    /// First division after the note, saturating at `u32::MAX`.
    pub fn end(&self) -> u32 {
        self.delay.saturating_add(self.length)
    }
}

/// Persisted form of a pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternState {
    pub name: String,
    /// Divisions per measure.
    pub divisions: u32,
    /// Notes, kept sorted by delay.
    #[serde(default)]
    pub notes: Vec<NoteSpan>,
    /// Name of the synthesizer that plays this pattern.
    pub synth: String,
}

impl PatternState {
    pub fn new(name: &str, divisions: u32, synth: &str) -> Self {
        Self {
            name: String::from(name),
            divisions: divisions.max(1),
            notes: Vec::new(),
            synth: String::from(synth),
        }
    }

    /// Add a note, keeping notes ordered by delay (stable for equal delays).
    pub fn add_note(&mut self, note: NoteSpan) {
        let idx = self.notes.partition_point(|n| n.delay <= note.delay);
        self.notes.insert(idx, note);
    }

    /// Remove the note at `index`.
    pub fn remove_note(&mut self, index: usize) -> Option<NoteSpan> {
        (index < self.notes.len()).then(|| self.notes.remove(index))
    }

    /// Whole measures covered by the notes, at least one.
    pub fn length_measures(&self) -> u32 {
        let divisions = self.divisions.max(1);
        let end = self.notes.iter().map(NoteSpan::end).max().unwrap_or(0);
        end.div_ceil(divisions).max(1)
    }
}

/// Largest placement delay, in measures.
pub const MAX_DELAY: u32 = 1 << 16;

/// A placement delay above [`MAX_DELAY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayOutOfRange(pub u32);

impl fmt::Display for DelayOutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delay {} exceeds the maximum of {} measures", self.0, MAX_DELAY)
    }
}

/// Set of non-negative measure delays at which a pattern is placed.
///
/// Iterates in ascending order, which fixes voice spawn order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct DelaySet {
    words: Vec<u64>,
}

impl DelaySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the delay was not already present. Delays above
    /// [`MAX_DELAY`] are never stored.
    pub fn insert(&mut self, delay: u32) -> bool {
        if delay > MAX_DELAY {
            return false;
        }
        let (word, bit) = (delay as usize / 64, delay % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let was_set = self.words[word] & (1 << bit) != 0;
        self.words[word] |= 1 << bit;
        !was_set
    }

    /// Returns true if the delay was present.
    pub fn remove(&mut self, delay: u32) -> bool {
        let (word, bit) = (delay as usize / 64, delay % 64);
        let Some(w) = self.words.get_mut(word) else {
            return false;
        };
        let was_set = *w & (1 << bit) != 0;
        *w &= !(1 << bit);
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
        was_set
    }

    pub fn contains(&self, delay: u32) -> bool {
        let (word, bit) = (delay as usize / 64, delay % 64);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Delays in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64u32)
                .filter(move |b| w & (1 << b) != 0)
                .map(move |b| i as u32 * 64 + b)
        })
    }

    pub fn first(&self) -> Option<u32> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<u32> {
        let (i, w) = self.words.iter().enumerate().rev().find(|(_, w)| **w != 0)?;
        Some(i as u32 * 64 + 63 - w.leading_zeros())
    }
}

impl TryFrom<Vec<u32>> for DelaySet {
    type Error = DelayOutOfRange;

    fn try_from(delays: Vec<u32>) -> Result<Self, Self::Error> {
        let mut set = DelaySet::new();
        for d in delays {
            if d > MAX_DELAY {
                return Err(DelayOutOfRange(d));
            }
            set.insert(d);
        }
        Ok(set)
    }
}

impl From<DelaySet> for Vec<u32> {
    fn from(set: DelaySet) -> Self {
        set.iter().collect()
    }
}

impl FromIterator<u32> for DelaySet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = DelaySet::new();
        for d in iter {
            set.insert(d);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440_and_octaves_double() {
        assert_eq!(pitch_to_freq(0.0), 440.0);
        assert!((pitch_to_freq(12.0) - 880.0).abs() < 1e-9);
        assert!((pitch_to_freq(-12.0) - 220.0).abs() < 1e-9);
    }

    #[test]
    fn length_measures_rounds_up() {
        let mut p = PatternState::new("p", 4, "s");
        assert_eq!(p.length_measures(), 1);
        p.add_note(NoteSpan::new(2, 4, 0.0));
        assert_eq!(p.length_measures(), 2);
        p.add_note(NoteSpan::new(0, 8, 0.0));
        assert_eq!(p.length_measures(), 2);
    }

    #[test]
    fn notes_stay_sorted_by_delay() {
        let mut p = PatternState::new("p", 4, "s");
        p.add_note(NoteSpan::new(3, 1, 0.0));
        p.add_note(NoteSpan::new(1, 1, 2.0));
        p.add_note(NoteSpan::new(3, 1, 5.0));
        let delays: Vec<u32> = p.notes.iter().map(|n| n.delay).collect();
        assert_eq!(delays, vec![1, 3, 3]);
        assert_eq!(p.notes[2].pitch, 5.0);
        assert_eq!(p.remove_note(0).map(|n| n.pitch), Some(2.0));
        assert_eq!(p.remove_note(9), None);
    }

    #[test]
    fn delay_set_iterates_ascending() {
        let mut set: DelaySet = [130, 2, 64, 0].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2, 64, 130]);
        assert_eq!(set.len(), 4);
        assert_eq!(set.first(), Some(0));
        assert_eq!(set.last(), Some(130));
        assert!(!set.insert(2));
        assert!(set.remove(130));
        assert!(!set.contains(130));
        assert_eq!(set.last(), Some(64));
        assert!(!set.remove(999));
    }

    #[test]
    fn oversized_delays_are_refused() {
        let mut set = DelaySet::new();
        assert!(!set.insert(u32::MAX));
        assert!(set.is_empty());
        assert!(set.insert(MAX_DELAY));
        assert_eq!(set.last(), Some(MAX_DELAY));

        assert_eq!(
            DelaySet::try_from(vec![1, MAX_DELAY + 1]),
            Err(DelayOutOfRange(MAX_DELAY + 1))
        );
        assert_eq!(
            DelaySet::try_from(vec![3, 1]).map(|s| s.iter().collect::<Vec<_>>()),
            Ok(vec![1, 3])
        );
    }

    #[test]
    fn note_end_saturates() {
        let note = NoteSpan::new(u32::MAX - 1, 5, 0.0);
        assert_eq!(note.end(), u32::MAX);
        let mut p = PatternState::new("p", 4, "s");
        p.add_note(note);
        assert_eq!(p.length_measures(), u32::MAX.div_ceil(4));
    }

    #[test]
    fn empty_delay_set() {
        let set = DelaySet::new();
        assert!(set.is_empty());
        assert_eq!(set.first(), None);
        assert_eq!(set.last(), None);
    }
}
