//! # Musical Tuning Module
//!
//! Equal-temperament note math for the tuner: frequency to note/octave/cents,
//! note names back to frequencies, and the guitar tuning presets used by the
//! string-targeted mode.
//!
//! ## Conventions
//! - MIDI note numbers, A4 = 69
//! - Reference pitch (A4) is a parameter everywhere; nothing assumes 440 Hz
//!   except the preset tables, which are scaled on use
//! - English and French (solfège) note names share one index

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;

/// Chromatic note names starting at C.
pub const NOTE_NAMES_EN: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Localized (French solfège) names, same order as [`NOTE_NAMES_EN`].
pub const NOTE_NAMES_FR: [&str; 12] = [
    "Do", "Do#", "Ré", "Ré#", "Mi", "Fa", "Fa#", "Sol", "Sol#", "La", "La#", "Si",
];

/// MIDI note number of A4.
pub const A4_MIDI: i32 = 69;

/// Frequency the preset tables are written against.
pub const PRESET_REFERENCE_HZ: f32 = 440.0;

/// Number of strings in every preset.
pub const STRING_COUNT: usize = 6;

/// A frequency mapped onto the nearest equal-tempered note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoteReading {
    pub name: &'static str,
    pub name_localized: &'static str,
    pub octave: i32,
    /// Deviation from the nearest note, in [-50, 50].
    pub cents: f32,
    pub midi: i32,
}

/// Maps a frequency to its nearest note at the given A4 reference.
///
/// Returns `None` for non-positive or non-finite inputs, so the logarithm can
/// never produce NaN or infinity downstream.
pub fn frequency_to_note(frequency_hz: f32, reference_pitch_hz: f32) -> Option<NoteReading> {
    let note_number = fractional_midi(frequency_hz, reference_pitch_hz)?;
    let rounded = note_number.round();
    let midi = rounded as i32;
    let cents = ((note_number - rounded) * 100.0) as f32;

    let index = (midi - 12).rem_euclid(12) as usize;
    let octave = (midi - 12).div_euclid(12);

    Some(NoteReading {
        name: NOTE_NAMES_EN[index],
        name_localized: NOTE_NAMES_FR[index],
        octave,
        cents,
        midi,
    })
}

/// `12 * log2(f / A4) + 69`, in f64 to keep sub-cent precision.
pub fn fractional_midi(frequency_hz: f32, reference_pitch_hz: f32) -> Option<f64> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return None;
    }
    if !(reference_pitch_hz.is_finite() && reference_pitch_hz > 0.0) {
        return None;
    }
    Some(12.0 * (frequency_hz as f64 / reference_pitch_hz as f64).log2() + A4_MIDI as f64)
}

/// Frequency of a MIDI note at the given A4 reference.
pub fn midi_to_frequency(midi: i32, reference_pitch_hz: f32) -> f32 {
    (reference_pitch_hz as f64 * 2f64.powf((midi - A4_MIDI) as f64 / 12.0)) as f32
}

/// Frequency of the equal-tempered note nearest to `frequency_hz`.
pub fn nearest_note_frequency(frequency_hz: f32, reference_pitch_hz: f32) -> Option<f32> {
    let midi = fractional_midi(frequency_hz, reference_pitch_hz)?.round() as i32;
    Some(midi_to_frequency(midi, reference_pitch_hz))
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat. Returns `None` when either
/// frequency is not a positive finite number.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> Option<f32> {
    if !(freq.is_finite() && freq > 0.0 && target_freq.is_finite() && target_freq > 0.0) {
        return None;
    }
    Some((1200.0 * (freq as f64 / target_freq as f64).log2()) as f32)
}

/// Note name ("A4", "F#3", "Bb2") to MIDI number, for octaves 0 to 8.
///
/// Built once; covers sharp and flat spellings.
static NOTE_MAP: Lazy<BTreeMap<String, i32>> = Lazy::new(|| {
    const FLAT_NAMES: [&str; 12] = [
        "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
    ];
    let mut map = BTreeMap::new();
    for octave in 0..=8 {
        for index in 0..12 {
            let midi = (octave + 1) * 12 + index as i32;
            map.insert(format!("{}{}", NOTE_NAMES_EN[index], octave), midi);
            map.insert(format!("{}{}", FLAT_NAMES[index], octave), midi);
        }
    }
    map
});

/// Gets the MIDI number for a note name such as `"E2"` or `"Bb3"`.
pub fn midi_from_name(name: &str) -> Option<i32> {
    NOTE_MAP.get(name.trim()).copied()
}

/// Resolves a note name to its frequency at the given reference pitch.
pub fn note_name_to_frequency(name: &str, reference_pitch_hz: f32) -> Option<f32> {
    midi_from_name(name).map(|midi| midi_to_frequency(midi, reference_pitch_hz))
}

/// A six-string tuning: display names plus low-to-high target notes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningPreset {
    pub name: &'static str,
    pub name_localized: &'static str,
    pub notes: [&'static str; STRING_COUNT],
    /// Target frequencies at A4 = 440 Hz.
    pub frequencies: [f32; STRING_COUNT],
}

impl TuningPreset {
    /// Target frequency of `string_index`, scaled to the reference pitch.
    pub fn target_frequency(&self, string_index: usize, reference_pitch_hz: f32) -> Option<f32> {
        self.frequencies
            .get(string_index)
            .map(|&freq| freq * (reference_pitch_hz / PRESET_REFERENCE_HZ))
    }

    pub fn target_note(&self, string_index: usize) -> Option<&'static str> {
        self.notes.get(string_index).copied()
    }

    /// All open-string frequencies scaled to the reference pitch.
    pub fn scaled_frequencies(&self, reference_pitch_hz: f32) -> [f32; STRING_COUNT] {
        self.frequencies
            .map(|freq| freq * (reference_pitch_hz / PRESET_REFERENCE_HZ))
    }
}

pub static TUNING_PRESETS: [TuningPreset; 5] = [
    TuningPreset {
        name: "Standard",
        name_localized: "Standard",
        notes: ["E2", "A2", "D3", "G3", "B3", "E4"],
        frequencies: [82.41, 110.00, 146.83, 196.00, 246.94, 329.63],
    },
    TuningPreset {
        name: "Drop D",
        name_localized: "Drop D",
        notes: ["D2", "A2", "D3", "G3", "B3", "E4"],
        frequencies: [73.42, 110.00, 146.83, 196.00, 246.94, 329.63],
    },
    TuningPreset {
        name: "DADGAD",
        name_localized: "DADGAD",
        notes: ["D2", "A2", "D3", "G3", "A3", "D4"],
        frequencies: [73.42, 110.00, 146.83, 196.00, 220.00, 293.66],
    },
    TuningPreset {
        name: "Open G",
        name_localized: "Sol ouvert",
        notes: ["D2", "G2", "D3", "G3", "B3", "D4"],
        frequencies: [73.42, 98.00, 146.83, 196.00, 246.94, 293.66],
    },
    TuningPreset {
        name: "Open D",
        name_localized: "Ré ouvert",
        notes: ["D2", "A2", "D3", "F#3", "A3", "D4"],
        frequencies: [73.42, 110.00, 146.83, 185.00, 220.00, 293.66],
    },
];

/// Looks up a preset by index.
pub fn preset(index: usize) -> Option<&'static TuningPreset> {
    TUNING_PRESETS.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn a440_is_a4_with_zero_cents() {
        let note = frequency_to_note(440.0, 440.0).unwrap();
        assert_eq!(note.name, "A");
        assert_eq!(note.name_localized, "La");
        assert_eq!(note.octave, 4);
        assert_eq!(note.midi, 69);
        assert_abs_diff_eq!(note.cents, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn a445_is_about_twenty_cents_sharp() {
        let note = frequency_to_note(445.0, 440.0).unwrap();
        assert_eq!((note.name, note.octave), ("A", 4));
        assert_abs_diff_eq!(note.cents, 19.56, epsilon = 0.05);
    }

    #[test]
    fn octave_boundary_is_at_c() {
        let b3 = frequency_to_note(246.94, 440.0).unwrap();
        let c4 = frequency_to_note(261.63, 440.0).unwrap();
        assert_eq!((b3.name, b3.octave), ("B", 3));
        assert_eq!((c4.name, c4.octave), ("C", 4));
        assert_eq!(c4.name_localized, "Do");
    }

    #[test]
    fn low_e_at_a432() {
        // E2 at A4 = 432 Hz sits about 31.8 cents below the 440 table value.
        let e2 = midi_to_frequency(40, 432.0);
        let note = frequency_to_note(e2, 432.0).unwrap();
        assert_eq!((note.name, note.octave), ("E", 2));
        assert_abs_diff_eq!(note.cents, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(
            calculate_cents_deviation(e2, 82.41).unwrap(),
            -31.77,
            epsilon = 0.1
        );
    }

    #[test]
    fn every_note_round_trips() {
        for reference in [415.0, 440.0, 466.0] {
            for midi in 28..=96 {
                let freq = midi_to_frequency(midi, reference);
                let note = frequency_to_note(freq, reference).unwrap();
                assert_eq!(note.midi, midi);
                assert_abs_diff_eq!(note.cents, 0.0, epsilon = 0.01);
            }
        }
    }

    #[test]
    fn range_boundaries_stay_finite() {
        for freq in [70.0, 2200.0] {
            let note = frequency_to_note(freq, 440.0).unwrap();
            assert!(note.cents.is_finite());
            assert!(note.cents.abs() <= 50.0);
        }
        assert_eq!(frequency_to_note(0.0, 440.0), None);
        assert_eq!(frequency_to_note(-82.0, 440.0), None);
        assert_eq!(frequency_to_note(f32::NAN, 440.0), None);
        assert_eq!(frequency_to_note(110.0, 0.0), None);
        assert_eq!(calculate_cents_deviation(110.0, 0.0), None);
    }

    #[test]
    fn note_names_parse_with_sharps_and_flats() {
        assert_eq!(midi_from_name("A4"), Some(69));
        assert_eq!(midi_from_name("E2"), Some(40));
        assert_eq!(midi_from_name("F#3"), midi_from_name("Gb3"));
        assert_eq!(midi_from_name("H2"), None);
        assert_abs_diff_eq!(note_name_to_frequency("A4", 442.0).unwrap(), 442.0, epsilon = 1e-3);
    }

    #[test]
    fn preset_tables_match_their_note_names() {
        for preset in &TUNING_PRESETS {
            for (note, &freq) in preset.notes.iter().zip(preset.frequencies.iter()) {
                let expected = note_name_to_frequency(note, PRESET_REFERENCE_HZ).unwrap();
                let cents = calculate_cents_deviation(freq, expected).unwrap();
                assert!(cents.abs() < 1.0, "{} {}: {} cents", preset.name, note, cents);
            }
        }
    }

    #[test]
    fn preset_targets_follow_calibration() {
        let standard = preset(0).unwrap();
        assert_eq!(standard.target_note(1), Some("A2"));
        assert_abs_diff_eq!(standard.target_frequency(1, 440.0).unwrap(), 110.0);
        assert_abs_diff_eq!(standard.target_frequency(1, 442.0).unwrap(), 110.5, epsilon = 1e-4);
        assert_eq!(standard.target_frequency(6, 440.0), None);
        assert!(preset(5).is_none());
    }
}
