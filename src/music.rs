use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DOUBLE_FLAT: i32 = -2;
pub const FLAT: i32 = -1;
pub const NATURAL: i32 = 0;
pub const SHARP: i32 = 1;
pub const DOUBLE_SHARP: i32 = 2;

/// Reference pitch A4.
pub const A4_FREQUENCY: f64 = 440.0;
pub const A4_MIDI: i32 = 69;

/// Half steps removed from decoded MIDI notes before they reach the drives.
/// Two octaves down keeps most melodies inside what a floppy stepper can produce.
pub const MIDI_DRIVE_SHIFT: i32 = 24;

fn semitone() -> f64 {
    2.0_f64.powf(1.0 / 12.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PitchError {
    #[error("note must be within A-G, got {0:?}")]
    InvalidNote(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub enum Letter {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Letter {
    /// Half steps from A within the same octave number.
    pub fn steps_from_a(self) -> i32 {
        match self {
            Letter::C => -9,
            Letter::D => -7,
            Letter::E => -5,
            Letter::F => -4,
            Letter::G => -2,
            Letter::A => 0,
            Letter::B => 2,
        }
    }
}

impl TryFrom<char> for Letter {
    type Error = PitchError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c.to_ascii_uppercase() {
            'C' => Ok(Letter::C),
            'D' => Ok(Letter::D),
            'E' => Ok(Letter::E),
            'F' => Ok(Letter::F),
            'G' => Ok(Letter::G),
            'A' => Ok(Letter::A),
            'B' => Ok(Letter::B),
            _ => Err(PitchError::InvalidNote(c)),
        }
    }
}

impl From<Letter> for char {
    fn from(letter: Letter) -> char {
        match letter {
            Letter::C => 'C',
            Letter::D => 'D',
            Letter::E => 'E',
            Letter::F => 'F',
            Letter::G => 'G',
            Letter::A => 'A',
            Letter::B => 'B',
        }
    }
}

/// Frequency (Hz) of a pitch in scientific notation, octaves starting on C.
///
/// `accidental` is a plain half-step offset: the named constants cover the
/// usual flats and sharps, but any value works (`-12` drops an octave).
pub fn frequency_of(letter: char, accidental: i32, octave: i32) -> Result<f64, PitchError> {
    let letter = Letter::try_from(letter)?;
    Ok(letter_frequency(letter, accidental, octave))
}

pub fn letter_frequency(letter: Letter, accidental: i32, octave: i32) -> f64 {
    let steps = letter.steps_from_a() + accidental + (octave - 4) * 12;
    A4_FREQUENCY * semitone().powi(steps)
}

pub fn frequency_of_midi(note: i32) -> f64 {
    A4_FREQUENCY * semitone().powi(note - A4_MIDI)
}

/// Pitch of a decoded note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PitchSpec {
    Named {
        letter: Letter,
        accidental: i32,
        octave: i32,
    },
    /// Raw MIDI note number, already shifted by the decoder if it needs to be.
    Midi(i32),
}

impl PitchSpec {
    pub fn named(letter: Letter, accidental: i32, octave: i32) -> Self {
        PitchSpec::Named {
            letter,
            accidental,
            octave,
        }
    }

    pub fn frequency(&self) -> f64 {
        match *self {
            PitchSpec::Named {
                letter,
                accidental,
                octave,
            } => letter_frequency(letter, accidental, octave),
            PitchSpec::Midi(note) => frequency_of_midi(note),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a4_is_reference_pitch() {
        assert_relative_eq!(frequency_of('A', NATURAL, 4).unwrap(), 440.0, epsilon = 1e-9);
        assert_relative_eq!(frequency_of_midi(69), 440.0, epsilon = 1e-9);
    }

    #[test]
    fn converts_notes_to_pitches() {
        let rounded = |l, a, o| frequency_of(l, a, o).unwrap().round();
        assert_relative_eq!(frequency_of('A', NATURAL, 0).unwrap(), 27.5, epsilon = 1e-9);
        assert_eq!(rounded('D', FLAT, 2), 69.0);
        assert_eq!(rounded('F', SHARP, 3), 185.0);
        assert_eq!(rounded('G', DOUBLE_FLAT, 1), 44.0);
        assert_eq!(rounded('G', DOUBLE_SHARP, 1), 55.0);
    }

    #[test]
    fn letters_are_case_insensitive() {
        assert_eq!(frequency_of('a', 0, 4), frequency_of('A', 0, 4));
        assert_eq!(frequency_of('c', SHARP, 2), frequency_of('C', SHARP, 2));
    }

    #[test]
    fn accidental_doubles_as_half_steps() {
        assert_relative_eq!(frequency_of('A', -12, 3).unwrap(), 110.0, epsilon = 1e-9);
        assert_relative_eq!(frequency_of('A', 12, 3).unwrap(), 440.0, epsilon = 1e-9);
        assert_relative_eq!(frequency_of('E', 5, 4).unwrap(), 440.0, epsilon = 1e-9);
    }

    #[test]
    fn half_steps_trade_for_octaves() {
        for letter in ['A', 'B', 'C', 'D', 'E', 'F', 'G'] {
            for octave in 0..8 {
                for n in -2..=2 {
                    let a = frequency_of(letter, n, octave).unwrap();
                    let b = frequency_of(letter, n + 12, octave - 1).unwrap();
                    assert_relative_eq!(a, b, max_relative = 1e-12);
                }
            }
        }
    }

    #[test]
    fn rejects_letters_outside_a_to_g() {
        assert_eq!(frequency_of('H', NATURAL, 4), Err(PitchError::InvalidNote('H')));
        assert_eq!(Letter::try_from('x'), Err(PitchError::InvalidNote('x')));
    }

    #[test]
    fn midi_and_named_pitches_agree() {
        // MIDI 36 is C2
        assert_relative_eq!(
            PitchSpec::Midi(36).frequency(),
            PitchSpec::named(Letter::C, NATURAL, 2).frequency(),
            max_relative = 1e-12
        );
    }
}
