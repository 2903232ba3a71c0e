//! Pitch classes and absolute pitches.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Number of pitch classes in an octave.
pub const SEMITONES: usize = 12;

/// Number of absolute pitches (MIDI numbering).
pub const PITCHES: usize = 128;

const ASCII_NAMES: [&str; SEMITONES] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

const PRESENTATIONAL_NAMES: [&str; SEMITONES] = [
    "C", "C♯", "D", "E♭", "E", "F", "F♯", "G", "A♭", "A", "B♭", "B",
];

/// Twelve chromatic pitch classes, ordered by their raw index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Chroma {
    /// C
    C,
    /// C sharp / D flat
    Cs,
    /// D
    D,
    /// D sharp / E flat
    Ds,
    /// E
    E,
    /// F
    F,
    /// F sharp / G flat
    Fs,
    /// G
    G,
    /// G sharp / A flat
    Gs,
    /// A
    A,
    /// A sharp / B flat
    As,
    /// B
    B,
}

impl Chroma {
    /// All pitch classes in index order.
    pub const ALL: [Chroma; SEMITONES] = [
        Chroma::C,
        Chroma::Cs,
        Chroma::D,
        Chroma::Ds,
        Chroma::E,
        Chroma::F,
        Chroma::Fs,
        Chroma::G,
        Chroma::Gs,
        Chroma::A,
        Chroma::As,
        Chroma::B,
    ];

    /// Pitch class for an index, wrapping modulo 12.
    pub const fn from_index(idx: usize) -> Chroma {
        Chroma::ALL[idx % SEMITONES]
    }

    /// Raw index in `0..12`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Transpose upwards by `semitones`, wrapping at the octave.
    pub const fn transpose(self, semitones: usize) -> Chroma {
        Chroma::from_index(self.index() + semitones)
    }

    /// ASCII-safe name, e.g. `C#` or `Eb`.
    pub const fn name(self) -> &'static str {
        ASCII_NAMES[self.index()]
    }

    /// Name using sharp and flat signs, e.g. `C♯` or `E♭`.
    pub const fn presentational_name(self) -> &'static str {
        PRESENTATIONAL_NAMES[self.index()]
    }

    /// Parse a leading note name from `s`: a letter `A`–`G` followed by any
    /// number of accidentals (`#`, `b`, `♯`, `♭`).
    ///
    /// Returns the pitch class and the unparsed remainder of `s`.
    pub fn parse_prefix(s: &str) -> Option<(Chroma, &str)> {
        let mut chars = s.char_indices();
        let (_, letter) = chars.next()?;
        let natural: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let mut offset = 0i32;
        let mut rest = &s[letter.len_utf8()..];
        for (pos, c) in chars {
            match c {
                '#' | '♯' => offset += 1,
                'b' | '♭' => offset -= 1,
                _ => {
                    rest = &s[pos..];
                    return Some((Chroma::from_index(wrap(natural + offset)), rest));
                }
            }
            rest = &s[pos + c.len_utf8()..];
        }
        Some((Chroma::from_index(wrap(natural + offset)), rest))
    }
}

fn wrap(semitone: i32) -> usize {
    semitone.rem_euclid(SEMITONES as i32) as usize
}

impl Display for Chroma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.presentational_name())
    }
}

impl From<Pitch> for Chroma {
    fn from(pitch: Pitch) -> Self {
        pitch.chroma()
    }
}

/// An absolute note in `0..128`, MIDI numbering (60 = middle C).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pitch(u8);

impl Pitch {
    /// Highest representable pitch.
    pub const MAX: Pitch = Pitch(127);

    /// Returns `None` when `value` is outside `0..128`.
    pub const fn new(value: u8) -> Option<Pitch> {
        if (value as usize) < PITCHES {
            Some(Pitch(value))
        } else {
            None
        }
    }

    /// Raw pitch number.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Raw pitch number as an index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Pitch class (`pitch mod 12`).
    pub const fn chroma(self) -> Chroma {
        Chroma::from_index(self.0 as usize)
    }

    /// Octave number, with middle C in octave 4.
    pub const fn octave(self) -> i32 {
        self.0 as i32 / SEMITONES as i32 - 1
    }

    /// Equal-tempered frequency in Hz, A4 = 440 Hz.
    pub fn frequency(self) -> f64 {
        440.0 * 2f64.powf((self.0 as f64 - 69.0) / SEMITONES as f64)
    }
}

impl Display for Pitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.chroma(), self.octave())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("C", Chroma::C, "")]
    #[case("C#m7", Chroma::Cs, "m7")]
    #[case("Dbmaj", Chroma::Cs, "maj")]
    #[case("B♭7", Chroma::As, "7")]
    #[case("Cb", Chroma::B, "")]
    #[case("E##", Chroma::Fs, "")]
    fn parses_note_prefix(#[case] input: &str, #[case] root: Chroma, #[case] rest: &str) {
        assert_eq!(Chroma::parse_prefix(input), Some((root, rest)));
    }

    #[test]
    fn rejects_non_note_prefix() {
        assert_eq!(Chroma::parse_prefix("H7"), None);
        assert_eq!(Chroma::parse_prefix(""), None);
        assert_eq!(Chroma::parse_prefix("m7"), None);
    }

    #[test]
    fn pitch_maps_to_chroma_and_octave() {
        let middle_c = Pitch::new(60).unwrap();
        assert_eq!(middle_c.chroma(), Chroma::C);
        assert_eq!(middle_c.octave(), 4);
        assert_eq!(Pitch::new(69).unwrap().chroma(), Chroma::A);
        assert!((Pitch::new(69).unwrap().frequency() - 440.0).abs() < 1e-9);
        assert_eq!(Pitch::new(128), None);
        assert_eq!(Pitch::MAX.chroma(), Chroma::G);
    }

    #[test]
    fn chroma_ordering_follows_index() {
        assert!(Chroma::C < Chroma::Cs);
        assert_eq!(Chroma::B.transpose(1), Chroma::C);
        assert_eq!(Chroma::from_index(23), Chroma::B);
        assert_eq!(Chroma::Ds.name(), "Eb");
        assert_eq!(Chroma::Ds.to_string(), "E♭");
    }
}
