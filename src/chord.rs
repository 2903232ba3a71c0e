//! Chords, chord templates and the chord library.

use crate::{
    chord_pattern::{presentational, ChordPattern, Interval, PatternLibrary},
    pitch::Chroma,
    vector::ChromaVector,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// Errors from strict chord-name parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChordParseError {
    /// The name does not start with a note letter.
    #[error("invalid chord root in `{0}`")]
    InvalidRoot(String),

    /// The text after the root is not a catalogued suffix.
    #[error("unknown chord suffix `{0}`")]
    UnknownSuffix(String),
}

/// A chord: a root pitch class and a pattern of intervals above it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chord {
    /// Root pitch class.
    pub root: Chroma,
    /// Intervals above the root.
    pub pattern: ChordPattern,
}

impl Chord {
    /// Build a chord from its parts.
    pub const fn new(root: Chroma, pattern: ChordPattern) -> Self {
        Chord { root, pattern }
    }

    /// Parse a chord name, falling back instead of failing: an unknown suffix
    /// yields the major triad on the parsed root, and an unreadable root
    /// yields C major.
    pub fn parse_lenient(name: &str) -> Chord {
        match name.parse() {
            Ok(chord) => chord,
            Err(ChordParseError::UnknownSuffix(suffix)) => {
                let root = Chroma::parse_prefix(name).map_or(Chroma::C, |(root, _)| root);
                log::warn!("unknown suffix `{suffix}` in `{name}`, using a major triad");
                Chord::new(root, ChordPattern::major_triad())
            }
            Err(ChordParseError::InvalidRoot(_)) => {
                log::warn!("unparseable chord name `{name}`, using C major");
                Chord::new(Chroma::C, ChordPattern::major_triad())
            }
        }
    }

    /// Pitch classes of the chord: the root followed by each interval above
    /// it in ascending order.
    pub fn chromas(&self) -> Vec<Chroma> {
        std::iter::once(self.root)
            .chain(
                self.pattern
                    .intervals()
                    .map(|interval| self.root.transpose(interval.semitones())),
            )
            .collect()
    }

    /// Pitch classes except the perfect fifth, which adds little when
    /// telling chords apart.
    pub fn critical_chromas(&self) -> Vec<Chroma> {
        std::iter::once(self.root)
            .chain(
                self.pattern
                    .intervals()
                    .filter(|&interval| interval != Interval::PerfectFifth)
                    .map(|interval| self.root.transpose(interval.semitones())),
            )
            .collect()
    }

    /// Pitch class sounding at `interval`, if the chord contains it.
    pub fn chroma_at(&self, interval: Interval) -> Option<Chroma> {
        if interval == Interval::Unison {
            return Some(self.root);
        }
        self.pattern
            .contains(interval)
            .then(|| self.root.transpose(interval.semitones()))
    }

    /// Number of notes including the root.
    pub fn note_count(&self) -> usize {
        self.pattern.note_count()
    }

    /// ASCII-safe name, e.g. `C#m7b5`.
    pub fn name(&self) -> String {
        format!("{}{}", self.root.name(), self.pattern.suffix())
    }
}

impl Display for Chord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            self.root.presentational_name(),
            presentational(self.pattern.suffix())
        )
    }
}

impl FromStr for Chord {
    type Err = ChordParseError;

    /// Accepts ASCII (`Ebm7b5`) and presentational (`E♭m7♭5`) names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (root, suffix) =
            Chroma::parse_prefix(s).ok_or_else(|| ChordParseError::InvalidRoot(s.to_string()))?;
        let pattern = PatternLibrary::standard()
            .pattern(suffix)
            .ok_or_else(|| ChordParseError::UnknownSuffix(suffix.to_string()))?;
        Ok(Chord::new(root, pattern))
    }
}

/// Reference chroma vector for a chord: weight 1 on every chord chroma.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordTemplate {
    chord: Chord,
    vector: ChromaVector,
}

impl ChordTemplate {
    /// Render the template for `chord`.
    pub fn new(chord: Chord) -> Self {
        let mut vector = ChromaVector::zeros();
        for chroma in chord.chromas() {
            vector[chroma.index()] = 1.0;
        }
        ChordTemplate { chord, vector }
    }

    /// The chord this template was rendered from.
    pub fn chord(&self) -> Chord {
        self.chord
    }

    /// The rendered chroma vector.
    pub fn vector(&self) -> &ChromaVector {
        &self.vector
    }
}

/// Every catalogued pattern on every root, with rendered templates.
///
/// Iteration order is pattern-major, root-minor, following the pattern
/// catalogue; the matcher relies on it to break ties.
#[derive(Debug, Clone)]
pub struct ChordLibrary {
    templates: Vec<ChordTemplate>,
}

impl ChordLibrary {
    /// Render all chords of `patterns`.
    pub fn new(patterns: &PatternLibrary) -> Self {
        let templates: Vec<_> = patterns
            .iter()
            .flat_map(|(pattern, _)| {
                Chroma::ALL
                    .into_iter()
                    .map(move |root| ChordTemplate::new(Chord::new(root, pattern)))
            })
            .collect();
        log::debug!("rendered {} chord templates", templates.len());
        ChordLibrary { templates }
    }

    /// Library over the standard pattern catalogue.
    pub fn standard() -> Self {
        ChordLibrary::new(PatternLibrary::standard())
    }

    /// Number of chords.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the library holds no chords.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates in library order.
    pub fn templates(&self) -> &[ChordTemplate] {
        &self.templates
    }

    /// Position of `chord` in library order.
    pub fn position(&self, chord: &Chord) -> Option<usize> {
        self.templates.iter().position(|t| t.chord == *chord)
    }

    /// Template at `index`.
    pub fn get(&self, index: usize) -> Option<&ChordTemplate> {
        self.templates.get(index)
    }
}

impl Default for ChordLibrary {
    fn default() -> Self {
        ChordLibrary::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn chroma_count_matches_intervals_plus_root() {
        let library = ChordLibrary::standard();
        for template in library.templates() {
            let chord = template.chord();
            assert_eq!(chord.chromas().len(), chord.pattern.intervals().count() + 1);
            assert_eq!(chord.chroma_at(Interval::Unison), Some(chord.root));
        }
    }

    #[test]
    fn library_covers_every_root_of_every_pattern() {
        let library = ChordLibrary::standard();
        assert_eq!(library.len(), PatternLibrary::standard().len() * 12);
        assert_eq!(library.len(), 912);
        let first = library.get(0).unwrap().chord();
        assert_eq!(first, Chord::new(Chroma::C, ChordPattern::major_triad()));
        assert_eq!(library.get(1).unwrap().chord().root, Chroma::Cs);
    }

    #[rstest]
    #[case("C", Chroma::C, &[Chroma::C, Chroma::E, Chroma::G])]
    #[case("Am", Chroma::A, &[Chroma::A, Chroma::C, Chroma::E])]
    #[case("G7", Chroma::G, &[Chroma::G, Chroma::B, Chroma::D, Chroma::F])]
    #[case("Bdim7", Chroma::B, &[Chroma::B, Chroma::D, Chroma::F, Chroma::Gs])]
    #[case("E♭M7", Chroma::Ds, &[Chroma::Ds, Chroma::G, Chroma::As, Chroma::D])]
    fn parses_and_spells_chords(
        #[case] name: &str,
        #[case] root: Chroma,
        #[case] chromas: &[Chroma],
    ) {
        let chord: Chord = name.parse().unwrap();
        assert_eq!(chord.root, root);
        assert_eq!(chord.chromas(), chromas.to_vec());
    }

    #[test]
    fn critical_chromas_drop_the_fifth() {
        let chord: Chord = "C7".parse().unwrap();
        assert_eq!(chord.critical_chromas(), vec![Chroma::C, Chroma::E, Chroma::As]);
        let diminished: Chord = "Cdim".parse().unwrap();
        assert_eq!(diminished.critical_chromas(), diminished.chromas());
    }

    #[test]
    fn names_round_trip() {
        for template in ChordLibrary::standard().templates() {
            let chord = template.chord();
            assert_eq!(chord.name().parse::<Chord>(), Ok(chord));
            assert_eq!(chord.to_string().parse::<Chord>(), Ok(chord));
        }
    }

    #[test]
    fn strict_parse_reports_failures() {
        assert_eq!(
            "Cxyz".parse::<Chord>(),
            Err(ChordParseError::UnknownSuffix("xyz".to_string()))
        );
        assert_eq!(
            "xyz".parse::<Chord>(),
            Err(ChordParseError::InvalidRoot("xyz".to_string()))
        );
    }

    #[test]
    fn lenient_parse_falls_back_to_major_triads() {
        let fallback = Chord::parse_lenient("F#weird");
        assert_eq!(fallback, Chord::new(Chroma::Fs, ChordPattern::major_triad()));
        let unreadable = Chord::parse_lenient("??");
        assert_eq!(unreadable, Chord::new(Chroma::C, ChordPattern::major_triad()));
        assert_eq!(Chord::parse_lenient("Dm"), "Dm".parse().unwrap());
    }

    #[test]
    fn templates_weight_each_chroma_once() {
        let chord: Chord = "C13".parse().unwrap();
        let template = ChordTemplate::new(chord);
        assert_eq!(template.vector().sum(), 6.0);
        assert_eq!(template.vector()[Chroma::C.index()], 1.0);
        assert_eq!(template.vector()[Chroma::Cs.index()], 0.0);

        // ♭3 and ♯9 land on the same pitch class
        let doubled = Chord::new(
            Chroma::C,
            ChordPattern::from_intervals(&[Interval::MinorThird, Interval::AugmentedNinth]),
        );
        assert_eq!(doubled.chromas().len(), 3);
        assert_eq!(ChordTemplate::new(doubled).vector().sum(), 2.0);
    }
}
