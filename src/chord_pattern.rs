//! Chord patterns
//!
//! A chord pattern is the set of intervals stacked on an implicit root. Each
//! scale degree (second, third, ... thirteenth) holds at most one interval,
//! so a pattern is stored as one optional interval per degree slot. The
//! packed 24-bit form gives every interval its own bit inside the field
//! reserved for its degree; it is used where a compact key is needed, such
//! as the suffix lookup tables of [`PatternLibrary`].

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Display, ops::BitOr, sync::OnceLock};

/// Bits of a packed pattern that carry interval codes.
pub const PATTERN_MASK: u32 = 0x00FF_FFFF;

/// Number of scale-degree slots in a pattern.
pub const DEGREE_COUNT: usize = 9;

/// Label used for masks with no catalogued name.
pub const UNKNOWN_SUFFIX: &str = "?";

/// A scale degree above the root, in ascending order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Degree {
    /// Seconds
    Second,
    /// Thirds
    Third,
    /// Fourths
    Fourth,
    /// Fifths
    Fifth,
    /// Sixths
    Sixth,
    /// Sevenths
    Seventh,
    /// Ninths
    Ninth,
    /// Elevenths
    Eleventh,
    /// Thirteenths
    Thirteenth,
}

impl Degree {
    /// All degrees in ascending order.
    pub const ALL: [Degree; DEGREE_COUNT] = [
        Degree::Second,
        Degree::Third,
        Degree::Fourth,
        Degree::Fifth,
        Degree::Sixth,
        Degree::Seventh,
        Degree::Ninth,
        Degree::Eleventh,
        Degree::Thirteenth,
    ];

    /// Slot index in `0..DEGREE_COUNT`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Intervals that may occupy this degree, in field bit order.
    pub const fn choices(self) -> &'static [Interval] {
        match self {
            Degree::Second => &[Interval::MinorSecond, Interval::MajorSecond],
            Degree::Third => &[Interval::MinorThird, Interval::MajorThird],
            Degree::Fourth => &[Interval::PerfectFourth, Interval::AugmentedFourth],
            Degree::Fifth => &[
                Interval::DiminishedFifth,
                Interval::PerfectFifth,
                Interval::AugmentedFifth,
            ],
            Degree::Sixth => &[Interval::MinorSixth, Interval::MajorSixth],
            Degree::Seventh => &[
                Interval::DiminishedSeventh,
                Interval::MinorSeventh,
                Interval::MajorSeventh,
            ],
            Degree::Ninth => &[
                Interval::MinorNinth,
                Interval::MajorNinth,
                Interval::AugmentedNinth,
            ],
            Degree::Eleventh => &[Interval::PerfectEleventh, Interval::AugmentedEleventh],
            Degree::Thirteenth => &[Interval::MinorThirteenth, Interval::MajorThirteenth],
        }
    }

    /// Lowest bit of this degree's field in the packed form.
    const fn field_offset(self) -> u32 {
        match self {
            Degree::Second => 0,
            Degree::Third => 2,
            Degree::Fourth => 4,
            Degree::Fifth => 6,
            Degree::Sixth => 9,
            Degree::Seventh => 11,
            Degree::Ninth => 14,
            Degree::Eleventh => 17,
            Degree::Thirteenth => 19,
        }
    }

    /// Mask covering this degree's field in the packed form.
    pub const fn field_mask(self) -> u32 {
        ((1u32 << self.choices().len() as u32) - 1) << self.field_offset()
    }
}

/// A named interval above the root.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// The root itself. Never stored in a pattern.
    Unison,
    /// ♭2
    MinorSecond,
    /// 2
    MajorSecond,
    /// ♭3
    MinorThird,
    /// 3
    MajorThird,
    /// 4
    PerfectFourth,
    /// ♯4
    AugmentedFourth,
    /// ♭5
    DiminishedFifth,
    /// 5
    PerfectFifth,
    /// ♯5
    AugmentedFifth,
    /// ♭6
    MinorSixth,
    /// 6
    MajorSixth,
    /// °7
    DiminishedSeventh,
    /// ♭7
    MinorSeventh,
    /// 7
    MajorSeventh,
    /// ♭9
    MinorNinth,
    /// 9
    MajorNinth,
    /// ♯9
    AugmentedNinth,
    /// 11
    PerfectEleventh,
    /// ♯11
    AugmentedEleventh,
    /// ♭13
    MinorThirteenth,
    /// 13
    MajorThirteenth,
}

impl Interval {
    /// Distance above the root in semitones.
    pub const fn semitones(self) -> usize {
        match self {
            Interval::Unison => 0,
            Interval::MinorSecond => 1,
            Interval::MajorSecond => 2,
            Interval::MinorThird => 3,
            Interval::MajorThird => 4,
            Interval::PerfectFourth => 5,
            Interval::AugmentedFourth | Interval::DiminishedFifth => 6,
            Interval::PerfectFifth => 7,
            Interval::AugmentedFifth | Interval::MinorSixth => 8,
            Interval::MajorSixth | Interval::DiminishedSeventh => 9,
            Interval::MinorSeventh => 10,
            Interval::MajorSeventh => 11,
            Interval::MinorNinth => 13,
            Interval::MajorNinth => 14,
            Interval::AugmentedNinth => 15,
            Interval::PerfectEleventh => 17,
            Interval::AugmentedEleventh => 18,
            Interval::MinorThirteenth => 20,
            Interval::MajorThirteenth => 21,
        }
    }

    /// Scale degree this interval belongs to; `None` for the unison.
    pub const fn degree(self) -> Option<Degree> {
        match self {
            Interval::Unison => None,
            Interval::MinorSecond | Interval::MajorSecond => Some(Degree::Second),
            Interval::MinorThird | Interval::MajorThird => Some(Degree::Third),
            Interval::PerfectFourth | Interval::AugmentedFourth => Some(Degree::Fourth),
            Interval::DiminishedFifth | Interval::PerfectFifth | Interval::AugmentedFifth => {
                Some(Degree::Fifth)
            }
            Interval::MinorSixth | Interval::MajorSixth => Some(Degree::Sixth),
            Interval::DiminishedSeventh | Interval::MinorSeventh | Interval::MajorSeventh => {
                Some(Degree::Seventh)
            }
            Interval::MinorNinth | Interval::MajorNinth | Interval::AugmentedNinth => {
                Some(Degree::Ninth)
            }
            Interval::PerfectEleventh | Interval::AugmentedEleventh => Some(Degree::Eleventh),
            Interval::MinorThirteenth | Interval::MajorThirteenth => Some(Degree::Thirteenth),
        }
    }

    /// The single bit this interval sets in a packed pattern (0 for the unison).
    pub fn code(self) -> u32 {
        match self.degree() {
            None => 0,
            Some(degree) => {
                let position = degree
                    .choices()
                    .iter()
                    .position(|&choice| choice == self)
                    .unwrap_or_default();
                1 << (degree.field_offset() + position as u32)
            }
        }
    }

    /// Mask of the field this interval's code lives in (0 for the unison).
    pub fn field_mask(self) -> u32 {
        self.degree().map_or(0, Degree::field_mask)
    }
}

/// Intervals stacked on an implicit root, at most one per scale degree.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChordPattern {
    slots: [Option<Interval>; DEGREE_COUNT],
}

impl ChordPattern {
    /// Pattern with no intervals above the root.
    pub const EMPTY: ChordPattern = ChordPattern {
        slots: [None; DEGREE_COUNT],
    };

    /// Build a pattern from a list of intervals. A later interval replaces an
    /// earlier one of the same degree; the unison is ignored.
    pub fn from_intervals(intervals: &[Interval]) -> Self {
        intervals
            .iter()
            .fold(ChordPattern::EMPTY, |pattern, &interval| pattern | interval)
    }

    /// The major triad, used as the fallback pattern for unknown suffixes.
    pub fn major_triad() -> Self {
        ChordPattern::from_intervals(&[Interval::MajorThird, Interval::PerfectFifth])
    }

    /// Decode a packed mask. Bits above 24 are ignored; when a field has more
    /// than one bit set, the lowest one wins.
    pub fn from_bits(bits: u32) -> Self {
        let bits = bits & PATTERN_MASK;
        let mut pattern = ChordPattern::EMPTY;
        for degree in Degree::ALL {
            pattern.slots[degree.index()] = degree
                .choices()
                .iter()
                .copied()
                .find(|choice| bits & choice.code() != 0);
        }
        pattern
    }

    /// Packed form: bitwise union of every interval's code.
    pub fn bits(&self) -> u32 {
        self.intervals()
            .map(Interval::code)
            .fold(0, |acc, code| acc | code)
    }

    /// Interval occupying `degree`, if any.
    pub fn interval_at(&self, degree: Degree) -> Option<Interval> {
        self.slots[degree.index()]
    }

    /// Stored intervals in ascending degree order.
    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.slots.iter().flatten().copied()
    }

    /// Whether `interval` is part of this pattern. The unison always is.
    pub fn contains(&self, interval: Interval) -> bool {
        match interval.degree() {
            None => true,
            Some(degree) => self.bits() & degree.field_mask() == interval.code(),
        }
    }

    /// Number of notes including the root.
    pub fn note_count(&self) -> usize {
        self.bits().count_ones() as usize + 1
    }

    /// Canonical ASCII suffix from the standard library, or `?`.
    pub fn suffix(&self) -> &'static str {
        PatternLibrary::standard().suffix(self)
    }
}

impl BitOr<Interval> for ChordPattern {
    type Output = ChordPattern;

    fn bitor(mut self, interval: Interval) -> ChordPattern {
        if let Some(degree) = interval.degree() {
            self.slots[degree.index()] = Some(interval);
        }
        self
    }
}

impl BitOr for ChordPattern {
    type Output = ChordPattern;

    fn bitor(self, other: ChordPattern) -> ChordPattern {
        other.intervals().fold(self, |pattern, interval| pattern | interval)
    }
}

impl Display for ChordPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&presentational(self.suffix()))
    }
}

/// Convert a canonical ASCII suffix into its presentational form.
///
/// `b` → `♭`, `#` → `♯`, `dim` → `°`, `aug` → `+`, `-` → `╱`, and
/// underscores alternate between `(` and `)`.
pub fn presentational(canonical: &str) -> String {
    let mut out = String::with_capacity(canonical.len() * 2);
    let mut open = false;
    let mut rest = canonical;
    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix("dim") {
            out.push('°');
            rest = tail;
            continue;
        }
        if let Some(tail) = rest.strip_prefix("aug") {
            out.push('+');
            rest = tail;
            continue;
        }
        match c {
            'b' => out.push('♭'),
            '#' => out.push('♯'),
            '-' => out.push('╱'),
            '_' => {
                out.push(if open { ')' } else { '(' });
                open = !open;
            }
            other => out.push(other),
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Convert a presentational suffix back into canonical ASCII form.
pub fn canonical(presentational: &str) -> String {
    let mut out = String::with_capacity(presentational.len());
    for c in presentational.chars() {
        match c {
            '♭' => out.push('b'),
            '♯' => out.push('#'),
            '°' => out.push_str("dim"),
            '+' => out.push_str("aug"),
            '╱' => out.push('-'),
            '(' | ')' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

use Interval::*;

/// Catalogued patterns with their canonical suffixes, major triad first.
const CATALOGUE: &[(&str, &[Interval])] = &[
    ("", &[MajorThird, PerfectFifth]),
    ("m", &[MinorThird, PerfectFifth]),
    ("dim", &[MinorThird, DiminishedFifth]),
    ("aug", &[MajorThird, AugmentedFifth]),
    ("sus2", &[MajorSecond, PerfectFifth]),
    ("sus4", &[PerfectFourth, PerfectFifth]),
    ("sus24", &[MajorSecond, PerfectFourth, PerfectFifth]),
    ("5", &[PerfectFifth]),
    ("_b5_", &[MajorThird, DiminishedFifth]),
    ("m#5", &[MinorThird, AugmentedFifth]),
    ("6", &[MajorThird, PerfectFifth, MajorSixth]),
    ("m6", &[MinorThird, PerfectFifth, MajorSixth]),
    ("6-9", &[MajorThird, PerfectFifth, MajorSixth, MajorNinth]),
    ("m6-9", &[MinorThird, PerfectFifth, MajorSixth, MajorNinth]),
    ("mb6", &[MinorThird, PerfectFifth, MinorSixth]),
    ("add9", &[MajorThird, PerfectFifth, MajorNinth]),
    ("madd9", &[MinorThird, PerfectFifth, MajorNinth]),
    ("addb9", &[MajorThird, PerfectFifth, MinorNinth]),
    ("add11", &[MajorThird, PerfectFifth, PerfectEleventh]),
    ("madd11", &[MinorThird, PerfectFifth, PerfectEleventh]),
    ("add#11", &[MajorThird, PerfectFifth, AugmentedEleventh]),
    ("7", &[MajorThird, PerfectFifth, MinorSeventh]),
    ("M7", &[MajorThird, PerfectFifth, MajorSeventh]),
    ("m7", &[MinorThird, PerfectFifth, MinorSeventh]),
    ("mM7", &[MinorThird, PerfectFifth, MajorSeventh]),
    ("dim7", &[MinorThird, DiminishedFifth, DiminishedSeventh]),
    ("dimM7", &[MinorThird, DiminishedFifth, MajorSeventh]),
    ("m7b5", &[MinorThird, DiminishedFifth, MinorSeventh]),
    ("7b5", &[MajorThird, DiminishedFifth, MinorSeventh]),
    ("7#5", &[MajorThird, AugmentedFifth, MinorSeventh]),
    ("M7b5", &[MajorThird, DiminishedFifth, MajorSeventh]),
    ("M7#5", &[MajorThird, AugmentedFifth, MajorSeventh]),
    ("7sus2", &[MajorSecond, PerfectFifth, MinorSeventh]),
    ("7sus4", &[PerfectFourth, PerfectFifth, MinorSeventh]),
    ("M7sus2", &[MajorSecond, PerfectFifth, MajorSeventh]),
    ("M7sus4", &[PerfectFourth, PerfectFifth, MajorSeventh]),
    ("m7add11", &[MinorThird, PerfectFifth, MinorSeventh, PerfectEleventh]),
    ("9", &[MajorThird, PerfectFifth, MinorSeventh, MajorNinth]),
    ("M9", &[MajorThird, PerfectFifth, MajorSeventh, MajorNinth]),
    ("m9", &[MinorThird, PerfectFifth, MinorSeventh, MajorNinth]),
    ("mM9", &[MinorThird, PerfectFifth, MajorSeventh, MajorNinth]),
    ("m9b5", &[MinorThird, DiminishedFifth, MinorSeventh, MajorNinth]),
    ("9b5", &[MajorThird, DiminishedFifth, MinorSeventh, MajorNinth]),
    ("9#5", &[MajorThird, AugmentedFifth, MinorSeventh, MajorNinth]),
    ("M9b5", &[MajorThird, DiminishedFifth, MajorSeventh, MajorNinth]),
    ("M9#5", &[MajorThird, AugmentedFifth, MajorSeventh, MajorNinth]),
    ("9sus4", &[PerfectFourth, PerfectFifth, MinorSeventh, MajorNinth]),
    ("7_b9_", &[MajorThird, PerfectFifth, MinorSeventh, MinorNinth]),
    ("7_#9_", &[MajorThird, PerfectFifth, MinorSeventh, AugmentedNinth]),
    ("m7_b9_", &[MinorThird, PerfectFifth, MinorSeventh, MinorNinth]),
    ("7_b5b9_", &[MajorThird, DiminishedFifth, MinorSeventh, MinorNinth]),
    ("7_b5#9_", &[MajorThird, DiminishedFifth, MinorSeventh, AugmentedNinth]),
    ("7_#5b9_", &[MajorThird, AugmentedFifth, MinorSeventh, MinorNinth]),
    ("7_#5#9_", &[MajorThird, AugmentedFifth, MinorSeventh, AugmentedNinth]),
    ("7_#11_", &[MajorThird, PerfectFifth, MinorSeventh, AugmentedEleventh]),
    ("M7_#11_", &[MajorThird, PerfectFifth, MajorSeventh, AugmentedEleventh]),
    ("7_b13_", &[MajorThird, PerfectFifth, MinorSeventh, MinorThirteenth]),
    ("11", &[MajorThird, PerfectFifth, MinorSeventh, MajorNinth, PerfectEleventh]),
    ("M11", &[MajorThird, PerfectFifth, MajorSeventh, MajorNinth, PerfectEleventh]),
    ("m11", &[MinorThird, PerfectFifth, MinorSeventh, MajorNinth, PerfectEleventh]),
    ("mM11", &[MinorThird, PerfectFifth, MajorSeventh, MajorNinth, PerfectEleventh]),
    ("m11b5", &[MinorThird, DiminishedFifth, MinorSeventh, MajorNinth, PerfectEleventh]),
    ("9_#11_", &[MajorThird, PerfectFifth, MinorSeventh, MajorNinth, AugmentedEleventh]),
    ("M9_#11_", &[MajorThird, PerfectFifth, MajorSeventh, MajorNinth, AugmentedEleventh]),
    ("7_b9#11_", &[MajorThird, PerfectFifth, MinorSeventh, MinorNinth, AugmentedEleventh]),
    ("7_b9b13_", &[MajorThird, PerfectFifth, MinorSeventh, MinorNinth, MinorThirteenth]),
    ("9_b13_", &[MajorThird, PerfectFifth, MinorSeventh, MajorNinth, MinorThirteenth]),
    ("13", &[MajorThird, PerfectFifth, MinorSeventh, MajorNinth, MajorThirteenth]),
    ("M13", &[MajorThird, PerfectFifth, MajorSeventh, MajorNinth, MajorThirteenth]),
    ("m13", &[MinorThird, PerfectFifth, MinorSeventh, MajorNinth, MajorThirteenth]),
    ("mM13", &[MinorThird, PerfectFifth, MajorSeventh, MajorNinth, MajorThirteenth]),
    ("13sus4", &[PerfectFourth, PerfectFifth, MinorSeventh, MajorNinth, MajorThirteenth]),
    ("13_b9_", &[MajorThird, PerfectFifth, MinorSeventh, MinorNinth, MajorThirteenth]),
    ("13_#9_", &[MajorThird, PerfectFifth, MinorSeventh, AugmentedNinth, MajorThirteenth]),
    (
        "13_#11_",
        &[MajorThird, PerfectFifth, MinorSeventh, MajorNinth, AugmentedEleventh, MajorThirteenth],
    ),
    (
        "M13_#11_",
        &[MajorThird, PerfectFifth, MajorSeventh, MajorNinth, AugmentedEleventh, MajorThirteenth],
    ),
];

/// Immutable table of catalogued chord patterns and their names.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    entries: Vec<(ChordPattern, &'static str)>,
    by_bits: HashMap<u32, usize>,
    by_suffix: HashMap<&'static str, usize>,
}

impl PatternLibrary {
    /// Build the catalogue. Prefer [`PatternLibrary::standard`] unless an
    /// owned copy is needed.
    pub fn build() -> Self {
        let entries: Vec<_> = CATALOGUE
            .iter()
            .map(|&(suffix, intervals)| (ChordPattern::from_intervals(intervals), suffix))
            .collect();
        let by_bits = entries
            .iter()
            .enumerate()
            .map(|(i, (pattern, _))| (pattern.bits(), i))
            .collect();
        let by_suffix = entries
            .iter()
            .enumerate()
            .map(|(i, &(_, suffix))| (suffix, i))
            .collect();
        log::debug!("built chord pattern library with {} patterns", entries.len());
        PatternLibrary {
            entries,
            by_bits,
            by_suffix,
        }
    }

    /// Shared catalogue, built on first use.
    pub fn standard() -> &'static PatternLibrary {
        static STANDARD: OnceLock<PatternLibrary> = OnceLock::new();
        STANDARD.get_or_init(PatternLibrary::build)
    }

    /// Number of catalogued patterns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the catalogue is fixed and non-empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Patterns with their canonical suffixes, in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = (ChordPattern, &'static str)> + '_ {
        self.entries.iter().copied()
    }

    /// Canonical suffix for `pattern`, or `?` if it is not catalogued.
    pub fn suffix(&self, pattern: &ChordPattern) -> &'static str {
        self.by_bits
            .get(&pattern.bits())
            .map_or(UNKNOWN_SUFFIX, |&i| self.entries[i].1)
    }

    /// Look up a pattern by suffix in either canonical or presentational form.
    pub fn pattern(&self, suffix: &str) -> Option<ChordPattern> {
        self.by_suffix
            .get(suffix)
            .or_else(|| self.by_suffix.get(canonical(suffix).as_str()))
            .map(|&i| self.entries[i].0)
    }
}
