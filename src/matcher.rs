//! Chord Matcher
//!
//! Scores every chord template of a library against one chroma frame and
//! picks the best match. The base score is the vector similarity
//! `a·b / (‖a‖ + ‖b‖)`, floored at zero; optional heuristic adjustments are
//! added on top.

use crate::{
    chord::{Chord, ChordLibrary},
    pitch::SEMITONES,
    vector::{ChromaVector, Threshold},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors when configuring or querying the matcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatcherError {
    /// An invalid argument was provided.
    #[error("invalid argument `{arg}`: {msg}")]
    InvalidArgument {
        /// The name of the invalid argument.
        arg: &'static str,
        /// A description of the problem.
        msg: String,
    },

    /// The chord library has no templates.
    #[error("chord library is empty")]
    EmptyLibrary,
}

/// A heuristic added to the base similarity score.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreAdjustment {
    /// Reward chords whose note count equals the estimated one.
    NoteCount {
        /// Added on a match.
        bonus: f32,
    },
    /// Compare the chord root with the strongest chroma of the frame.
    ChordRoot {
        /// Added when the strongest chroma is the root.
        match_bonus: f32,
        /// Subtracted when it is not.
        mismatch_penalty: f32,
        /// Energy the strongest chroma must exceed for the extra bonus.
        high_energy_threshold: f32,
        /// Added on a root match whose energy exceeds the threshold.
        high_energy_bonus: f32,
    },
    /// Look at how frame energy is spread over the chord's chromas.
    ///
    /// The bonuses and the foreign-energy penalty are scaled by the fraction
    /// of qualifying chromas, not their count, so a fully present seventh
    /// chord earns the same matching bonus as a fully present triad.
    EnergyDistribution {
        /// Critical chromas below this count as absent.
        absent_threshold: f32,
        /// Subtracted once if any critical chroma is absent.
        absent_penalty: f32,
        /// Chord chromas at or above this count as present.
        matching_threshold: f32,
        /// Scaled by the fraction of chord chromas present.
        matching_bonus: f32,
        /// Chromas at or above this count as strong.
        high_energy_threshold: f32,
        /// Scaled by the share of critical chromas that are strong.
        high_energy_bonus: f32,
        /// Scaled by the share of non-chord chromas that are strong.
        high_energy_penalty: f32,
    },
}

impl ScoreAdjustment {
    /// Check that every parameter is finite.
    pub fn validate(&self) -> Result<(), MatcherError> {
        let values: Vec<(&'static str, f32)> = match self {
            ScoreAdjustment::NoteCount { bonus } => vec![("bonus", *bonus)],
            ScoreAdjustment::ChordRoot {
                match_bonus,
                mismatch_penalty,
                high_energy_threshold,
                high_energy_bonus,
            } => vec![
                ("match_bonus", *match_bonus),
                ("mismatch_penalty", *mismatch_penalty),
                ("high_energy_threshold", *high_energy_threshold),
                ("high_energy_bonus", *high_energy_bonus),
            ],
            ScoreAdjustment::EnergyDistribution {
                absent_threshold,
                absent_penalty,
                matching_threshold,
                matching_bonus,
                high_energy_threshold,
                high_energy_bonus,
                high_energy_penalty,
            } => vec![
                ("absent_threshold", *absent_threshold),
                ("absent_penalty", *absent_penalty),
                ("matching_threshold", *matching_threshold),
                ("matching_bonus", *matching_bonus),
                ("high_energy_threshold", *high_energy_threshold),
                ("high_energy_bonus", *high_energy_bonus),
                ("high_energy_penalty", *high_energy_penalty),
            ],
        };
        match values.iter().find(|(_, v)| !v.is_finite()) {
            Some(&(arg, value)) => Err(MatcherError::InvalidArgument {
                arg,
                msg: format!("must be finite, got {value}"),
            }),
            None => Ok(()),
        }
    }

    fn apply(&self, frame: &FrameSummary<'_>, candidate: &Candidate) -> f32 {
        match *self {
            ScoreAdjustment::NoteCount { bonus } => match frame.note_count {
                Some(count) if count == candidate.chord.note_count() => bonus,
                _ => 0.0,
            },
            ScoreAdjustment::ChordRoot {
                match_bonus,
                mismatch_penalty,
                high_energy_threshold,
                high_energy_bonus,
            } => {
                if frame.strongest != candidate.chord.root.index() {
                    return -mismatch_penalty;
                }
                if frame.chroma[frame.strongest] > high_energy_threshold {
                    match_bonus + high_energy_bonus
                } else {
                    match_bonus
                }
            }
            ScoreAdjustment::EnergyDistribution {
                absent_threshold,
                absent_penalty,
                matching_threshold,
                matching_bonus,
                high_energy_threshold,
                high_energy_bonus,
                high_energy_penalty,
            } => {
                let energy = |&c: &usize| frame.chroma[c];
                let share = |indices: &[usize], threshold: f32| {
                    if indices.is_empty() {
                        return 0.0;
                    }
                    let hits = indices
                        .iter()
                        .map(energy)
                        .filter(|&e| e >= threshold)
                        .count();
                    hits as f32 / indices.len() as f32
                };

                let mut adjustment = 0.0;
                let absent = |&c: &usize| frame.chroma[c] < absent_threshold;
                if candidate.critical.iter().any(absent) {
                    adjustment -= absent_penalty;
                }
                adjustment += high_energy_bonus * share(&candidate.critical, high_energy_threshold);
                adjustment += matching_bonus * share(&candidate.members, matching_threshold);
                adjustment -=
                    high_energy_penalty * share(&candidate.outsiders, high_energy_threshold);
                adjustment
            }
        }
    }
}

/// Per-frame facts shared by every candidate.
struct FrameSummary<'a> {
    chroma: &'a ChromaVector,
    strongest: usize,
    note_count: Option<usize>,
}

/// Template plus the chroma index sets the adjustments need.
#[derive(Debug, Clone)]
struct Candidate {
    chord: Chord,
    template: ChromaVector,
    members: Vec<usize>,
    critical: Vec<usize>,
    outsiders: Vec<usize>,
}

impl Candidate {
    fn new(chord: Chord, template: ChromaVector) -> Self {
        let mut members: Vec<usize> = chord.chromas().iter().map(|c| c.index()).collect();
        members.sort_unstable();
        members.dedup();
        let mut critical: Vec<usize> = chord.critical_chromas().iter().map(|c| c.index()).collect();
        critical.sort_unstable();
        critical.dedup();
        let outsiders = (0..SEMITONES).filter(|c| !members.contains(c)).collect();
        Candidate {
            chord,
            template,
            members,
            critical,
            outsiders,
        }
    }
}

/// A chord with its score for one frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct ChordScore {
    /// The scored chord.
    pub chord: Chord,
    /// Base similarity plus adjustments.
    pub score: f32,
}

/// Scores of every library chord for one frame.
#[derive(Debug, Clone)]
pub struct MatchResult {
    library: Arc<ChordLibrary>,
    scores: Vec<f32>,
    best: ChordScore,
}

impl MatchResult {
    /// The highest-scoring chord; the earliest in library order on ties.
    pub fn best(&self) -> ChordScore {
        self.best
    }

    /// Scores in library order.
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Every chord with its score, in library order.
    pub fn iter(&self) -> impl Iterator<Item = ChordScore> + '_ {
        self.library
            .templates()
            .iter()
            .zip(&self.scores)
            .map(|(template, &score)| ChordScore {
                chord: template.chord(),
                score,
            })
    }

    /// Score of one chord, if it is in the library.
    pub fn score_of(&self, chord: &Chord) -> Option<f32> {
        self.library.position(chord).map(|i| self.scores[i])
    }

    /// The `k` best chords by descending score, ties in library order.
    ///
    /// Returns `Err(InvalidArgument)` if `k == 0`.
    pub fn top(&self, k: usize) -> Result<Vec<ChordScore>, MatcherError> {
        if k == 0 {
            return Err(MatcherError::InvalidArgument {
                arg: "k",
                msg: "must be >= 1".to_string(),
            });
        }
        let mut ranked: Vec<ChordScore> = self.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(k);
        Ok(ranked)
    }
}

/// Builder for [`ChordMatcher`].
pub struct ChordMatcherBuilder {
    library: Option<Arc<ChordLibrary>>,
    adjustments: Vec<ScoreAdjustment>,
}

impl ChordMatcherBuilder {
    /// Standard library, no adjustments.
    pub fn new() -> Self {
        ChordMatcherBuilder {
            library: None,
            adjustments: Vec::new(),
        }
    }

    /// Match against a shared library instead of the standard one.
    pub fn library(mut self, library: Arc<ChordLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    /// Add one adjustment.
    pub fn adjustment(mut self, adjustment: ScoreAdjustment) -> Self {
        self.adjustments.push(adjustment);
        self
    }

    /// Replace all adjustments.
    pub fn adjustments(mut self, adjustments: impl IntoIterator<Item = ScoreAdjustment>) -> Self {
        self.adjustments = adjustments.into_iter().collect();
        self
    }

    /// Validate and build the matcher.
    pub fn build(self) -> Result<ChordMatcher, MatcherError> {
        for adjustment in &self.adjustments {
            adjustment.validate()?;
        }
        let library = self
            .library
            .unwrap_or_else(|| Arc::new(ChordLibrary::standard()));
        if library.is_empty() {
            return Err(MatcherError::EmptyLibrary);
        }
        let candidates = library
            .templates()
            .iter()
            .map(|t| Candidate::new(t.chord(), *t.vector()))
            .collect();
        log::debug!(
            "chord matcher over {} templates with {} adjustments",
            library.len(),
            self.adjustments.len()
        );
        Ok(ChordMatcher {
            library,
            adjustments: self.adjustments,
            candidates,
        })
    }
}

impl Default for ChordMatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Scores chroma frames against a chord library.
#[derive(Debug, Clone)]
pub struct ChordMatcher {
    library: Arc<ChordLibrary>,
    adjustments: Vec<ScoreAdjustment>,
    candidates: Vec<Candidate>,
}

impl ChordMatcher {
    /// Return a builder to choose the library and adjustments.
    pub fn builder() -> ChordMatcherBuilder {
        ChordMatcherBuilder::new()
    }

    /// The library chords are drawn from.
    pub fn library(&self) -> &Arc<ChordLibrary> {
        &self.library
    }

    /// Configured adjustments.
    pub fn adjustments(&self) -> &[ScoreAdjustment] {
        &self.adjustments
    }

    /// Score every chord against `frame`.
    ///
    /// `note_count` feeds [`ScoreAdjustment::NoteCount`]; pass `None` when no
    /// estimate is available. Adjustments are skipped for silent frames.
    pub fn match_frame(&self, frame: &ChromaVector, note_count: Option<usize>) -> MatchResult {
        let silent = frame.is_silent();
        let summary = FrameSummary {
            chroma: frame,
            strongest: frame.argmax(),
            note_count,
        };

        let scores: Vec<f32> = self
            .candidates
            .iter()
            .map(|candidate| {
                let base = frame.similarity(&candidate.template).max(0.0);
                if silent {
                    return base;
                }
                self.adjustments
                    .iter()
                    .fold(base, |score, adjustment| score + adjustment.apply(&summary, candidate))
            })
            .collect();

        // strict comparison keeps the first of equal scores
        let (best_index, best_score) = scores
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bs), (i, &s)| {
                if s > bs {
                    (i, s)
                } else {
                    (bi, bs)
                }
            });
        let best = ChordScore {
            chord: self.candidates[best_index].chord,
            score: best_score,
        };
        log::trace!("best match {} ({:.4})", best.chord, best.score);

        MatchResult {
            library: Arc::clone(&self.library),
            scores,
            best,
        }
    }
}

/// Number of chroma bins holding at least `threshold` times the frame
/// maximum; `None` for a silent frame.
pub fn estimate_note_count(frame: &ChromaVector, threshold: f32) -> Option<usize> {
    let max = frame.max();
    if max <= 0.0 {
        return None;
    }
    Some(frame.indices_by_threshold(Threshold::AtLeast(threshold * max)).len())
}
