//! # chord_estimator
//!
//! Frame-by-frame chord estimation for complete mono signals: extract pitch
//! features, fold them into chroma, run a configurable transform pipeline and
//! match every frame against a library of chord templates.
//!
//! ## Example
//! ```rust
//! use chord_estimator::{ChordEstimator, ScoreAdjustment, StftConfig, Variant};
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1) Build an estimator
//!     let estimator = ChordEstimator::builder()
//!         .stft(StftConfig::new(16_384, 4_096))
//!         .variant(Variant::Cp)
//!         .adjustment(ScoreAdjustment::NoteCount { bonus: 0.02 })
//!         .build()?;
//!
//!     // 2) Analyse a complete signal
//!     let samples: Vec<f32> = vec![0.0; 44_100]; // fill with actual samples
//!     let analysis = estimator.analyze(&samples, 44_100)?;
//!
//!     // 3) Read the estimates
//!     for estimate in &analysis.estimates {
//!         println!(
//!             "{:6.2}s  {}  ({:.3})",
//!             estimate.time_secs, estimate.chord, estimate.score
//!         );
//!     }
//!
//!     Ok(())
//! }
//! # run().unwrap();
//! ```
//!
//! ## Pipeline
//! - [`spectrogram`] or [`filterbank`]: signal to 128-bin pitch features
//! - [`chromagram`]: pitch features to 12-bin chroma features
//! - [`transform`]: compression, normalisation, quantisation, smoothing
//! - [`matcher`]: similarity against every chord template
//!
//! The crate logs through the `log` facade and never installs a logger.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

/// High-level estimator API.
pub use estimator::{
    Analysis, ChordEstimator, ChordEstimatorBuilder, ChordSegment, EstimatorConfig,
    ExtractionStrategy, FrameEstimate, ScoreDetail,
};

/// Chord theory.
pub use chord::{Chord, ChordLibrary, ChordTemplate};
pub use chord_pattern::{ChordPattern, Interval, PatternLibrary};
pub use pitch::{Chroma, Pitch};

/// Features and their transforms.
pub use filterbank::{FilterbankConfig, MultirateSignal};
pub use spectrogram::{BinMapCache, Representation, StftConfig};
pub use transform::{FeatureFilter, NormSpace, Normalization, Pipeline, Variant};
pub use vector::{
    ChromaBuffer, ChromaVector, FeatureBuffer, FeatureVector, PitchBuffer, PitchVector,
};

/// Matching.
pub use matcher::{ChordMatcher, ChordMatcherBuilder, ChordScore, MatchResult, ScoreAdjustment};

/// Errors.
pub use error::{ChordParseError, EstimatorError, ExtractionError, FilterError, MatcherError};

/// Chords, templates and the chord library.
pub mod chord;

/// Interval bitmasks and the chord pattern catalogue.
pub mod chord_pattern;

/// Chroma reduction.
pub mod chromagram;

/// Error types.
pub mod error;

/// Full analysis runs.
pub mod estimator;

/// Multirate filterbank pitch features.
pub mod filterbank;

/// Template matching.
pub mod matcher;

/// Pitch classes and absolute pitches.
pub mod pitch;

/// STFT pitch features.
pub mod spectrogram;

/// Feature filters and presets.
pub mod transform;

/// Feature vectors and buffers.
pub mod vector;
