//! Chord Estimator
//!
//! Runs the whole analysis over a complete mono signal: pitch feature
//! extraction, the transform pipeline, chroma reduction and per-frame chord
//! matching.
//!
//! ```rust
//! use chord_estimator::{ChordEstimator, StftConfig, Variant};
//!
//! # fn main() -> Result<(), chord_estimator::EstimatorError> {
//! let estimator = ChordEstimator::builder()
//!     .stft(StftConfig::new(8192, 4096))
//!     .variant(Variant::Cp)
//!     .build()?;
//!
//! let samples = vec![0.0_f32; 44_100];
//! let analysis = estimator.analyze(&samples, 44_100)?;
//! for segment in analysis.segments() {
//!     println!("{:.2}s  {}", segment.start_secs, segment.chord);
//! }
//! # Ok(())
//! # }
//! ```

use crate::{
    chord::{Chord, ChordLibrary},
    chromagram,
    error::EstimatorError,
    filterbank::{FilterbankConfig, FilterbankExtractor, MultirateSignal, REFERENCE_RATE},
    matcher::{estimate_note_count, ChordMatcher, MatchResult, ScoreAdjustment},
    spectrogram::{BinMapCache, StftConfig, StftExtractor},
    transform::{Pipeline, Variant},
    vector::{ChromaBuffer, PitchBuffer},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How pitch features are computed.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Short-time Fourier transform of the signal.
    Stft(StftConfig),
    /// Band-pass filterbank over a multirate copy of the signal.
    Filterbank(FilterbankConfig),
}

impl Default for ExtractionStrategy {
    fn default() -> Self {
        ExtractionStrategy::Stft(StftConfig::default())
    }
}

/// How much of each frame's match is kept in an [`Analysis`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDetail {
    /// Only the best chord and its score.
    #[default]
    Best,
    /// Also every chord's score.
    Full,
}

/// Serializable settings of a [`ChordEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Pitch feature extraction.
    pub strategy: ExtractionStrategy,
    /// Filters around chroma reduction.
    pub pipeline: Pipeline,
    /// Heuristics added to the base score.
    pub adjustments: Vec<ScoreAdjustment>,
    /// Fraction of the frame maximum a chroma needs to count as a sounding
    /// note.
    pub note_count_threshold: f32,
    /// Output detail.
    pub detail: ScoreDetail,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            strategy: ExtractionStrategy::default(),
            pipeline: Pipeline::preset(Variant::Cp),
            adjustments: Vec::new(),
            note_count_threshold: 0.5,
            detail: ScoreDetail::Best,
        }
    }
}

impl EstimatorConfig {
    /// Check every part of the configuration.
    pub fn validate(&self) -> Result<(), EstimatorError> {
        match &self.strategy {
            ExtractionStrategy::Stft(config) => config.validate()?,
            ExtractionStrategy::Filterbank(config) => config.validate()?,
        }
        self.pipeline.validate()?;
        for adjustment in &self.adjustments {
            adjustment.validate()?;
        }
        if !(self.note_count_threshold > 0.0 && self.note_count_threshold <= 1.0) {
            return Err(EstimatorError::Configuration(format!(
                "note_count_threshold must be in (0, 1], got {}",
                self.note_count_threshold
            )));
        }
        Ok(())
    }
}

/// Builder for [`ChordEstimator`].
pub struct ChordEstimatorBuilder {
    config: EstimatorConfig,
    library: Option<Arc<ChordLibrary>>,
    cache: Option<Arc<BinMapCache>>,
}

impl ChordEstimatorBuilder {
    /// Start from [`EstimatorConfig::default`].
    pub fn new() -> Self {
        ChordEstimatorBuilder {
            config: EstimatorConfig::default(),
            library: None,
            cache: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EstimatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract with the STFT strategy.
    pub fn stft(mut self, config: StftConfig) -> Self {
        self.config.strategy = ExtractionStrategy::Stft(config);
        self
    }

    /// Extract with the filterbank strategy.
    pub fn filterbank(mut self, config: FilterbankConfig) -> Self {
        self.config.strategy = ExtractionStrategy::Filterbank(config);
        self
    }

    /// Use a custom transform pipeline.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.config.pipeline = pipeline;
        self
    }

    /// Use a preset transform pipeline.
    pub fn variant(mut self, variant: Variant) -> Self {
        self.config.pipeline = Pipeline::preset(variant);
        self
    }

    /// Add a score adjustment.
    pub fn adjustment(mut self, adjustment: ScoreAdjustment) -> Self {
        self.config.adjustments.push(adjustment);
        self
    }

    /// Set the relative threshold of the note-count estimate.
    pub fn note_count_threshold(mut self, threshold: f32) -> Self {
        self.config.note_count_threshold = threshold;
        self
    }

    /// Choose how much of each match to keep.
    pub fn detail(mut self, detail: ScoreDetail) -> Self {
        self.config.detail = detail;
        self
    }

    /// Share a chord library between estimators.
    pub fn library(mut self, library: Arc<ChordLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    /// Share bin-to-pitch maps between estimators.
    pub fn bin_map_cache(mut self, cache: Arc<BinMapCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate the configuration and build the estimator.
    pub fn build(self) -> Result<ChordEstimator, EstimatorError> {
        self.config.validate()?;

        let extractor = match self.config.strategy {
            ExtractionStrategy::Stft(config) => {
                let cache = self.cache.unwrap_or_default();
                Extractor::Stft(StftExtractor::with_cache(config, cache)?)
            }
            ExtractionStrategy::Filterbank(config) => {
                Extractor::Filterbank(FilterbankExtractor::new(config)?)
            }
        };

        let mut matcher = ChordMatcher::builder()
            .adjustments(self.config.adjustments.iter().copied());
        if let Some(library) = self.library {
            matcher = matcher.library(library);
        }

        Ok(ChordEstimator {
            matcher: matcher.build()?,
            extractor,
            config: self.config,
        })
    }
}

impl Default for ChordEstimatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
enum Extractor {
    Stft(StftExtractor),
    Filterbank(FilterbankExtractor),
}

/// Frame-by-frame chord estimation over complete signals.
///
/// An estimator holds no per-run state; one instance can analyse any number
/// of signals, also from several threads.
#[derive(Debug, Clone)]
pub struct ChordEstimator {
    config: EstimatorConfig,
    extractor: Extractor,
    matcher: ChordMatcher,
}

impl ChordEstimator {
    /// Return a builder to customize the estimator.
    pub fn builder() -> ChordEstimatorBuilder {
        ChordEstimatorBuilder::new()
    }

    /// Estimator with [`EstimatorConfig::default`].
    pub fn new() -> Result<Self, EstimatorError> {
        Self::builder().build()
    }

    /// The configuration in use.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// The matcher used for every frame.
    pub fn matcher(&self) -> &ChordMatcher {
        &self.matcher
    }

    /// Analyse a mono signal.
    ///
    /// The filterbank strategy requires at least 44100 Hz.
    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> Result<Analysis, EstimatorError> {
        log::debug!(
            "analysing {} samples at {sample_rate} Hz",
            samples.len()
        );
        let pitch = match &self.extractor {
            Extractor::Stft(stft) => stft.extract(samples, sample_rate)?,
            Extractor::Filterbank(bank) => {
                bank.extract(&MultirateSignal::from_mono(samples, sample_rate)?)
            }
        };
        self.finish(pitch)
    }

    /// Analyse a signal whose multirate streams were produced elsewhere.
    /// The STFT strategy reads the 44100 Hz stream.
    pub fn analyze_multirate(&self, signal: &MultirateSignal) -> Result<Analysis, EstimatorError> {
        let pitch = match &self.extractor {
            Extractor::Stft(stft) => stft.extract(signal.stream(0), REFERENCE_RATE)?,
            Extractor::Filterbank(bank) => bank.extract(signal),
        };
        self.finish(pitch)
    }

    /// Match already extracted pitch features.
    pub fn analyze_features(&self, pitch: PitchBuffer) -> Result<Analysis, EstimatorError> {
        self.finish(pitch)
    }

    fn finish(&self, raw_pitch: PitchBuffer) -> Result<Analysis, EstimatorError> {
        let pipeline = &self.config.pipeline;
        let pitch_features = pipeline.apply_pitch(&raw_pitch)?;
        let chroma_features = pipeline.apply_chroma(&chromagram::reduce(&pitch_features))?;
        log::debug!(
            "{} pitch frames -> {} chroma frames at {:.3} Hz",
            pitch_features.len(),
            chroma_features.len(),
            chroma_features.feature_rate()
        );

        let threshold = self.config.note_count_threshold;
        let results: Vec<MatchResult> = chroma_features
            .frames()
            .par_iter()
            .map(|frame| {
                self.matcher
                    .match_frame(frame, estimate_note_count(frame, threshold))
            })
            .collect();

        let estimates = results
            .iter()
            .enumerate()
            .map(|(index, result)| {
                let best = result.best();
                FrameEstimate {
                    index,
                    time_secs: chroma_features.frame_time(index),
                    chord: best.chord,
                    score: best.score,
                }
            })
            .collect();

        let match_results = match self.config.detail {
            ScoreDetail::Best => None,
            ScoreDetail::Full => Some(results),
        };

        Ok(Analysis {
            feature_rate: chroma_features.feature_rate(),
            pitch_features,
            chroma_features,
            estimates,
            match_results,
        })
    }
}

/// Best chord of one chroma frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct FrameEstimate {
    /// Frame position.
    pub index: usize,
    /// Frame start in seconds.
    pub time_secs: f32,
    /// Best matching chord.
    pub chord: Chord,
    /// Its score.
    pub score: f32,
}

/// Consecutive frames sharing the same best chord.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct ChordSegment {
    /// The chord.
    pub chord: Chord,
    /// Start of the first frame.
    pub start_secs: f32,
    /// End of the last frame.
    pub end_secs: f32,
    /// Mean best score over the segment.
    pub mean_score: f32,
}

/// Result of one analysis run.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Chroma frames per second; the rate of `estimates`.
    pub feature_rate: f32,
    /// Pitch features after the pitch stage of the pipeline.
    pub pitch_features: PitchBuffer,
    /// Chroma features after the chroma stage, as matched.
    pub chroma_features: ChromaBuffer,
    /// One estimate per chroma frame.
    pub estimates: Vec<FrameEstimate>,
    /// Every chord's score per frame, with [`ScoreDetail::Full`].
    pub match_results: Option<Vec<MatchResult>>,
}

impl Analysis {
    /// Merge runs of equal best chords.
    pub fn segments(&self) -> Vec<ChordSegment> {
        let mut segments = Vec::new();
        let mut rest = self.estimates.as_slice();
        while let Some(first) = rest.first() {
            let run = rest
                .iter()
                .position(|e| e.chord != first.chord)
                .unwrap_or(rest.len());
            let total: f32 = rest[..run].iter().map(|e| e.score).sum();
            segments.push(ChordSegment {
                chord: first.chord,
                start_secs: first.index as f32 / self.feature_rate,
                end_secs: (first.index + run) as f32 / self.feature_rate,
                mean_score: total / run as f32,
            });
            rest = &rest[run..];
        }
        segments
    }

    /// Best chord names, one per frame.
    pub fn chord_names(&self) -> Vec<String> {
        self.estimates.iter().map(|e| e.chord.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pitch::Chroma,
        transform::FeatureFilter,
        vector::PitchVector,
    };
    use pretty_assertions::assert_eq;

    fn pitch_frame(pitches: &[usize]) -> PitchVector {
        let mut frame = PitchVector::zeros();
        for &p in pitches {
            frame[p] = 1.0;
        }
        frame
    }

    #[test]
    fn default_configuration_is_valid() {
        assert!(EstimatorConfig::default().validate().is_ok());
        assert!(ChordEstimator::new().is_ok());
    }

    #[test]
    fn bad_configuration_fails_before_analysis() {
        let stft = ChordEstimator::builder()
            .stft(StftConfig::new(1024, 0))
            .build();
        assert!(matches!(stft, Err(EstimatorError::Extraction(_))));

        let filter = ChordEstimator::builder()
            .pipeline(Pipeline::new().then(FeatureFilter::Smoothing {
                window_size: 0,
                downsample_factor: 1,
            }))
            .build();
        assert!(matches!(filter, Err(EstimatorError::Filter(_))));

        let adjustment = ChordEstimator::builder()
            .adjustment(ScoreAdjustment::NoteCount {
                bonus: f32::INFINITY,
            })
            .build();
        assert!(matches!(adjustment, Err(EstimatorError::Matcher(_))));

        let threshold = ChordEstimator::builder().note_count_threshold(0.0).build();
        assert!(matches!(threshold, Err(EstimatorError::Configuration(_))));
    }

    #[test]
    fn filterbank_rejects_low_sample_rates() {
        let estimator = ChordEstimator::builder()
            .filterbank(FilterbankConfig::default())
            .build()
            .unwrap();
        let err = estimator.analyze(&[0.0; 1000], 22_050).unwrap_err();
        assert_eq!(
            err,
            EstimatorError::Extraction(crate::error::ExtractionError::InvalidSampleRate {
                minimum: 44_100,
                got: 22_050
            })
        );
    }

    #[test]
    fn features_are_matched_frame_by_frame() {
        let c_major = pitch_frame(&[48, 52, 55, 60]);
        let a_minor = pitch_frame(&[45, 57, 60, 64]);
        let pitch = PitchBuffer::new(vec![c_major, c_major, a_minor, a_minor, a_minor], 4.0);

        let estimator = ChordEstimator::builder()
            .variant(Variant::Cp)
            .detail(ScoreDetail::Full)
            .build()
            .unwrap();
        let analysis = estimator.analyze_features(pitch).unwrap();

        assert_eq!(analysis.feature_rate, 4.0);
        assert_eq!(analysis.estimates.len(), 5);
        assert_eq!(analysis.chord_names()[0], "C");
        assert_eq!(analysis.chord_names()[4], "Am");
        assert_eq!(analysis.match_results.as_ref().map(Vec::len), Some(5));

        let segments = analysis.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].chord, "C".parse::<Chord>().unwrap());
        assert_eq!(segments[0].start_secs, 0.0);
        assert_eq!(segments[0].end_secs, 0.5);
        assert_eq!(segments[1].chord.root, Chroma::A);
        assert_eq!(segments[1].end_secs, 1.25);
        assert!((segments[1].mean_score - analysis.estimates[4].score).abs() < 1e-6);
    }

    #[test]
    fn best_detail_drops_full_scores() {
        let pitch = PitchBuffer::new(vec![pitch_frame(&[60, 64, 67])], 10.0);
        let analysis = ChordEstimator::new()
            .unwrap()
            .analyze_features(pitch)
            .unwrap();
        assert!(analysis.match_results.is_none());
        assert_eq!(analysis.segments().len(), 1);
    }

    #[test]
    fn estimators_share_the_bin_map_cache() {
        let cache = Arc::new(BinMapCache::new());
        let build = || {
            ChordEstimator::builder()
                .stft(StftConfig::new(2048, 1024))
                .bin_map_cache(Arc::clone(&cache))
                .build()
                .unwrap()
        };
        let signal = vec![0.1_f32; 8192];
        build().analyze(&signal, 44_100).unwrap();
        build().analyze(&signal, 44_100).unwrap();
        assert_eq!(cache.computations(), 1);
    }

    #[test]
    fn config_loads_from_json() {
        let json = r#"{
            "strategy": {"filterbank": {"window_size": 4410, "hop_size": 2205}},
            "pipeline": {"chroma_stage": [{"normalization": "max_value"}]},
            "adjustments": [{"note_count": {"bonus": 0.1}}],
            "detail": "full"
        }"#;
        let config: EstimatorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.strategy,
            ExtractionStrategy::Filterbank(FilterbankConfig::new(4410, 2205))
        );
        assert_eq!(config.note_count_threshold, 0.5);
        assert_eq!(config.detail, ScoreDetail::Full);
        assert!(ChordEstimator::builder().config(config).build().is_ok());

        let back: EstimatorConfig =
            serde_json::from_str(&serde_json::to_string(&EstimatorConfig::default()).unwrap())
                .unwrap();
        assert_eq!(back, EstimatorConfig::default());
    }
}
