//! Feature transforms
//!
//! An ordered chain of filters turns raw pitch and chroma features into the
//! variants used for matching. Filters are pure: each one reads a complete
//! buffer and returns a new one. Frame-local filters run frame-parallel;
//! smoothing needs its neighbours and runs over the finished buffer.

use crate::{
    chromagram,
    error::FilterError,
    vector::{ChromaBuffer, FeatureBuffer, FeatureVector, PitchBuffer},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Norm used by [`Normalization::LpNorm`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormSpace {
    /// Sum of absolute values.
    L1,
    /// Euclidean norm.
    L2,
    /// Largest absolute value.
    LInfinity,
}

impl NormSpace {
    fn norm<const N: usize>(self, v: &FeatureVector<N>) -> f32 {
        let values = v.as_slice().iter().map(|x| x.abs());
        match self {
            NormSpace::L1 => values.sum(),
            NormSpace::L2 => v.norm(),
            NormSpace::LInfinity => values.fold(0.0, f32::max),
        }
    }
}

/// How a frame is scaled by [`FeatureFilter::Normalization`].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Divide by the largest component.
    MaxValue,
    /// Divide by the norm, unless the norm is below `threshold`.
    LpNorm {
        /// Which norm.
        space: NormSpace,
        /// Frames with a smaller norm are left as they are.
        threshold: f32,
    },
}

/// One stage of a transform pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFilter {
    /// `v' = log10(term + factor·v) − log10(term)`; monotonic, keeps zero.
    Compression {
        /// Additive term inside the logarithm.
        term: f32,
        /// Scale applied before taking the logarithm.
        factor: f32,
    },
    /// Per-frame scaling.
    Normalization(Normalization),
    /// Map each component to the weight of the highest step it reaches;
    /// components below the first step become 0.
    Quantization {
        /// Ascending step boundaries (inclusive).
        steps: Vec<f32>,
        /// Weight for each step.
        weights: Vec<f32>,
    },
    /// Centred moving average over `window_size` frames, then keep every
    /// `downsample_factor`-th frame.
    Smoothing {
        /// Frames averaged per output frame.
        window_size: usize,
        /// Output keeps one frame in this many.
        downsample_factor: usize,
    },
    /// Keep only the DCT coefficients in `lowest..=highest` of each frame.
    CoefficientRange {
        /// First kept coefficient.
        lowest: usize,
        /// Last kept coefficient, or all remaining ones.
        highest: Option<usize>,
    },
}

impl FeatureFilter {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            FeatureFilter::Compression { .. } => "compression",
            FeatureFilter::Normalization(_) => "normalization",
            FeatureFilter::Quantization { .. } => "quantization",
            FeatureFilter::Smoothing { .. } => "smoothing",
            FeatureFilter::CoefficientRange { .. } => "coefficient_range",
        }
    }

    /// Check parameters without touching any data.
    pub fn validate(&self) -> Result<(), FilterError> {
        let name = self.name();
        match self {
            FeatureFilter::Compression { term, factor } => {
                if !(term.is_finite() && *term > 0.0) {
                    return Err(FilterError::invalid(
                        name,
                        format!("term must be positive, got {term}"),
                    ));
                }
                if !(factor.is_finite() && *factor > 0.0) {
                    return Err(FilterError::invalid(
                        name,
                        format!("factor must be positive, got {factor}"),
                    ));
                }
            }
            FeatureFilter::Normalization(Normalization::MaxValue) => {}
            FeatureFilter::Normalization(Normalization::LpNorm { threshold, .. }) => {
                if !(threshold.is_finite() && *threshold >= 0.0) {
                    return Err(FilterError::invalid(
                        name,
                        format!("threshold must be non-negative, got {threshold}"),
                    ));
                }
            }
            FeatureFilter::Quantization { steps, weights } => {
                if steps.is_empty() {
                    return Err(FilterError::invalid(name, "at least one step is required"));
                }
                if steps.len() != weights.len() {
                    return Err(FilterError::invalid(
                        name,
                        format!("{} steps but {} weights", steps.len(), weights.len()),
                    ));
                }
                if steps.iter().chain(weights).any(|v| !v.is_finite()) {
                    return Err(FilterError::invalid(name, "steps and weights must be finite"));
                }
                if steps.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(FilterError::invalid(name, "steps must be strictly ascending"));
                }
            }
            FeatureFilter::Smoothing {
                window_size,
                downsample_factor,
            } => {
                if *window_size == 0 {
                    return Err(FilterError::invalid(name, "window_size cannot be zero"));
                }
                if *downsample_factor == 0 {
                    return Err(FilterError::invalid(name, "downsample_factor cannot be zero"));
                }
            }
            FeatureFilter::CoefficientRange { lowest, highest } => {
                if let Some(highest) = highest {
                    if lowest > highest {
                        return Err(FilterError::invalid(
                            name,
                            format!("lowest ({lowest}) exceeds highest ({highest})"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the filter over a complete buffer.
    pub fn apply<const N: usize>(
        &self,
        input: &FeatureBuffer<N>,
    ) -> Result<FeatureBuffer<N>, FilterError> {
        self.validate()?;
        log::trace!("applying {} to {} frames", self.name(), input.len());
        let output = match self {
            FeatureFilter::Compression { term, factor } => {
                let offset = term.log10();
                map_frames(input, |v| v.map(|x| (term + factor * x.max(0.0)).log10() - offset))
            }
            FeatureFilter::Normalization(method) => map_frames(input, |v| normalize(v, *method)),
            FeatureFilter::Quantization { steps, weights } => {
                map_frames(input, |v| v.map(|x| quantize(x, steps, weights)))
            }
            FeatureFilter::Smoothing {
                window_size,
                downsample_factor,
            } => smooth(input, *window_size, *downsample_factor),
            FeatureFilter::CoefficientRange { lowest, highest } => {
                let dct = Dct::new(N);
                let highest = highest.unwrap_or(N).min(N.saturating_sub(1));
                map_frames(input, |v| dct.band_limit(v, *lowest, highest))
            }
        };
        Ok(output)
    }
}

fn map_frames<const N: usize>(
    input: &FeatureBuffer<N>,
    f: impl Fn(&FeatureVector<N>) -> FeatureVector<N> + Sync + Send,
) -> FeatureBuffer<N> {
    FeatureBuffer::new(
        input.frames().par_iter().map(f).collect(),
        input.feature_rate(),
    )
}

fn normalize<const N: usize>(v: &FeatureVector<N>, method: Normalization) -> FeatureVector<N> {
    match method {
        Normalization::MaxValue => {
            let max = v.max();
            if max > 0.0 {
                *v * (1.0 / max)
            } else {
                *v
            }
        }
        Normalization::LpNorm { space, threshold } => {
            let norm = space.norm(v);
            if norm <= 0.0 || norm < threshold {
                *v
            } else {
                *v * (1.0 / norm)
            }
        }
    }
}

fn quantize(x: f32, steps: &[f32], weights: &[f32]) -> f32 {
    steps
        .iter()
        .rposition(|&step| x >= step)
        .map_or(0.0, |i| weights[i])
}

fn smooth<const N: usize>(
    input: &FeatureBuffer<N>,
    window_size: usize,
    downsample_factor: usize,
) -> FeatureBuffer<N> {
    let frames = input.frames();
    let half = window_size / 2;
    let smoothed = (0..frames.len())
        .step_by(downsample_factor)
        .map(|t| {
            let start = t.saturating_sub(half);
            let end = (t + window_size - half).min(frames.len());
            let total = frames[start..end]
                .iter()
                .fold(FeatureVector::zeros(), |acc, frame| acc + *frame);
            total * (1.0 / (end - start) as f32)
        })
        .collect();
    FeatureBuffer::new(smoothed, input.feature_rate() / downsample_factor as f32)
}

/// Orthonormal DCT-II and its inverse for vectors of one length.
struct Dct {
    len: usize,
    /// `basis[k * len + n] = s_k · cos(π/len · (n + ½) · k)`
    basis: Vec<f32>,
}

impl Dct {
    fn new(len: usize) -> Self {
        let mut basis = vec![0.0; len * len];
        for k in 0..len {
            let scale = if k == 0 {
                (1.0 / len as f32).sqrt()
            } else {
                (2.0 / len as f32).sqrt()
            };
            for n in 0..len {
                basis[k * len + n] = scale * (PI / len as f32 * (n as f32 + 0.5) * k as f32).cos();
            }
        }
        Dct { len, basis }
    }

    fn band_limit<const N: usize>(
        &self,
        v: &FeatureVector<N>,
        lowest: usize,
        highest: usize,
    ) -> FeatureVector<N> {
        let mut out = FeatureVector::zeros();
        if lowest > highest {
            return out;
        }
        for k in lowest..=highest {
            let row = &self.basis[k * self.len..(k + 1) * self.len];
            let coefficient: f32 = row.iter().zip(v.as_slice()).map(|(b, x)| b * x).sum();
            for (o, b) in out.as_mut_slice().iter_mut().zip(row) {
                *o += coefficient * b;
            }
        }
        out
    }
}

/// Named presets of the transform pipeline.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// No transforms.
    Raw,
    /// Chroma pitch: log compression and L2 normalisation.
    #[default]
    Cp,
    /// Chroma energy normalised statistics: quantised and smoothed.
    Cens,
    /// Chroma DCT-reduced log pitch: timbre coefficients removed.
    Crp,
}

/// Filters applied to pitch features before reduction and to chroma
/// features after it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Filters on 128-bin pitch frames.
    #[serde(default)]
    pub pitch_stage: Vec<FeatureFilter>,
    /// Filters on 12-bin chroma frames.
    #[serde(default)]
    pub chroma_stage: Vec<FeatureFilter>,
}

impl Pipeline {
    /// Pipeline with no filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline for a named variant.
    pub fn preset(variant: Variant) -> Self {
        let lp = |space, threshold| {
            FeatureFilter::Normalization(Normalization::LpNorm { space, threshold })
        };
        match variant {
            Variant::Raw => Pipeline::new(),
            Variant::Cp => Pipeline::new()
                .then(FeatureFilter::Compression {
                    term: 1.0,
                    factor: 100.0,
                })
                .then(lp(NormSpace::L2, 0.001)),
            Variant::Cens => Pipeline::new()
                .then(lp(NormSpace::L1, 0.001))
                .then(FeatureFilter::Quantization {
                    steps: vec![0.05, 0.1, 0.2, 0.4],
                    weights: vec![1.0, 2.0, 3.0, 4.0],
                })
                .then(FeatureFilter::Smoothing {
                    window_size: 41,
                    downsample_factor: 10,
                })
                .then(lp(NormSpace::L2, 0.001)),
            Variant::Crp => Pipeline::new()
                .then_pitch(FeatureFilter::Compression {
                    term: 1.0,
                    factor: 1000.0,
                })
                .then_pitch(FeatureFilter::CoefficientRange {
                    lowest: 55,
                    highest: None,
                })
                .then(lp(NormSpace::L2, 1e-6))
                .then(FeatureFilter::Smoothing {
                    window_size: 1,
                    downsample_factor: 1,
                }),
        }
    }

    /// Append a chroma filter.
    pub fn then(mut self, filter: FeatureFilter) -> Self {
        self.chroma_stage.push(filter);
        self
    }

    /// Append a pitch filter.
    pub fn then_pitch(mut self, filter: FeatureFilter) -> Self {
        self.pitch_stage.push(filter);
        self
    }

    /// Check every filter's parameters.
    pub fn validate(&self) -> Result<(), FilterError> {
        self.pitch_stage
            .iter()
            .chain(&self.chroma_stage)
            .try_for_each(FeatureFilter::validate)
    }

    /// Run the pitch stage.
    pub fn apply_pitch(&self, input: &PitchBuffer) -> Result<PitchBuffer, FilterError> {
        apply_all(&self.pitch_stage, input)
    }

    /// Run the chroma stage.
    pub fn apply_chroma(&self, input: &ChromaBuffer) -> Result<ChromaBuffer, FilterError> {
        apply_all(&self.chroma_stage, input)
    }

    /// Pitch stage, reduction to chroma, then chroma stage.
    pub fn run(&self, pitch: &PitchBuffer) -> Result<ChromaBuffer, FilterError> {
        let pitch = self.apply_pitch(pitch)?;
        self.apply_chroma(&chromagram::reduce(&pitch))
    }
}

impl From<Variant> for Pipeline {
    fn from(variant: Variant) -> Self {
        Pipeline::preset(variant)
    }
}

fn apply_all<const N: usize>(
    filters: &[FeatureFilter],
    input: &FeatureBuffer<N>,
) -> Result<FeatureBuffer<N>, FilterError> {
    filters
        .iter()
        .try_fold(input.clone(), |buffer, filter| filter.apply(&buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{ChromaVector, PitchVector};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn buffer(frames: Vec<[f32; 12]>) -> ChromaBuffer {
        ChromaBuffer::new(frames.into_iter().map(ChromaVector::new).collect(), 10.0)
    }

    fn cens_quantizer() -> FeatureFilter {
        FeatureFilter::Quantization {
            steps: vec![0.05, 0.1, 0.2, 0.4],
            weights: vec![1.0, 2.0, 3.0, 4.0],
        }
    }

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(0.049, 0.0)]
    #[case(0.05, 1.0)]
    #[case(0.1, 2.0)]
    #[case(0.15, 2.0)]
    #[case(0.2, 3.0)]
    #[case(0.4, 4.0)]
    #[case(0.9, 4.0)]
    fn quantization_steps_are_inclusive(#[case] input: f32, #[case] expected: f32) {
        let mut frame = [0.0; 12];
        frame[3] = input;
        let out = cens_quantizer().apply(&buffer(vec![frame])).unwrap();
        assert_eq!(out.frames()[0][3], expected);
        assert_eq!(out.frames()[0][0], 0.0);
    }

    #[test]
    fn compression_is_monotonic_and_keeps_zero() {
        let filter = FeatureFilter::Compression {
            term: 1.0,
            factor: 100.0,
        };
        let mut frame = [0.0; 12];
        for (i, v) in frame.iter_mut().enumerate() {
            *v = i as f32 * 0.1;
        }
        let out = filter.apply(&buffer(vec![frame])).unwrap();
        let values = out.frames()[0];
        assert_eq!(values[0], 0.0);
        assert!(values.as_slice().windows(2).all(|w| w[0] < w[1]));
        assert!((values[1] - 11f32.log10()).abs() < 1e-6);
    }

    #[test]
    fn compression_with_other_terms_still_keeps_zero() {
        let filter = FeatureFilter::Compression {
            term: 5.0,
            factor: 2.0,
        };
        let out = filter.apply(&buffer(vec![[0.0; 12]])).unwrap();
        assert!(out.frames()[0].as_slice().iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn max_normalization() {
        let mut frame = [0.0; 12];
        frame[0] = 2.0;
        frame[5] = 4.0;
        let filter = FeatureFilter::Normalization(Normalization::MaxValue);
        let out = filter.apply(&buffer(vec![frame, [0.0; 12]])).unwrap();
        assert_eq!(out.frames()[0][5], 1.0);
        assert_eq!(out.frames()[0][0], 0.5);
        assert_eq!(out.frames()[1], ChromaVector::zeros());
    }

    #[rstest]
    #[case(NormSpace::L1, 7.0)]
    #[case(NormSpace::L2, 5.0)]
    #[case(NormSpace::LInfinity, 4.0)]
    fn lp_normalization(#[case] space: NormSpace, #[case] norm: f32) {
        let mut frame = [0.0; 12];
        frame[0] = 3.0;
        frame[1] = 4.0;
        let filter = FeatureFilter::Normalization(Normalization::LpNorm {
            space,
            threshold: 0.001,
        });
        let out = filter.apply(&buffer(vec![frame])).unwrap();
        assert!((out.frames()[0][1] - 4.0 / norm).abs() < 1e-6);
    }

    #[test]
    fn quiet_frames_are_left_unscaled() {
        let mut frame = [0.0; 12];
        frame[2] = 1e-4;
        let filter = FeatureFilter::Normalization(Normalization::LpNorm {
            space: NormSpace::L2,
            threshold: 0.001,
        });
        let out = filter.apply(&buffer(vec![frame])).unwrap();
        assert_eq!(out.frames()[0][2], 1e-4);
    }

    #[test]
    fn smoothing_averages_and_downsamples() {
        let frames: Vec<[f32; 12]> = (0..10).map(|i| [i as f32; 12]).collect();
        let filter = FeatureFilter::Smoothing {
            window_size: 3,
            downsample_factor: 2,
        };
        let out = filter.apply(&buffer(frames)).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.feature_rate(), 5.0);
        // frame 0 averages frames 0 and 1, frame 2 averages 1, 2 and 3
        assert_eq!(out.frames()[0][0], 0.5);
        assert_eq!(out.frames()[1][0], 2.0);
        assert_eq!(out.frames()[4][0], 8.0);
    }

    #[test]
    fn full_coefficient_range_is_identity() {
        let mut frame = PitchVector::zeros();
        for p in 0..128 {
            frame[p] = ((p * 7) % 13) as f32;
        }
        let input = PitchBuffer::new(vec![frame], 10.0);
        let filter = FeatureFilter::CoefficientRange {
            lowest: 0,
            highest: None,
        };
        let out = filter.apply(&input).unwrap();
        for p in 0..128 {
            assert!((out.frames()[0][p] - frame[p]).abs() < 1e-3, "pitch {p}");
        }
    }

    #[test]
    fn dropping_the_first_coefficient_removes_the_mean() {
        let input = buffer(vec![[2.0; 12]]);
        let filter = FeatureFilter::CoefficientRange {
            lowest: 1,
            highest: None,
        };
        let out = filter.apply(&input).unwrap();
        assert!(out.frames()[0].as_slice().iter().all(|v| v.abs() < 1e-5));
    }

    #[rstest]
    #[case(FeatureFilter::Compression { term: 0.0, factor: 1.0 })]
    #[case(FeatureFilter::Compression { term: 1.0, factor: -1.0 })]
    #[case(FeatureFilter::Normalization(Normalization::LpNorm {
        space: NormSpace::L2,
        threshold: -1.0,
    }))]
    #[case(FeatureFilter::Quantization { steps: vec![], weights: vec![] })]
    #[case(FeatureFilter::Quantization { steps: vec![0.1, 0.2], weights: vec![1.0] })]
    #[case(FeatureFilter::Quantization { steps: vec![0.2, 0.1], weights: vec![1.0, 2.0] })]
    #[case(FeatureFilter::Smoothing { window_size: 0, downsample_factor: 1 })]
    #[case(FeatureFilter::Smoothing { window_size: 3, downsample_factor: 0 })]
    #[case(FeatureFilter::CoefficientRange { lowest: 10, highest: Some(5) })]
    fn malformed_filters_are_rejected(#[case] filter: FeatureFilter) {
        assert!(matches!(
            filter.validate(),
            Err(FilterError::InvalidParameter { .. })
        ));
        assert!(Pipeline::new().then(filter).validate().is_err());
    }

    #[rstest]
    #[case(Variant::Raw)]
    #[case(Variant::Cp)]
    #[case(Variant::Cens)]
    #[case(Variant::Crp)]
    fn presets_are_valid(#[case] variant: Variant) {
        assert!(Pipeline::preset(variant).validate().is_ok());
    }

    #[test]
    fn cens_lowers_the_feature_rate() {
        let mut frame = PitchVector::zeros();
        frame[60] = 1.0;
        frame[64] = 1.0;
        frame[67] = 1.0;
        let pitch = PitchBuffer::new(vec![frame; 100], 20.0);
        let chroma = Pipeline::preset(Variant::Cens).run(&pitch).unwrap();
        assert_eq!(chroma.len(), 10);
        assert_eq!(chroma.feature_rate(), 2.0);
        let first = chroma.frames()[0];
        assert!((first.norm() - 1.0).abs() < 1e-5);
        assert_eq!(first.argmax(), 0);
    }

    #[test]
    fn pipeline_round_trips_through_json() {
        let pipeline = Pipeline::preset(Variant::Crp);
        let json = serde_json::to_string(&pipeline).unwrap();
        let back: Pipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pipeline);
    }
}
