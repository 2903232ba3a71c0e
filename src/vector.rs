//! Fixed-size feature vectors and feature buffers.
//!
//! `FeatureVector<N>` carries its length in the type, so arithmetic between
//! vectors of different lengths does not compile. Pitch vectors hold one bin
//! per absolute pitch and chroma vectors one bin per pitch class.

use crate::pitch::{PITCHES, SEMITONES};
use std::{
    cmp::Ordering,
    ops::{Add, AddAssign, Index, IndexMut, Mul, Sub},
};

/// Energy per absolute pitch.
pub type PitchVector = FeatureVector<PITCHES>;

/// Energy per pitch class.
pub type ChromaVector = FeatureVector<SEMITONES>;

/// Sequence of pitch vectors.
pub type PitchBuffer = FeatureBuffer<PITCHES>;

/// Sequence of chroma vectors.
pub type ChromaBuffer = FeatureBuffer<SEMITONES>;

/// Cut-off for [`FeatureVector::indices_by_threshold`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Threshold {
    /// Ranked indices whose value is at least the threshold.
    AtLeast(f32),
    /// Ranked indices whose value is below the threshold.
    Below(f32),
}

/// A real-valued vector of fixed length `N`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FeatureVector<const N: usize>([f32; N]);

impl<const N: usize> FeatureVector<N> {
    /// Zero-filled vector.
    pub const fn zeros() -> Self {
        FeatureVector([0.0; N])
    }

    /// Wrap an array of values.
    pub const fn new(values: [f32; N]) -> Self {
        FeatureVector(values)
    }

    /// Copy values from a slice; `None` unless `values.len() == N`.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let array: [f32; N] = values.try_into().ok()?;
        Some(FeatureVector(array))
    }

    /// Values as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Values as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.0
    }

    /// Apply `f` to every component.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        FeatureVector(self.0.map(f))
    }

    /// Dot product.
    pub fn dot(&self, other: &Self) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Sum of components.
    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    /// Largest component.
    pub fn max(&self) -> f32 {
        self.0.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Whether every component is zero.
    pub fn is_silent(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    /// `(a·b) / (‖a‖ + ‖b‖)`.
    ///
    /// Note the sum of norms in the denominator: this is not cosine
    /// similarity, and `a.similarity(a)` is `‖a‖ / 2`. Returns 0 when both
    /// vectors are zero.
    pub fn similarity(&self, other: &Self) -> f32 {
        let denominator = self.norm() + other.norm();
        if denominator == 0.0 {
            return 0.0;
        }
        self.dot(other) / denominator
    }

    /// All indices ordered by descending value; equal values keep index order.
    pub fn indices_by_value(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..N).collect();
        indices.sort_by(|&a, &b| self.0[b].partial_cmp(&self.0[a]).unwrap_or(Ordering::Equal));
        indices
    }

    /// The part of [`indices_by_value`](Self::indices_by_value) on one side of
    /// a threshold: the leading run for [`Threshold::AtLeast`], the trailing
    /// run for [`Threshold::Below`].
    pub fn indices_by_threshold(&self, threshold: Threshold) -> Vec<usize> {
        let mut ranked = self.indices_by_value();
        let limit = match threshold {
            Threshold::AtLeast(t) | Threshold::Below(t) => t,
        };
        let cut = ranked
            .iter()
            .position(|&i| self.0[i] < limit)
            .unwrap_or(ranked.len());
        match threshold {
            Threshold::AtLeast(_) => {
                ranked.truncate(cut);
                ranked
            }
            Threshold::Below(_) => ranked.split_off(cut),
        }
    }

    /// Index of the largest component; the first one on ties.
    pub fn argmax(&self) -> usize {
        self.indices_by_value()[0]
    }
}

impl<const N: usize> Default for FeatureVector<N> {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<const N: usize> From<[f32; N]> for FeatureVector<N> {
    fn from(values: [f32; N]) -> Self {
        FeatureVector(values)
    }
}

impl From<&PitchVector> for ChromaVector {
    /// Fold pitches onto pitch classes by summing octaves.
    fn from(pitch: &PitchVector) -> Self {
        let mut chroma = ChromaVector::zeros();
        for (p, &energy) in pitch.0.iter().enumerate() {
            chroma.0[p % SEMITONES] += energy;
        }
        chroma
    }
}

impl<const N: usize> Index<usize> for FeatureVector<N> {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.0[index]
    }
}

impl<const N: usize> IndexMut<usize> for FeatureVector<N> {
    fn index_mut(&mut self, index: usize) -> &mut f32 {
        &mut self.0[index]
    }
}

impl<const N: usize> Add for FeatureVector<N> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl<const N: usize> AddAssign for FeatureVector<N> {
    fn add_assign(&mut self, rhs: Self) {
        self.0.iter_mut().zip(rhs.0).for_each(|(a, b)| *a += b);
    }
}

impl<const N: usize> Sub for FeatureVector<N> {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        self.0.iter_mut().zip(rhs.0).for_each(|(a, b)| *a -= b);
        self
    }
}

impl<const N: usize> Mul<f32> for FeatureVector<N> {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        self.map(|v| v * rhs)
    }
}

/// A sequence of vectors together with the number of vectors per second of
/// source audio. The two are never separated.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBuffer<const N: usize> {
    frames: Vec<FeatureVector<N>>,
    feature_rate: f32,
}

impl<const N: usize> FeatureBuffer<N> {
    /// Bundle frames with their feature rate in Hz.
    pub fn new(frames: Vec<FeatureVector<N>>, feature_rate: f32) -> Self {
        FeatureBuffer {
            frames,
            feature_rate,
        }
    }

    /// Frames in time order.
    pub fn frames(&self) -> &[FeatureVector<N>] {
        &self.frames
    }

    /// Vectors per second of source audio.
    pub fn feature_rate(&self) -> f32 {
        self.feature_rate
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether there are no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterate over frames.
    pub fn iter(&self) -> std::slice::Iter<'_, FeatureVector<N>> {
        self.frames.iter()
    }

    /// Start time of frame `index` in seconds.
    pub fn frame_time(&self, index: usize) -> f32 {
        index as f32 / self.feature_rate
    }

    /// Length of the covered audio in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.frame_time(self.frames.len())
    }

    /// Transform every frame, keeping the feature rate.
    pub fn map<const M: usize>(
        &self,
        f: impl Fn(&FeatureVector<N>) -> FeatureVector<M>,
    ) -> FeatureBuffer<M> {
        FeatureBuffer::new(self.frames.iter().map(f).collect(), self.feature_rate)
    }

    /// Average of all frames; zeros for an empty buffer.
    pub fn mean(&self) -> FeatureVector<N> {
        if self.frames.is_empty() {
            return FeatureVector::zeros();
        }
        let total = self
            .frames
            .iter()
            .fold(FeatureVector::zeros(), |acc, frame| acc + *frame);
        total * (1.0 / self.frames.len() as f32)
    }

    /// Split into frames and feature rate.
    pub fn into_parts(self) -> (Vec<FeatureVector<N>>, f32) {
        (self.frames, self.feature_rate)
    }
}

impl<'a, const N: usize> IntoIterator for &'a FeatureBuffer<N> {
    type Item = &'a FeatureVector<N>;
    type IntoIter = std::slice::Iter<'a, FeatureVector<N>>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}
