//! Spectrogram
//!
//! Short-time Fourier transform pitch features. Each FFT bin is assigned to
//! the nearest absolute pitch and its energy is accumulated into that pitch's
//! bin. The bin-to-pitch assignment only depends on the sample rate and the
//! window size, so it is computed once per configuration and cached.
//!
//! Spectra are amplitude-scaled: a sine of amplitude `a` peaks at `a`
//! whatever the window size.

use crate::{
    error::ExtractionError,
    pitch::{Pitch, PITCHES},
    vector::{PitchBuffer, PitchVector},
};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    f32::consts::PI,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
};

/// Frequency of the anchor bin in the pitch formula.
const ANCHOR_FREQUENCY: f64 = 55.0;

/// Pitch index of the anchor frequency before the correction term.
const ANCHOR_PITCH: f64 = 34.0;

/// Spectral value accumulated into pitch bins.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    /// `|X|`
    #[default]
    Magnitude,
    /// `|X|²`
    Power,
    /// `ln(1 + |X|)`
    LogMagnitude,
}

impl Representation {
    #[inline]
    fn apply(self, bin: Complex<f32>) -> f32 {
        let power = bin.re * bin.re + bin.im * bin.im;
        match self {
            Representation::Magnitude => power.sqrt(),
            Representation::Power => power,
            Representation::LogMagnitude => power.sqrt().ln_1p(),
        }
    }
}

/// Parameters of the STFT strategy.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct StftConfig {
    /// Analysis window length in samples.
    pub window_size: usize,
    /// Advance between successive windows in samples.
    pub hop_size: usize,
    /// Spectral value to accumulate.
    #[serde(default)]
    pub representation: Representation,
    /// Replaces the window-size dependent correction term of the bin-to-pitch
    /// formula when set.
    #[serde(default)]
    pub pitch_correction: Option<i32>,
}

impl StftConfig {
    /// Window and hop in samples, magnitude spectrum, default correction.
    pub fn new(window_size: usize, hop_size: usize) -> Self {
        StftConfig {
            window_size,
            hop_size,
            representation: Representation::Magnitude,
            pitch_correction: None,
        }
    }

    /// Set the spectral representation.
    pub fn representation(mut self, representation: Representation) -> Self {
        self.representation = representation;
        self
    }

    /// Override the correction term of the bin-to-pitch formula.
    pub fn pitch_correction(mut self, correction: i32) -> Self {
        self.pitch_correction = Some(correction);
        self
    }

    /// Correction term in effect for this configuration.
    pub fn correction(&self) -> i32 {
        self.pitch_correction
            .unwrap_or_else(|| default_correction(self.window_size))
    }

    /// Number of spectrum bins kept per frame (`window_size / 2 + 1`).
    pub fn bin_count(&self) -> usize {
        self.window_size / 2 + 1
    }

    /// Check the sizes before any frame is processed.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if self.window_size == 0 {
            return Err(ExtractionError::Configuration("window_size cannot be zero".into()));
        }
        if self.hop_size == 0 {
            return Err(ExtractionError::Configuration("hop_size cannot be zero".into()));
        }
        if self.hop_size > self.window_size {
            return Err(ExtractionError::Configuration(
                "hop_size cannot exceed window_size".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StftConfig {
    fn default() -> Self {
        StftConfig::new(4096, 2048)
    }
}

/// Correction applied by the bin-to-pitch formula when no override is set:
/// -1 for power-of-two windows, -2 otherwise.
///
/// The asymmetry is inherited from the established mapping and has not been
/// explained; it is kept so existing results stay reproducible.
pub fn default_correction(window_size: usize) -> i32 {
    if window_size.is_power_of_two() {
        -1
    } else {
        -2
    }
}

/// Key of a cached bin-to-pitch map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BinMapKey {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Spectrum bins per frame.
    pub bin_count: usize,
    /// FFT window length.
    pub window_size: usize,
    /// Correction term.
    pub correction: i32,
}

/// Assignment of FFT bins to pitches for one configuration.
///
/// Only bins that land inside `0..128` are listed, in ascending bin order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinPitchMap {
    entries: Vec<(usize, Pitch)>,
}

impl BinPitchMap {
    /// Compute `pitch = round(12·log2(bin·rate / (window·55)) + 34 + correction)`
    /// for every bin. Bins below pitch 0 are skipped; the scan stops at the
    /// first bin above pitch 127 since pitch grows with the bin index.
    pub fn compute(key: BinMapKey) -> Self {
        let mut entries = Vec::new();
        let resolution = key.sample_rate as f64 / key.window_size as f64;
        for bin in 1..key.bin_count {
            let frequency = bin as f64 * resolution;
            let pitch = (12.0 * (frequency / ANCHOR_FREQUENCY).log2()
                + ANCHOR_PITCH
                + key.correction as f64)
                .round();
            if pitch < 0.0 {
                continue;
            }
            if pitch >= PITCHES as f64 {
                break;
            }
            if let Some(pitch) = Pitch::new(pitch as u8) {
                entries.push((bin, pitch));
            }
        }
        BinPitchMap { entries }
    }

    /// `(bin, pitch)` pairs in ascending bin order.
    pub fn entries(&self) -> &[(usize, Pitch)] {
        &self.entries
    }

    /// Pitch assigned to `bin`, if any.
    pub fn pitch_of(&self, bin: usize) -> Option<Pitch> {
        self.entries
            .binary_search_by_key(&bin, |&(b, _)| b)
            .ok()
            .map(|i| self.entries[i].1)
    }
}

/// Memoised bin-to-pitch maps, shared between extractions.
///
/// Each distinct key is computed once; later requests reuse the stored map.
#[derive(Debug, Default)]
pub struct BinMapCache {
    maps: RwLock<HashMap<BinMapKey, Arc<BinPitchMap>>>,
    computations: AtomicUsize,
}

impl BinMapCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map for `key`, computing it on first request.
    pub fn get_or_compute(&self, key: BinMapKey) -> Arc<BinPitchMap> {
        if let Some(map) = self
            .maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(map);
        }

        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        // another writer may have filled the entry in between
        Arc::clone(maps.entry(key).or_insert_with(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            log::debug!("computing bin-to-pitch map for {key:?}");
            Arc::new(BinPitchMap::compute(key))
        }))
    }

    /// How many maps have been computed so far.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    /// Number of cached maps.
    pub fn len(&self) -> usize {
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// STFT pitch-feature extractor.
#[derive(Debug, Clone)]
pub struct StftExtractor {
    config: StftConfig,
    cache: Arc<BinMapCache>,
}

impl StftExtractor {
    /// Extractor with its own cache.
    pub fn new(config: StftConfig) -> Result<Self, ExtractionError> {
        Self::with_cache(config, Arc::new(BinMapCache::new()))
    }

    /// Extractor sharing `cache` with other extractors.
    pub fn with_cache(
        config: StftConfig,
        cache: Arc<BinMapCache>,
    ) -> Result<Self, ExtractionError> {
        config.validate()?;
        Ok(StftExtractor { config, cache })
    }

    /// The configuration in use.
    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<BinMapCache> {
        &self.cache
    }

    /// Pitch features of a mono signal, one vector per window.
    ///
    /// A signal shorter than one window is zero-padded to a single frame.
    pub fn extract(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<PitchBuffer, ExtractionError> {
        if samples.is_empty() {
            return Err(ExtractionError::EmptySignal);
        }
        if sample_rate == 0 {
            return Err(ExtractionError::InvalidSampleRate {
                minimum: 1,
                got: sample_rate,
            });
        }

        let StftConfig {
            window_size,
            hop_size,
            representation,
            ..
        } = self.config;
        let map = self.cache.get_or_compute(BinMapKey {
            sample_rate,
            bin_count: self.config.bin_count(),
            window_size,
            correction: self.config.correction(),
        });

        let fft = FftPlanner::<f32>::new().plan_fft_forward(window_size);
        // scaled so a sine's spectral peak equals its amplitude
        let mut window = hamming_window(window_size);
        let gain = 2.0 / window.iter().sum::<f32>();
        window.iter_mut().for_each(|w| *w *= gain);
        let frame_count = frame_count(samples.len(), window_size, hop_size);
        log::debug!(
            "stft: {} samples at {sample_rate} Hz -> {frame_count} frames \
             ({window_size}/{hop_size})",
            samples.len()
        );

        let frames: Vec<PitchVector> = (0..frame_count)
            .into_par_iter()
            .map_init(
                || vec![Complex { re: 0.0, im: 0.0 }; window_size],
                |buffer, frame| {
                    let start = frame * hop_size;
                    for (i, slot) in buffer.iter_mut().enumerate() {
                        let sample = samples.get(start + i).copied().unwrap_or(0.0);
                        *slot = Complex {
                            re: sample * window[i],
                            im: 0.0,
                        };
                    }
                    fft.process(buffer);

                    let mut pitches = PitchVector::zeros();
                    for &(bin, pitch) in map.entries() {
                        pitches[pitch.index()] += representation.apply(buffer[bin]);
                    }
                    pitches
                },
            )
            .collect();

        Ok(PitchBuffer::new(
            frames,
            sample_rate as f32 / hop_size as f32,
        ))
    }
}

/// Number of analysis windows for a signal; at least one.
pub(crate) fn frame_count(len: usize, window_size: usize, hop_size: usize) -> usize {
    if len <= window_size {
        1
    } else {
        (len - window_size) / hop_size + 1
    }
}

/// Hamming window of `size` points.
fn hamming_window(size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.0];
    }
    (0..size)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f32 / (size as f32 - 1.0)).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * frequency * n as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[rstest]
    #[case(4096, -1)]
    #[case(8192, -1)]
    #[case(4000, -2)]
    #[case(6000, -2)]
    fn correction_depends_on_power_of_two(#[case] window: usize, #[case] expected: i32) {
        assert_eq!(default_correction(window), expected);
        assert_eq!(StftConfig::new(window, window / 2).correction(), expected);
        let overridden = StftConfig::new(window, window / 2).pitch_correction(0);
        assert_eq!(overridden.correction(), 0);
    }

    #[test]
    fn bin_map_is_monotonic_and_in_range() {
        let key = BinMapKey {
            sample_rate: 44_100,
            bin_count: 2049,
            window_size: 4096,
            correction: -1,
        };
        let map = BinPitchMap::compute(key);
        let entries = map.entries();
        assert!(!entries.is_empty());
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1));
        // bin 41 is ~441 Hz, which lands on A4
        assert_eq!(map.pitch_of(41).map(Pitch::value), Some(69));
        assert_eq!(map.pitch_of(0), None);
    }

    #[test]
    fn cache_computes_each_key_once() {
        let cache = Arc::new(BinMapCache::new());
        let extractor =
            StftExtractor::with_cache(StftConfig::new(1024, 512), Arc::clone(&cache)).unwrap();
        let signal = sine(440.0, 44_100, 8192);

        let first = extractor.extract(&signal, 44_100).unwrap();
        let second = extractor.extract(&signal, 44_100).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.computations(), 1);

        let other =
            StftExtractor::with_cache(StftConfig::new(1024, 256), Arc::clone(&cache)).unwrap();
        other.extract(&signal, 44_100).unwrap();
        assert_eq!(cache.computations(), 1);

        extractor.extract(&signal, 48_000).unwrap();
        assert_eq!(cache.computations(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn sine_energy_peaks_at_its_pitch() {
        let extractor = StftExtractor::new(StftConfig::new(8192, 4096)).unwrap();
        let signal = sine(440.0, 44_100, 44_100);
        let features = extractor.extract(&signal, 44_100).unwrap();

        assert_eq!(features.len(), (44_100 - 8192) / 4096 + 1);
        assert!((features.feature_rate() - 44_100.0 / 4096.0).abs() < 1e-3);
        for frame in &features {
            assert_eq!(frame.argmax(), 69);
        }
    }

    #[rstest]
    #[case(4096, 1024)]
    #[case(8192, 1024)]
    #[case(4096, 3072)]
    fn feature_rate_follows_the_hop(#[case] window: usize, #[case] hop: usize) {
        let extractor = StftExtractor::new(StftConfig::new(window, hop)).unwrap();
        let signal = sine(440.0, 44_100, 2 * 44_100);
        let features = extractor.extract(&signal, 44_100).unwrap();

        assert_eq!(features.len(), (2 * 44_100 - window) / hop + 1);
        assert!((features.feature_rate() - 44_100.0 / hop as f32).abs() < 1e-3);
        // the last frame starts inside the signal
        let last_start = (features.len() - 1) as f32 / features.feature_rate();
        assert!(last_start <= 2.0 - window as f32 / 44_100.0 + 1e-3);
    }

    #[rstest]
    #[case(4096)]
    #[case(16384)]
    fn spectra_are_amplitude_scaled(#[case] window: usize) {
        let extractor = StftExtractor::new(StftConfig::new(window, window / 2)).unwrap();
        let signal: Vec<f32> = sine(440.0, 44_100, 2 * window)
            .iter()
            .map(|s| 0.25 * s)
            .collect();
        let features = extractor.extract(&signal, 44_100).unwrap();
        // main-lobe bins of one sine all land on A4
        let energy = features.frames()[0][69];
        assert!((0.2..1.0).contains(&energy), "A4 energy {energy}");
    }

    #[test]
    fn short_signal_is_padded_to_one_frame() {
        let extractor = StftExtractor::new(StftConfig::new(1024, 512)).unwrap();
        let features = extractor.extract(&[0.5; 100], 44_100).unwrap();
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn rejects_bad_configuration_and_input() {
        assert!(StftExtractor::new(StftConfig::new(0, 0)).is_err());
        assert!(StftExtractor::new(StftConfig::new(1024, 0)).is_err());
        assert!(StftExtractor::new(StftConfig::new(1024, 2048)).is_err());

        let extractor = StftExtractor::new(StftConfig::default()).unwrap();
        assert!(matches!(
            extractor.extract(&[], 44_100),
            Err(ExtractionError::EmptySignal)
        ));
    }

    #[rstest]
    #[case(Representation::Magnitude, Complex { re: 3.0, im: 4.0 }, 5.0)]
    #[case(Representation::Power, Complex { re: 3.0, im: 4.0 }, 25.0)]
    #[case(Representation::LogMagnitude, Complex { re: 3.0, im: 4.0 }, 6.0f32.ln())]
    fn representations(
        #[case] repr: Representation,
        #[case] bin: Complex<f32>,
        #[case] expected: f32,
    ) {
        assert!((repr.apply(bin) - expected).abs() < 1e-5);
    }
}
