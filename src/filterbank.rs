//! Multirate pitch filterbank
//!
//! Every pitch is analysed with a narrow band-pass filter running at the
//! lowest sample rate that still represents it, which keeps the filters
//! stable and gives low pitches the long effective windows they need. The
//! signal is provided as five streams at 44100, 22050, 4410, 882 and 441 Hz,
//! each decimated independently from the 44100 Hz reference.

use crate::{
    error::ExtractionError,
    pitch::{Pitch, PITCHES},
    spectrogram::frame_count,
    vector::{PitchBuffer, PitchVector},
};
use rayon::prelude::*;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Rate of the reference stream; window and hop sizes are counted in it.
pub const REFERENCE_RATE: u32 = 44_100;

/// Sample rates of the multirate streams, highest first.
pub const STREAM_RATES: [u32; 5] = [44_100, 22_050, 4_410, 882, 441];

/// Quality factor of the pitch filters, about one semitone of bandwidth.
const PITCH_Q: f64 = 17.0;

/// Lowest pitch analysed at each stream rate, highest rate first. Every
/// pitch of a band stays below the anti-aliasing cutoff of its stream.
const BAND_LOWEST_PITCH: [usize; 5] = [120, 92, 60, 21, 0];

/// Anti-aliasing cutoff relative to the target rate.
const CUTOFF_RATIO: f64 = 0.4;

/// Direct-form I biquad section.
#[derive(Debug, Copy, Clone)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn new(b: [f64; 3], a: [f64; 3]) -> Self {
        Biquad {
            b0: b[0] / a[0],
            b1: b[1] / a[0],
            b2: b[2] / a[0],
            a1: a[1] / a[0],
            a2: a[2] / a[0],
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Butterworth-style low-pass with the given quality factor.
    fn low_pass(cutoff: f64, sample_rate: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        Biquad::new(
            [(1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    /// Band-pass with unit gain at the centre frequency.
    fn band_pass(centre: f64, sample_rate: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * centre / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        Biquad::new(
            [alpha, 0.0, -alpha],
            [1.0 + alpha, -2.0 * w0.cos(), 1.0 - alpha],
        )
    }

    #[inline]
    fn process(&mut self, x0: f64) -> f64 {
        let y0 = self.b0 * x0 + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }
}

/// Section quality factors of an eighth-order Butterworth low-pass.
const BUTTERWORTH_Q: [f64; 4] = [0.509_795_6, 0.601_344_9, 0.899_976_2, 2.562_915_4];

fn anti_aliasing(cutoff: f64, sample_rate: u32) -> [Biquad; 4] {
    BUTTERWORTH_Q.map(|q| Biquad::low_pass(cutoff, sample_rate as f64, q))
}

/// Low-pass the input, then keep every `factor`-th sample. No delay
/// compensation is applied.
fn decimate(input: &[f32], sample_rate: u32, factor: usize) -> Vec<f32> {
    let target = sample_rate as f64 / factor as f64;
    let mut sections = anti_aliasing(CUTOFF_RATIO * target, sample_rate);
    input
        .iter()
        .enumerate()
        .filter_map(|(i, &x)| {
            let y = sections.iter_mut().fold(x as f64, |acc, s| s.process(acc));
            (i % factor == 0).then_some(y as f32)
        })
        .collect()
}

/// Bring a signal at `from` Hz to the reference rate.
fn resample(samples: &[f32], from: u32) -> Result<Vec<f32>, ExtractionError> {
    let mut resampler = FastFixedIn::<f32>::new(
        f64::from(REFERENCE_RATE) / f64::from(from),
        1.0,
        PolynomialDegree::Cubic,
        samples.len(),
        1,
    )
    .map_err(|e| ExtractionError::Resampling(e.to_string()))?;
    let mut channels = resampler
        .process(&[samples], None)
        .map_err(|e| ExtractionError::Resampling(e.to_string()))?;
    Ok(channels.swap_remove(0))
}

/// A mono signal at the five filterbank rates.
#[derive(Debug, Clone, PartialEq)]
pub struct MultirateSignal {
    streams: [Vec<f32>; 5],
}

impl MultirateSignal {
    /// Derive all streams from a mono signal sampled at `sample_rate`.
    ///
    /// Rates below 44100 Hz are rejected; higher rates are first brought
    /// down to 44100 Hz.
    pub fn from_mono(samples: &[f32], sample_rate: u32) -> Result<Self, ExtractionError> {
        if sample_rate < REFERENCE_RATE {
            return Err(ExtractionError::InvalidSampleRate {
                minimum: REFERENCE_RATE,
                got: sample_rate,
            });
        }
        if samples.is_empty() {
            return Err(ExtractionError::EmptySignal);
        }

        let reference = if sample_rate == REFERENCE_RATE {
            samples.to_vec()
        } else {
            log::debug!("resampling {sample_rate} Hz input to {REFERENCE_RATE} Hz");
            resample(samples, sample_rate)?
        };

        // each lower stream is decimated straight from the reference
        let mut streams: [Vec<f32>; 5] = Default::default();
        for (stream, &rate) in streams.iter_mut().zip(&STREAM_RATES).skip(1) {
            let factor = (REFERENCE_RATE / rate) as usize;
            *stream = decimate(&reference, REFERENCE_RATE, factor);
        }
        streams[0] = reference;
        log::debug!(
            "multirate streams: {:?} samples",
            streams.iter().map(Vec::len).collect::<Vec<_>>()
        );
        Ok(MultirateSignal { streams })
    }

    /// Use streams that were resampled elsewhere, in [`STREAM_RATES`] order.
    pub fn from_streams(streams: [Vec<f32>; 5]) -> Result<Self, ExtractionError> {
        if streams[0].is_empty() {
            return Err(ExtractionError::EmptySignal);
        }
        if let Some(i) = streams.iter().position(Vec::is_empty) {
            return Err(ExtractionError::Configuration(format!(
                "stream at {} Hz is empty",
                STREAM_RATES[i]
            )));
        }
        Ok(MultirateSignal { streams })
    }

    /// Stream sampled at `STREAM_RATES[index]`.
    pub fn stream(&self, index: usize) -> &[f32] {
        &self.streams[index]
    }

    /// Length of the reference stream in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.streams[0].len() as f32 / REFERENCE_RATE as f32
    }
}

/// Parameters of the filterbank strategy, in reference-rate samples.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterbankConfig {
    /// Energy window length.
    pub window_size: usize,
    /// Advance between windows.
    pub hop_size: usize,
}

impl FilterbankConfig {
    /// Window and hop in samples at 44100 Hz.
    pub fn new(window_size: usize, hop_size: usize) -> Self {
        FilterbankConfig {
            window_size,
            hop_size,
        }
    }

    /// Check the sizes before any frame is processed.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if self.window_size == 0 || self.hop_size == 0 {
            return Err(ExtractionError::Configuration(
                "filterbank window_size and hop_size must be positive".into(),
            ));
        }
        if self.hop_size > self.window_size {
            return Err(ExtractionError::Configuration(
                "hop_size cannot exceed window_size".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FilterbankConfig {
    /// 100 ms windows with 50 ms hops.
    fn default() -> Self {
        FilterbankConfig::new(4410, 2205)
    }
}

/// Stream index used to analyse `pitch`.
pub fn stream_for_pitch(pitch: Pitch) -> usize {
    BAND_LOWEST_PITCH
        .iter()
        .position(|&lowest| pitch.index() >= lowest)
        .unwrap_or(STREAM_RATES.len() - 1)
}

/// Multirate filterbank pitch-feature extractor.
#[derive(Debug, Clone)]
pub struct FilterbankExtractor {
    config: FilterbankConfig,
}

impl FilterbankExtractor {
    /// Validate `config` and build the extractor.
    pub fn new(config: FilterbankConfig) -> Result<Self, ExtractionError> {
        config.validate()?;
        Ok(FilterbankExtractor { config })
    }

    /// The configuration in use.
    pub fn config(&self) -> &FilterbankConfig {
        &self.config
    }

    /// Pitch features, one vector per window of the reference stream.
    pub fn extract(&self, signal: &MultirateSignal) -> PitchBuffer {
        let FilterbankConfig {
            window_size,
            hop_size,
        } = self.config;
        let frames = frame_count(signal.streams[0].len(), window_size, hop_size);
        log::debug!("filterbank: {frames} frames ({window_size}/{hop_size})");

        let bands: Vec<Vec<f32>> = (0..PITCHES)
            .into_par_iter()
            .map(|p| {
                let pitch = Pitch::new(p as u8).unwrap_or(Pitch::MAX);
                let stream = stream_for_pitch(pitch);
                band_energies(
                    signal.stream(stream),
                    STREAM_RATES[stream],
                    pitch.frequency(),
                    frames,
                    window_size,
                    hop_size,
                )
            })
            .collect();

        let vectors = (0..frames)
            .map(|frame| {
                let mut vector = PitchVector::zeros();
                for (p, energies) in bands.iter().enumerate() {
                    vector[p] = energies[frame];
                }
                vector
            })
            .collect();
        PitchBuffer::new(vectors, REFERENCE_RATE as f32 / hop_size as f32)
    }
}

/// Mean squared band-pass output per frame for one pitch.
fn band_energies(
    stream: &[f32],
    rate: u32,
    centre: f64,
    frames: usize,
    window_size: usize,
    hop_size: usize,
) -> Vec<f32> {
    let mut sections = [
        Biquad::band_pass(centre, rate as f64, PITCH_Q),
        Biquad::band_pass(centre, rate as f64, PITCH_Q),
    ];
    let squared: Vec<f64> = stream
        .iter()
        .map(|&x| {
            let y = sections.iter_mut().fold(x as f64, |acc, s| s.process(acc));
            y * y
        })
        .collect();

    let scale = rate as f64 / REFERENCE_RATE as f64;
    let window = ((window_size as f64 * scale).round() as usize).max(1);
    (0..frames)
        .map(|frame| {
            let start = ((frame * hop_size) as f64 * scale).round() as usize;
            let start = start.min(squared.len());
            let end = (start + window).min(squared.len());
            if end == start {
                return 0.0;
            }
            let energy: f64 = squared[start..end].iter().sum();
            (energy / window as f64) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn sine(frequency: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * frequency * n as f64 / REFERENCE_RATE as f64).sin() as f32)
            .collect()
    }

    #[rstest]
    #[case(0, 4)]
    #[case(20, 4)]
    #[case(21, 3)]
    #[case(59, 3)]
    #[case(60, 2)]
    #[case(91, 2)]
    #[case(92, 1)]
    #[case(119, 1)]
    #[case(120, 0)]
    #[case(127, 0)]
    fn pitches_use_their_band(#[case] pitch: u8, #[case] stream: usize) {
        let pitch = Pitch::new(pitch).unwrap();
        assert_eq!(stream_for_pitch(pitch), stream);
        // every centre frequency sits below the stream's anti-aliasing cutoff
        let cutoff = CUTOFF_RATIO * STREAM_RATES[stream] as f64;
        assert!(stream == 0 || pitch.frequency() < cutoff);
    }

    #[test]
    fn multirate_streams_have_expected_lengths() {
        let signal = MultirateSignal::from_mono(&vec![0.0; 44_100], 44_100).unwrap();
        assert_eq!(signal.stream(0).len(), 44_100);
        assert_eq!(signal.stream(1).len(), 22_050);
        assert_eq!(signal.stream(2).len(), 4_410);
        assert_eq!(signal.stream(3).len(), 882);
        assert_eq!(signal.stream(4).len(), 441);
        assert!((signal.duration_secs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_low_sample_rates() {
        assert!(matches!(
            MultirateSignal::from_mono(&[0.0; 100], 22_050),
            Err(ExtractionError::InvalidSampleRate {
                minimum: 44_100,
                got: 22_050,
            })
        ));
    }

    #[test]
    fn higher_rates_are_brought_to_reference() {
        let signal = MultirateSignal::from_mono(&vec![0.0; 48_000], 48_000).unwrap();
        let len = signal.stream(0).len();
        assert!(len.abs_diff(44_100) <= 441, "resampled to {len} samples");
        assert!((signal.duration_secs() - 1.0).abs() < 0.01);
    }

    #[test]
    fn resampled_tone_keeps_its_pitch_and_level() {
        let samples: Vec<f32> = (0..2 * 48_000)
            .map(|n| (2.0 * PI * 440.0 * n as f64 / 48_000.0).sin() as f32)
            .collect();
        let signal = MultirateSignal::from_mono(&samples, 48_000).unwrap();
        let extractor = FilterbankExtractor::new(FilterbankConfig::default()).unwrap();
        let features = extractor.extract(&signal);

        let steady = &features.frames()[10..features.len() - 2];
        for frame in steady {
            assert_eq!(frame.argmax(), 69);
            // a unit sine has a mean square of 0.5
            assert!(frame[69] > 0.4, "energy {}", frame[69]);
        }
    }

    #[test]
    fn streams_are_decimated_from_the_reference() {
        let reference = sine(100.0, 44_100);
        let signal = MultirateSignal::from_mono(&reference, 44_100).unwrap();
        for (index, &rate) in STREAM_RATES.iter().enumerate().skip(1) {
            let factor = (REFERENCE_RATE / rate) as usize;
            let expected = decimate(&reference, REFERENCE_RATE, factor);
            assert_eq!(signal.stream(index), expected.as_slice());
        }
    }

    #[test]
    fn decimation_attenuates_aliases() {
        // 3 kHz is above the 2205 Hz Nyquist frequency of the 4410 Hz stream
        let signal = MultirateSignal::from_mono(&sine(3000.0, 44_100), 44_100).unwrap();
        let tail = &signal.stream(2)[2000..];
        let rms = (tail.iter().map(|x| x * x).sum::<f32>() / tail.len() as f32).sqrt();
        assert!(rms < 0.05, "alias rms {rms}");
    }

    #[rstest]
    #[case(45)]
    #[case(57)]
    #[case(69)]
    #[case(76)]
    fn tone_energy_peaks_at_its_pitch(#[case] pitch: u8) {
        let frequency = Pitch::new(pitch).unwrap().frequency();
        let signal = MultirateSignal::from_mono(&sine(frequency, 2 * 44_100), 44_100).unwrap();
        let extractor = FilterbankExtractor::new(FilterbankConfig::default()).unwrap();
        let features = extractor.extract(&signal);

        assert_eq!(features.feature_rate(), 20.0);
        let steady = &features.frames()[10..features.len() - 2];
        for frame in steady {
            assert_eq!(frame.argmax(), pitch as usize);
        }
    }

    #[rstest]
    #[case(88)]
    #[case(90)]
    #[case(91)]
    #[case(92)]
    #[case(93)]
    #[case(95)]
    #[case(96)]
    #[case(97)]
    fn pitches_near_the_band_split_keep_their_energy(#[case] pitch: u8) {
        let frequency = Pitch::new(pitch).unwrap().frequency();
        let signal = MultirateSignal::from_mono(&sine(frequency, 2 * 44_100), 44_100).unwrap();
        let extractor = FilterbankExtractor::new(FilterbankConfig::default()).unwrap();
        let features = extractor.extract(&signal);
        let frame = &features.frames()[20];

        assert_eq!(frame.argmax(), pitch as usize);
        // at least three quarters of the 0.5 mean square of a unit sine
        assert!(frame[pitch as usize] >= 0.375, "energy {}", frame[pitch as usize]);
    }

    #[test]
    fn from_streams_checks_every_stream() {
        let streams: [Vec<f32>; 5] = [
            vec![0.0; 10],
            vec![0.0; 5],
            vec![],
            vec![0.0; 1],
            vec![0.0; 1],
        ];
        assert!(MultirateSignal::from_streams(streams).is_err());
    }
}
