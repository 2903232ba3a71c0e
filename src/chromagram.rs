//! Chromagram
//!
//! Folds 128-bin pitch features onto the 12 pitch classes, treating notes an
//! octave apart as equivalent.

use crate::vector::{ChromaBuffer, ChromaVector, PitchBuffer, PitchVector};

/// Fold one pitch vector: `chroma[p mod 12] += pitch[p]`.
#[inline]
pub fn reduce_frame(pitch: &PitchVector) -> ChromaVector {
    ChromaVector::from(pitch)
}

/// Fold every frame of a pitch buffer, keeping its feature rate.
pub fn reduce(pitch: &PitchBuffer) -> ChromaBuffer {
    log::trace!("reducing {} pitch frames to chroma", pitch.len());
    pitch.map(reduce_frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::Chroma;

    #[test]
    fn octaves_collapse_onto_one_pitch_class() {
        let mut frame = PitchVector::zeros();
        frame[0] = 1.0;
        frame[12] = 0.5;
        let chroma = reduce_frame(&frame);
        assert_eq!(chroma[Chroma::C.index()], 1.5);
        assert_eq!(chroma.sum(), 1.5);
        assert_eq!(chroma.indices_by_threshold(crate::vector::Threshold::AtLeast(1e-9)), vec![0]);
    }

    #[test]
    fn every_pitch_lands_on_its_chroma() {
        let mut frame = PitchVector::zeros();
        for p in 0..128 {
            frame[p] = 1.0;
        }
        let chroma = reduce_frame(&frame);
        // pitches 120..128 add a tenth octave to C through G
        for c in 0..12 {
            let expected = if c <= Chroma::G.index() { 11.0 } else { 10.0 };
            assert_eq!(chroma[c], expected);
        }
    }

    #[test]
    fn buffer_reduction_keeps_rate_and_length() {
        let buffer = PitchBuffer::new(vec![PitchVector::zeros(); 7], 21.5);
        let chroma = reduce(&buffer);
        assert_eq!(chroma.len(), 7);
        assert_eq!(chroma.feature_rate(), 21.5);
    }
}
