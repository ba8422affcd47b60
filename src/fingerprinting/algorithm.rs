//! Signature generation from 16 kHz mono PCM.
//!
//! Every 128 new samples the last 2048 samples are Hann-windowed and
//! transformed.  Magnitudes are spread across neighbouring bins and across
//! earlier passes; a bin becomes a peak when it dominates both its spectral
//! and temporal neighbourhood.  Peaks are recognized 46 passes behind the
//! newest FFT so the spreading window is complete.

use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

use chfft::RFft1D;
use rodio::source::UniformSourceIterator;
use rodio::Decoder;

use super::signature_format::{DecodedSignature, FrequencyBand, FrequencyPeak};
use super::FINGERPRINT_SAMPLE_RATE;
use crate::error::RecognitionError;

const WINDOW_SIZE: usize = 2048;
const STEP: usize = 128;
const BINS: usize = WINDOW_SIZE / 2 + 1;
const HISTORY: usize = 256;
const RECOGNITION_DELAY: u32 = 46;

const NEIGHBOR_OFFSETS: [isize; 8] = [-10, -7, -4, -3, 1, 2, 5, 8];
const OTHER_FFT_OFFSETS: [isize; 14] = [-53, -45, 165, 172, 179, 186, 193, 200, 214, 221, 228, 235, 242, 249];

/// Fixed-size circular history.
struct RingBuffer<T> {
    buffer: Vec<T>,
    position: usize,
}

impl<T: Clone> RingBuffer<T> {
    fn new(size: usize, fill: T) -> Self {
        Self {
            buffer: vec![fill; size],
            position: 0,
        }
    }

    fn index(&self, offset: isize) -> usize {
        (self.position as isize + offset).rem_euclid(self.buffer.len() as isize) as usize
    }

    fn append(&mut self, value: T) {
        self.buffer[self.position] = value;
        self.position = (self.position + 1) % self.buffer.len();
    }
}

pub struct SignatureGenerator {
    samples: RingBuffer<i16>,
    fft_outputs: RingBuffer<Vec<f32>>,
    spread_fft_outputs: RingBuffer<Vec<f32>>,
    num_spread_ffts_done: u32,
    window: Vec<f32>,
    fft: RFft1D<f32>,
    signature: DecodedSignature,
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureGenerator {
    pub fn new() -> Self {
        let window = (0..WINDOW_SIZE)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * (i + 1) as f32 / (WINDOW_SIZE + 1) as f32).cos())
            .collect();
        Self {
            samples: RingBuffer::new(WINDOW_SIZE, 0),
            fft_outputs: RingBuffer::new(HISTORY, vec![0.0; BINS]),
            spread_fft_outputs: RingBuffer::new(HISTORY, vec![0.0; BINS]),
            num_spread_ffts_done: 0,
            window,
            fft: RFft1D::new(WINDOW_SIZE),
            signature: DecodedSignature {
                sample_rate_hz: FINGERPRINT_SAMPLE_RATE,
                ..Default::default()
            },
        }
    }

    /// Fingerprint signed 16-bit 16 kHz mono samples.
    pub fn make_signature_from_buffer(samples: &[i16]) -> DecodedSignature {
        let mut generator = Self::new();
        generator.signature.number_samples = samples.len() as u32;
        for chunk in samples.chunks_exact(STEP) {
            generator.process_chunk(chunk);
        }
        generator.signature
    }

    /// Decode an audio file, convert it to 16 kHz mono and fingerprint a
    /// centred window of at most `segment_seconds`.
    pub fn make_signature_from_file(path: &Path, segment_seconds: u32) -> Result<DecodedSignature, RecognitionError> {
        let file = File::open(path).map_err(|e| RecognitionError::Artifact(e.to_string()))?;
        let decoder = Decoder::new(BufReader::new(file)).map_err(|e| RecognitionError::Artifact(e.to_string()))?;
        Ok(Self::signature_from_decoder(decoder, segment_seconds))
    }

    /// Same as [`make_signature_from_file`](Self::make_signature_from_file) for in-memory file bytes.
    pub fn make_signature_from_bytes(bytes: Vec<u8>, segment_seconds: u32) -> Result<DecodedSignature, RecognitionError> {
        let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| RecognitionError::Artifact(e.to_string()))?;
        Ok(Self::signature_from_decoder(decoder, segment_seconds))
    }

    fn signature_from_decoder<R>(decoder: Decoder<R>, segment_seconds: u32) -> DecodedSignature
    where
        R: std::io::Read + std::io::Seek + Send + Sync + 'static,
    {
        let converted: UniformSourceIterator<Decoder<R>, i16> =
            UniformSourceIterator::new(decoder, 1, FINGERPRINT_SAMPLE_RATE);
        let pcm: Vec<i16> = converted.collect();
        Self::make_signature_from_buffer(centered_window(&pcm, segment_seconds as usize * FINGERPRINT_SAMPLE_RATE as usize))
    }

    fn process_chunk(&mut self, chunk: &[i16]) {
        self.do_fft(chunk);
        self.do_peak_spreading();
        self.num_spread_ffts_done += 1;
        if self.num_spread_ffts_done >= RECOGNITION_DELAY {
            self.do_peak_recognition();
        }
    }

    fn do_fft(&mut self, chunk: &[i16]) {
        for &s in chunk {
            self.samples.append(s);
        }

        // oldest sample first
        let reordered: Vec<f32> = (0..WINDOW_SIZE)
            .map(|i| self.samples.buffer[(self.samples.position + i) % WINDOW_SIZE] as f32 * self.window[i])
            .collect();

        let spectrum = self.fft.forward(&reordered);
        let mut magnitudes = vec![0.0f32; BINS];
        for (out, c) in magnitudes.iter_mut().zip(spectrum.iter()) {
            *out = ((c.re * c.re + c.im * c.im) / (1 << 17) as f32).max(1e-10);
        }
        self.fft_outputs.append(magnitudes);
    }

    fn do_peak_spreading(&mut self) {
        let mut spread = self.fft_outputs.buffer[self.fft_outputs.index(-1)].clone();

        for position in 0..BINS - 2 {
            spread[position] = spread[position].max(spread[position + 1]).max(spread[position + 2]);
        }

        for former in [-1isize, -3, -6] {
            let idx = self.spread_fft_outputs.index(former);
            let former_fft = &mut self.spread_fft_outputs.buffer[idx];
            for (old, new) in former_fft.iter_mut().zip(spread.iter()) {
                *old = old.max(*new);
            }
        }

        self.spread_fft_outputs.append(spread);
    }

    fn do_peak_recognition(&mut self) {
        let fft_minus_46 = &self.fft_outputs.buffer[self.fft_outputs.index(-(RECOGNITION_DELAY as isize))];
        let fft_minus_49 = &self.spread_fft_outputs.buffer[self.spread_fft_outputs.index(-49)];
        let floor = 1.0f32 / 64.0;

        for bin in 10..1015usize {
            let value = fft_minus_46[bin];
            if value < floor || value < fft_minus_49[bin - 1] {
                continue;
            }

            let max_neighbor_in_fft_minus_49 = NEIGHBOR_OFFSETS
                .iter()
                .map(|&off| fft_minus_49[(bin as isize + off) as usize])
                .fold(0.0f32, f32::max);
            if value <= max_neighbor_in_fft_minus_49 {
                continue;
            }

            let max_neighbor_in_other_ffts = OTHER_FFT_OFFSETS
                .iter()
                .map(|&off| self.spread_fft_outputs.buffer[self.spread_fft_outputs.index(off)][bin - 1])
                .fold(max_neighbor_in_fft_minus_49, f32::max);
            if value <= max_neighbor_in_other_ffts {
                continue;
            }

            let magnitude = |v: f32| v.ln().max(floor) * 1477.3 + 6144.0;
            let peak_magnitude = magnitude(value);
            let before = magnitude(fft_minus_46[bin - 1]);
            let after = magnitude(fft_minus_46[bin + 1]);

            let variation_1 = peak_magnitude * 2.0 - before - after;
            if variation_1 <= 0.0 {
                continue;
            }
            let variation_2 = (after - before) * 32.0 / variation_1;
            let corrected_bin = bin as f32 * 64.0 + variation_2;
            let frequency_hz = corrected_bin * (FINGERPRINT_SAMPLE_RATE as f32 / 2.0 / 1024.0 / 64.0);

            let Some(band) = FrequencyBand::from_hz(frequency_hz) else {
                continue;
            };
            self.signature
                .frequency_band_to_sound_peaks
                .entry(band)
                .or_default()
                .push(FrequencyPeak {
                    fft_pass_number: self.num_spread_ffts_done - RECOGNITION_DELAY,
                    peak_magnitude: peak_magnitude as u16,
                    corrected_peak_frequency_bin: corrected_bin as u16,
                });
        }
    }
}

/// The middle `max_len` samples, or everything when shorter.
fn centered_window(samples: &[i16], max_len: usize) -> &[i16] {
    if samples.len() <= max_len {
        return samples;
    }
    let start = (samples.len() - max_len) / 2;
    &samples[start..start + max_len]
}
