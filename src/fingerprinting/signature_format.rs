//! Binary encoding of a decoded signature (peaks grouped by frequency band).

use std::collections::BTreeMap;
use std::io::{self, Cursor, Seek, SeekFrom, Write};

use base64::Engine;
use byteorder::{LittleEndian, WriteBytesExt};

const MAGIC_1: u32 = 0xcafe_2580;
const MAGIC_2: u32 = 0x9411_9c00;
const HEADER_SIZE: u32 = 48;
const DATA_URI_PREFIX: &str = "data:audio/vnd.shazam.sig;base64,";

/// The four frequency bands peaks are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrequencyBand {
    Hz250To520 = 0,
    Hz520To1450 = 1,
    Hz1450To3500 = 2,
    Hz3500To5500 = 3,
}

impl FrequencyBand {
    pub fn from_hz(frequency_hz: f32) -> Option<Self> {
        match frequency_hz as i32 {
            250..=519 => Some(FrequencyBand::Hz250To520),
            520..=1449 => Some(FrequencyBand::Hz520To1450),
            1450..=3499 => Some(FrequencyBand::Hz1450To3500),
            3500..=5500 => Some(FrequencyBand::Hz3500To5500),
            _ => None,
        }
    }
}

/// One spectral peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPeak {
    pub fft_pass_number: u32,
    pub peak_magnitude: u16,
    pub corrected_peak_frequency_bin: u16,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedSignature {
    pub sample_rate_hz: u32,
    pub number_samples: u32,
    pub frequency_band_to_sound_peaks: BTreeMap<FrequencyBand, Vec<FrequencyPeak>>,
}

impl DecodedSignature {
    pub fn peak_count(&self) -> usize {
        self.frequency_band_to_sound_peaks.values().map(Vec::len).sum()
    }

    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        (self.number_samples as f64 / self.sample_rate_hz as f64 * 1000.0) as u32
    }

    fn sample_rate_id(&self) -> u32 {
        match self.sample_rate_hz {
            8000 => 1,
            11025 => 2,
            16000 => 3,
            32000 => 4,
            44100 => 5,
            48000 => 6,
            _ => 3,
        }
    }

    fn write_header(&self, cursor: &mut Cursor<Vec<u8>>, crc32: u32, size_minus_header: u32) -> io::Result<()> {
        cursor.write_u32::<LittleEndian>(MAGIC_1)?;
        cursor.write_u32::<LittleEndian>(crc32)?;
        cursor.write_u32::<LittleEndian>(size_minus_header)?;
        cursor.write_u32::<LittleEndian>(MAGIC_2)?;
        for _ in 0..3 {
            cursor.write_u32::<LittleEndian>(0)?;
        }
        cursor.write_u32::<LittleEndian>(self.sample_rate_id() << 27)?;
        for _ in 0..2 {
            cursor.write_u32::<LittleEndian>(0)?;
        }
        cursor.write_u32::<LittleEndian>(
            (self.number_samples as f64 + self.sample_rate_hz as f64 * 0.24) as u32,
        )?;
        cursor.write_u32::<LittleEndian>((15 << 19) + 0x40000)?;
        Ok(())
    }

    /// Serialize to the binary signature format.
    ///
    /// Layout: 48-byte header (magics, CRC32 of everything after byte 8,
    /// payload size), a `0x40000000` marker with the payload size again, then
    /// one chunk per band: `0x60030040 + band`, byte length, and the peak
    /// stream padded to 4 bytes.  Peaks store the fft pass delta in one byte;
    /// gaps of 255 or more are escaped with `0xff` + absolute pass number.
    pub fn encode_to_binary(&self) -> io::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_header(&mut cursor, 0, 0)?;
        cursor.write_u32::<LittleEndian>(0x4000_0000)?;
        cursor.write_u32::<LittleEndian>(0)?;

        for (band, peaks) in &self.frequency_band_to_sound_peaks {
            let mut stream = Vec::new();
            let mut pass = 0u32;
            for peak in peaks {
                if peak.fft_pass_number - pass >= 255 {
                    stream.write_u8(0xff)?;
                    stream.write_u32::<LittleEndian>(peak.fft_pass_number)?;
                    pass = peak.fft_pass_number;
                }
                stream.write_u8((peak.fft_pass_number - pass) as u8)?;
                stream.write_u16::<LittleEndian>(peak.peak_magnitude)?;
                stream.write_u16::<LittleEndian>(peak.corrected_peak_frequency_bin)?;
                pass = peak.fft_pass_number;
            }

            cursor.write_u32::<LittleEndian>(0x6003_0040 + *band as u32)?;
            cursor.write_u32::<LittleEndian>(stream.len() as u32)?;
            cursor.write_all(&stream)?;
            for _ in 0..(4 - stream.len() % 4) % 4 {
                cursor.write_u8(0)?;
            }
        }

        let size_minus_header = cursor.position() as u32 - HEADER_SIZE;
        cursor.seek(SeekFrom::Start(0))?;
        self.write_header(&mut cursor, 0, size_minus_header)?;
        cursor.seek(SeekFrom::Start(HEADER_SIZE as u64 + 4))?;
        cursor.write_u32::<LittleEndian>(size_minus_header)?;

        let mut bytes = cursor.into_inner();
        let crc = crc32fast::hash(&bytes[8..]);
        bytes[4..8].copy_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    /// `data:audio/vnd.shazam.sig;base64,...`
    pub fn encode_to_uri(&self) -> io::Result<String> {
        let binary = self.encode_to_binary()?;
        Ok(format!(
            "{}{}",
            DATA_URI_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(binary)
        ))
    }
}
