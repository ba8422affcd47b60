//! WAV file I/O for segment artifacts: 16-bit PCM mono writer and header reader.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

/// WAV file header information
#[derive(Debug)]
pub struct WavHeader {
    pub sample_rate: u32,
    pub num_channels: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    pub fn frame_count(&self) -> u64 {
        let frame_size = (self.bits_per_sample as u64 / 8) * self.num_channels as u64;
        if frame_size == 0 {
            return 0;
        }
        self.data_size as u64 / frame_size
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Write mono `f32` samples (nominal range -1.0..=1.0) as a 16-bit PCM WAV file.
///
/// Samples outside the nominal range are clipped.
pub fn write_pcm16_wav(path: &Path, samples: &[f32], sample_rate: u32) -> io::Result<()> {
    let data_size = u32::try_from(samples.len() * 2)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "segment too large for WAV"))?;
    let mut out = BufWriter::new(File::create(path)?);

    out.write_all(b"RIFF")?;
    out.write_u32::<LittleEndian>(36 + data_size)?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_u32::<LittleEndian>(16)?;
    out.write_u16::<LittleEndian>(1)?; // PCM
    out.write_u16::<LittleEndian>(1)?;
    out.write_u32::<LittleEndian>(sample_rate)?;
    out.write_u32::<LittleEndian>(sample_rate * 2)?;
    out.write_u16::<LittleEndian>(2)?;
    out.write_u16::<LittleEndian>(16)?;

    out.write_all(b"data")?;
    out.write_u32::<LittleEndian>(data_size)?;
    for &s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.write_i16::<LittleEndian>(scaled)?;
    }

    out.flush()
}

/// Read and parse a WAV file header.
///
/// # Arguments
/// * `file` - Buffered file reader positioned at the start of the WAV file
///
/// # Returns
/// Parsed WAV header information; `InvalidData` for anything that is not RIFF/WAVE
pub fn read_wav_header(file: &mut BufReader<File>) -> io::Result<WavHeader> {
    let mut buf = [0u8; 36];
    file.read_exact(&mut buf)?;

    if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" || &buf[12..16] != b"fmt " {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Not a valid WAV file"));
    }

    let fmt_size = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
    let num_channels = u16::from_le_bytes([buf[22], buf[23]]);
    let sample_rate = u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
    let bits_per_sample = u16::from_le_bytes([buf[34], buf[35]]);

    // fmt chunks can be longer than 16 bytes (WAVE_FORMAT_EXTENSIBLE)
    file.seek(SeekFrom::Start(20 + fmt_size as u64))?;

    loop {
        let mut chunk_header = [0u8; 8];
        if file.read_exact(&mut chunk_header).is_err() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Could not find data chunk"));
        }

        let chunk_size = u32::from_le_bytes([chunk_header[4], chunk_header[5], chunk_header[6], chunk_header[7]]);

        if &chunk_header[0..4] == b"data" {
            return Ok(WavHeader {
                sample_rate,
                num_channels,
                bits_per_sample,
                data_size: chunk_size,
            });
        }

        file.seek(SeekFrom::Current(chunk_size as i64 + (chunk_size % 2) as i64))?;
    }
}

/// Open a WAV file and read its header.
pub fn read_wav_header_from_path(path: &Path) -> io::Result<WavHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    read_wav_header(&mut reader)
}
