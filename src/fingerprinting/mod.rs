//! Shazam audio fingerprinting.
//!
//! * [`algorithm`]: turns 16 kHz mono PCM into spectral peaks
//! * [`signature_format`]: binary signature encoding and `data:` URI
//! * [`communication`]: the recognition request body sent to the service

pub mod algorithm;
pub mod communication;
pub mod signature_format;

/// Sample rate the fingerprint algorithm operates on.
pub const FINGERPRINT_SAMPLE_RATE: u32 = 16000;
