//! # PCM16 Codec
//!
//! Converts between 32-bit float samples and signed 16-bit little-endian PCM,
//! and between raw wire payloads and per-channel sample vectors.
//!
//! ## Key Functions:
//! - **float_pcm_to_bytes**: Capture path, mono float samples → PCM16 bytes
//! - **bytes_to_channels**: Playback path, interleaved PCM16 → one `Vec<f32>` per channel
//! - **create_blob**: Capture block → upstream wire message
//!
//! ## Scaling:
//! Both directions use a factor of 32768. Encoding does NOT clamp: the scaled
//! value is truncated toward zero and reduced modulo 2^16 into `i16`, so a
//! sample of exactly `1.0` becomes `-32768` and `2.0` becomes `0`. Non-finite
//! samples encode as `0`. Receivers of this stream rely on that exact bit
//! pattern.

use crate::audio::transcoder;
use crate::config::CAPTURE_MIME_TYPE;
use crate::error::DecodeError;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Scale between normalized floats and 16-bit integers.
pub const PCM16_SCALE: f32 = 32768.0;

const PCM16_MODULUS: f64 = 65536.0;

/// Convert one float sample to PCM16 with two's-complement wraparound.
#[inline]
fn wrap_to_i16(sample: f32) -> i16 {
    let scaled = (sample as f64 * PCM16_SCALE as f64).trunc();
    if !scaled.is_finite() {
        return 0;
    }
    // Exact for every f64, so huge values wrap instead of saturating
    scaled.rem_euclid(PCM16_MODULUS) as u16 as i16
}

/// Encode mono float samples as little-endian PCM16 bytes.
pub fn float_pcm_to_bytes(samples: &[f32]) -> Vec<u8> {
    let ints: Vec<i16> = samples.iter().map(|&s| wrap_to_i16(s)).collect();
    let mut bytes = vec![0u8; ints.len() * 2];
    LittleEndian::write_i16_into(&ints, &mut bytes);
    bytes
}

/// Decode interleaved little-endian PCM16 into separate channels.
///
/// Frame `i` occupies samples `[i * channels, i * channels + channels)`; channel
/// `c` of that frame becomes `sample / 32768.0` in output vector `c`.
///
/// ## Errors:
/// `DecodeError::Format` when `channels` is zero or the byte length is not a
/// multiple of `2 * channels`.
pub fn bytes_to_channels(bytes: &[u8], channels: usize) -> Result<Vec<Vec<f32>>, DecodeError> {
    if channels == 0 || bytes.len() % (2 * channels) != 0 {
        return Err(DecodeError::Format {
            len: bytes.len(),
            channels,
        });
    }

    let mut samples = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(bytes, &mut samples);

    let frames = samples.len() / channels;
    let mut output = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, &sample) in output.iter_mut().zip(frame) {
            channel.push(sample as f32 / PCM16_SCALE);
        }
    }

    Ok(output)
}

/// Media payload exchanged with the live session.
///
/// Serializes as `{"mimeType": "...", "data": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl MediaBlob {
    /// Sample rate declared by a `rate=` mime parameter, if any.
    ///
    /// `"audio/pcm;rate=24000"` yields `Some(24000)`. Only used for
    /// diagnostics: decoding always uses the fixed playback rate.
    pub fn declared_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }
}

/// Build the upstream wire message for one captured mono block.
pub fn create_blob(samples: &[f32]) -> MediaBlob {
    MediaBlob {
        mime_type: CAPTURE_MIME_TYPE.to_string(),
        data: transcoder::encode(&float_pcm_to_bytes(samples)),
    }
}

/// One received unit of PCM16 audio, not yet decoded into samples.
///
/// Chunks move between pipeline stages by value; nothing keeps a second
/// reference once a stage hands one on.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    data: Vec<u8>,
    sample_rate: u32,
    channels: usize,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: usize) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    /// Decode an inline wire blob at the fixed playback format. Any `rate=`
    /// parameter on the blob is not negotiated and has no effect.
    pub fn from_blob(
        blob: &MediaBlob,
        sample_rate: u32,
        channels: usize,
    ) -> Result<Self, DecodeError> {
        let data = transcoder::decode(&blob.data)?;
        Ok(Self::new(data, sample_rate, channels))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Deinterleave into one float vector per channel.
    pub fn to_channels(&self) -> Result<Vec<Vec<f32>>, DecodeError> {
        bytes_to_channels(&self.data, self.channels)
    }
}
