//! Audio transport helpers for the speech stage.
//!
//! Synthesized audio travels inside JSON payloads, so it is base64-encoded
//! for the stream hop and validated before publishing.

use anyhow::{Context, Result};
use base64::Engine;
use tracing::{debug, warn};

/// Upper bound on a single synthesized clip (5 MB)
pub const MAX_AUDIO_BYTES: usize = 5 * 1024 * 1024;

/// Encode raw audio bytes for stream transport
pub fn encode_base64(audio: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(audio)
}

/// Decode transport-encoded audio back to raw bytes
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("Failed to decode base64 audio data")
}

/// Sanity-check synthesized audio before it goes on the wire.
///
/// Recognizes MP3 and WAV headers; unknown formats are assumed valid so an
/// unusual but working backend is not rejected on sniffing alone.
pub fn validate_audio(audio: &[u8], max_size: usize) -> bool {
    if audio.is_empty() {
        warn!("Audio data is empty");
        return false;
    }
    if audio.len() > max_size {
        warn!(
            "Audio data too large: {} bytes > {} bytes",
            audio.len(),
            max_size
        );
        return false;
    }

    if audio.starts_with(b"ID3") || audio.starts_with(&[0xff, 0xfb]) {
        debug!("Valid MP3 format detected");
        return true;
    }
    if audio.starts_with(b"RIFF") && audio.len() >= 12 && &audio[8..12] == b"WAVE" {
        debug!("Valid WAV format detected");
        return true;
    }

    debug!("Unknown audio format, assuming valid");
    true
}

/// Estimate clip duration in seconds from the encoded size.
///
/// MP3 at the typical 64 kbps synthesis bitrate runs about 8 KB per second.
/// Other formats return `None` rather than a guess.
pub fn estimate_duration(audio: &[u8], format: &str) -> Option<f64> {
    if format.eq_ignore_ascii_case("mp3") {
        let seconds = audio.len() as f64 / 8000.0;
        return Some((seconds * 100.0).round() / 100.0);
    }
    None
}
