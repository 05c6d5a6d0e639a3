// src/media/wav.rs
//! Gemini speech comes back as headerless 16-bit PCM; browsers need a WAV container.

use std::io::Cursor;

use crate::error::MediaError;

pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// Wraps little-endian signed 16-bit mono PCM into a WAV file.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, MediaError> {
    if pcm.len() % 2 != 0 {
        return Err(MediaError::upstream(
            None,
            format!("PCM payload has an odd length ({} bytes)", pcm.len()),
        ));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let wav_err = |e: hound::Error| MediaError::Storage(format!("failed to encode WAV: {e}"));
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
        for chunk in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(cursor.into_inner())
}
