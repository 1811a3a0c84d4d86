//! Reframes arbitrarily sized PCM deltas into fixed 20 ms frames.
//!
//! Input is 24 kHz mono s16le PCM, usually base64 encoded. Each complete
//! 960-byte frame is attenuated and written to the writer's track in byte
//! order; the residual tail waits for the next delta.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::room::AudioTrack;

/// 20 ms @ 24 kHz mono 16-bit.
pub const FRAME_BYTES: usize = 960;
pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;

#[derive(Debug, Error)]
pub enum PcmError {
    /// The delta was not valid base64. The buffer is untouched.
    #[error("invalid base64 audio: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The track refused a frame. The frame stays buffered.
    #[error("frame emission failed: {0}")]
    Emit(#[source] anyhow::Error),
}

/// Scale little-endian i16 samples by `gain`, clamping to the i16 range.
/// A trailing odd byte is left alone.
pub fn attenuate_in_place(frame: &mut [u8], gain: f32) {
    for pair in frame.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        let scaled = (f32::from(sample) * gain).clamp(f32::from(i16::MIN), f32::from(i16::MAX));
        pair.copy_from_slice(&(scaled as i16).to_le_bytes());
    }
}

/// Duration in milliseconds of `len` bytes of 24 kHz mono s16le.
pub fn duration_ms(len: usize) -> f64 {
    (len / 2) as f64 / f64::from(SAMPLE_RATE) * 1000.0
}

/// One writer per track. Buffering and emission share a lock so frames leave
/// in the order their bytes arrived.
pub struct PcmWriter {
    track: Arc<dyn AudioTrack>,
    gain: f32,
    buf: Mutex<Vec<u8>>,
}

impl PcmWriter {
    pub fn new(track: Arc<dyn AudioTrack>, gain: f32) -> Self {
        Self {
            track,
            gain: gain.clamp(0.0, 1.0),
            buf: Mutex::new(Vec::with_capacity(FRAME_BYTES * 4)),
        }
    }

    pub fn track(&self) -> &Arc<dyn AudioTrack> {
        &self.track
    }

    /// Decode a base64 delta and emit every complete frame. Returns the
    /// number of frames written.
    pub async fn write_b64_delta(&self, b64: &str) -> Result<usize, PcmError> {
        if b64.is_empty() {
            return Ok(0);
        }
        let raw = STANDARD.decode(b64)?;
        self.write_pcm(&raw).await
    }

    /// Append raw PCM and emit every complete frame.
    pub async fn write_pcm(&self, raw: &[u8]) -> Result<usize, PcmError> {
        let mut buf = self.buf.lock().await;
        buf.extend_from_slice(raw);

        let mut frames = 0;
        while buf.len() >= FRAME_BYTES {
            let mut frame = [0u8; FRAME_BYTES];
            frame.copy_from_slice(&buf[..FRAME_BYTES]);
            attenuate_in_place(&mut frame, self.gain);
            self.track
                .write_frame(&frame)
                .await
                .map_err(PcmError::Emit)?;
            buf.drain(..FRAME_BYTES);
            frames += 1;
        }
        trace!(
            track = self.track.name(),
            frames,
            residual = buf.len(),
            "Wrote PCM delta"
        );
        Ok(frames)
    }

    /// Drop all pending bytes. Returns how many were discarded.
    pub async fn clear(&self) -> usize {
        let mut buf = self.buf.lock().await;
        let dropped = buf.len();
        buf.clear();
        debug!(track = self.track.name(), dropped, "Cleared PCM buffer");
        dropped
    }

    /// Bytes waiting for a full frame.
    pub async fn buffered(&self) -> usize {
        self.buf.lock().await.len()
    }
}
