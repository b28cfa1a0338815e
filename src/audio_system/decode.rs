/// Decoded audio buffers
///
/// Assets are decoded once with symphonia into interleaved `f32` samples and shared
/// between every playback of the same key.
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;

/// Container extensions in the order they are tried: most broadly compatible first.
const FORMAT_PREFERENCE: [&str; 5] = ["mp3", "m4a", "ogg", "wav", "flac"];

/// Extensions this build can decode, most compatible first
pub fn supported_formats() -> Vec<&'static str> {
    FORMAT_PREFERENCE
        .iter()
        .copied()
        .filter(|ext| is_supported(ext))
        .collect()
}

/// Whether the decoder registry handles a container extension
pub fn is_supported(extension: &str) -> bool {
    matches!(
        extension.to_ascii_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "oga" | "wav" | "flac"
    )
}

/// Interleaved PCM samples shared by reference
#[derive(Clone)]
pub struct DecodedBuffer {
    samples: Arc<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Silent buffer of the given length
    pub fn silence(duration: Duration, channels: u16, sample_rate: u32) -> Self {
        let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames * channels.max(1) as usize], channels, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Copy of the range `[start, end)` in seconds, clamped to the buffer.
    ///
    /// Returns `None` when the range is empty after clamping.
    pub fn slice(&self, start_secs: f64, end_secs: f64) -> Option<DecodedBuffer> {
        let frames = self.frames();
        let to_frame = |secs: f64| ((secs.max(0.0) * self.sample_rate as f64).round() as usize).min(frames);
        let (start, end) = (to_frame(start_secs), to_frame(end_secs));
        if end <= start {
            return None;
        }

        let channels = self.channels as usize;
        let samples = self.samples[start * channels..end * channels].to_vec();
        Some(Self::new(samples, self.channels, self.sample_rate))
    }

    /// Join buffers with `gap` of silence between them.
    ///
    /// All parts must share channel count and sample rate; `None` otherwise.
    pub fn concat(parts: &[DecodedBuffer], gap: Duration) -> Option<DecodedBuffer> {
        let first = parts.first()?;
        if parts
            .iter()
            .any(|p| p.channels != first.channels || p.sample_rate != first.sample_rate)
        {
            return None;
        }

        let gap_samples = (gap.as_secs_f64() * first.sample_rate as f64).round() as usize
            * first.channels as usize;
        let total = parts.iter().map(|p| p.samples.len()).sum::<usize>()
            + gap_samples * parts.len().saturating_sub(1);

        let mut samples = Vec::with_capacity(total);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                samples.resize(samples.len() + gap_samples, 0.0);
            }
            samples.extend_from_slice(&part.samples);
        }
        Some(Self::new(samples, first.channels, first.sample_rate))
    }
}

impl fmt::Debug for DecodedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedBuffer")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Decode a complete encoded asset into memory
pub fn decode(bytes: &[u8], extension: Option<&str>) -> Result<DecodedBuffer, AudioError> {
    if bytes.is_empty() {
        return Err(AudioError::DecodeFailed("empty input".into()));
    }

    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    // Create a probe hint using the file extension
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::DecodeFailed(format!("probe failed: {}", e)))?;
    let mut format = probed.format;

    // Find the first audio track with a known (decodable) codec
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::DecodeFailed("no supported audio tracks".into()))?;

    let track_id = track.id;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);
    let mut sample_rate = track.codec_params.sample_rate;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::DecodeFailed(format!("no decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels.get_or_insert(spec.channels.count() as u16);
                sample_rate.get_or_insert(spec.rate);

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Corrupt packets are skipped, the rest of the stream is still usable
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::trace!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
        }
    }

    let (Some(channels), Some(sample_rate)) = (channels, sample_rate) else {
        return Err(AudioError::DecodeFailed("unknown channel layout".into()));
    };
    if samples.is_empty() {
        return Err(AudioError::DecodeFailed("no audio samples".into()));
    }

    Ok(DecodedBuffer::new(samples, channels, sample_rate))
}
