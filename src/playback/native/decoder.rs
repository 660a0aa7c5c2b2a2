use std::io::Cursor;
use symphonia::core::{
    audio::AudioBufferRef,
    codecs::{Decoder, DecoderOptions},
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
    units::Time,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),
    #[error("No audio tracks found")]
    NoAudioTracks,
}

/// Wrapper around a symphonia decoder that counts decoded frames so the
/// position can be derived from them
pub struct EpisodeDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    decoded_frames: u64,
    duration: Option<f64>,
}

impl EpisodeDecoder {
    /// Probe `data`, using the file extension as a hint when there is one
    pub fn new(data: Vec<u8>, extension: Option<&str>) -> Result<Self, DecoderError> {
        let cursor = Cursor::new(data);
        let media_source = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            media_source,
            &FormatOptions {
                enable_gapless: true,
                ..Default::default()
            },
            &MetadataOptions::default(),
        )?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTracks)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);

        // Streams without a frame count (e.g. some MP3s) stay unknown
        let duration = track
            .codec_params
            .n_frames
            .map(|n_frames| n_frames as f64 / sample_rate as f64);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        debug!(
            "Opened decoder: {} Hz, duration {:?}",
            sample_rate, duration
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            decoded_frames: 0,
            duration,
        })
    }

    /// Decode the next packet. `None` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<AudioBufferRef<'_>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(DecoderError::Symphonia(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(audio_buf) => {
                    self.decoded_frames += audio_buf.frames() as u64;
                    return Ok(Some(audio_buf));
                }
                // Corrupt frames are skipped, not fatal
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecoderError::Symphonia(e)),
            }
        }
    }

    /// Position in seconds, from the frames decoded so far
    pub fn position(&self) -> f64 {
        self.decoded_frames as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Seek to `position` seconds. Returns where the decoder actually landed.
    pub fn seek(&mut self, position: f64) -> Result<f64, DecoderError> {
        let position = position.max(0.0);
        let seek_time = Time::new(position.floor() as u64, position.fract());

        match self.format_reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: seek_time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => {
                self.decoder.reset();
                self.decoded_frames = seeked.actual_ts;
                Ok(self.position())
            }
            Err(e) => {
                warn!(
                    "Seek by time failed for {:.3}s: {:?}, falling back to decode",
                    position, e
                );
                self.seek_by_decoding(position)
            }
        }
    }

    fn seek_by_decoding(&mut self, position: f64) -> Result<f64, DecoderError> {
        let target_frame = (position * self.sample_rate as f64) as u64;

        self.format_reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::new(0, 0.0),
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();
        self.decoded_frames = 0;

        while self.decoded_frames < target_frame {
            if self.decode_next()?.is_none() {
                break;
            }
        }

        Ok(self.position())
    }
}

/// File extension of a URL's path, used as a probe hint
pub fn extension_hint(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let file_name = path.rsplit('/').next()?;
    let (_, extension) = file_name.rsplit_once('.')?;
    if extension.is_empty() || extension.len() > 5 {
        return None;
    }
    Some(extension.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_hint() {
        assert_eq!(
            extension_hint("https://cdn.example.com/ep/42.MP3?token=abc"),
            Some("mp3".to_string())
        );
        assert_eq!(
            extension_hint("https://cdn.example.com/feed/episode.m4a#t=30"),
            Some("m4a".to_string())
        );
        assert_eq!(extension_hint("https://cdn.example.com/stream"), None);
        assert_eq!(extension_hint("https://cdn.example.com/a.b/stream"), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result = EpisodeDecoder::new(vec![0u8; 64], Some("mp3"));
        assert!(result.is_err());
    }
}
