//! Upload → [`AudioFrameStream`] transcoding.
//!
//! decode (symphonia) → [`ChannelMapper`] → [`LinearResampler`] → 20 ms
//! chunking → Opus → [`FrameWriter`]. Each decoded packet flows through the
//! whole chain before the next one is read.

use std::{io::Cursor, path::Path};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use crate::{
    audio::{
        AudioFormat, AudioFrameStream, FrameWriter,
        constants::{FRAME_SIZE_SAMPLES, MAX_UPLOAD_BYTES, TARGET_CHANNELS, TARGET_SAMPLE_RATE},
        encoder::Encoder,
        resample::{ChannelMapper, LinearResampler, PcmStage},
    },
    common::errors::TranscodeError,
};

/// Transcode an in-memory upload. The format is taken from `file_name`'s
/// extension; the size limit and the format are checked before decoding.
pub fn transcode(data: Vec<u8>, file_name: &str) -> Result<AudioFrameStream, TranscodeError> {
    if data.len() > MAX_UPLOAD_BYTES {
        return Err(TranscodeError::TooLarge {
            size: data.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }

    let format = AudioFormat::from_file_name(file_name);
    let Some(ext) = format.hint_ext() else {
        return Err(TranscodeError::UnsupportedFormat(file_name.to_string()));
    };

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(ext);

    let detected = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut reader = detected.format;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(TranscodeError::NoTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

    debug!(
        "Transcoding {} ({:?}): {:?}Hz, {:?} channels",
        file_name,
        format,
        params.sample_rate,
        params.channels.map(|c| c.count())
    );

    let mut pipeline: Option<PcmPipeline> = None;
    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    let mut last_error: Option<Error> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(Error::DecodeError(e)) => {
                warn!("Skipping undecodable packet in {}: {}", file_name, e);
                last_error = Some(Error::DecodeError(e));
                continue;
            }
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let spec = *audio_buf.spec();
        if audio_buf.frames() == 0 {
            continue;
        }

        let needed = audio_buf.frames() * spec.channels.count();
        if sample_buf.as_ref().is_none_or(|b| b.capacity() < needed) {
            sample_buf = Some(SampleBuffer::<i16>::new(audio_buf.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(audio_buf);

        if pipeline.is_none() {
            pipeline = Some(PcmPipeline::new(spec.rate, spec.channels.count())?);
        }
        if let Some(stage) = pipeline.as_mut() {
            stage.push(buf.samples())?;
        }
    }

    let Some(pipeline) = pipeline else {
        return Err(match last_error {
            Some(e) => TranscodeError::Decode(e),
            None => TranscodeError::NoAudio,
        });
    };

    let stream = pipeline.finish()?;
    debug!(
        "Transcoded {} into {} frames ({:?})",
        file_name,
        stream.frame_count(),
        stream.duration()
    );
    Ok(stream)
}

/// Reads and transcodes a file from disk. The size limit is checked against
/// the file metadata before anything is read.
pub fn transcode_file(path: impl AsRef<Path>) -> Result<AudioFrameStream, TranscodeError> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len() as usize;
    if size > MAX_UPLOAD_BYTES {
        return Err(TranscodeError::TooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }

    let data = std::fs::read(path)?;
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    transcode(data, name)
}

/// Runs [`transcode`] on the blocking pool so decode and encode never stall
/// the runtime.
pub async fn transcode_async(
    data: Vec<u8>,
    file_name: String,
) -> Result<AudioFrameStream, TranscodeError> {
    tokio::task::spawn_blocking(move || transcode(data, &file_name))
        .await
        .map_err(|e| TranscodeError::Worker(e.to_string()))?
}

/// Holds back samples until a full 20 ms frame is available.
#[derive(Default)]
struct FrameChunker {
    pending: Vec<i16>,
    pos: usize,
}

impl FrameChunker {
    fn push(&mut self, samples: &[i16]) {
        if self.pos > 0 {
            self.pending.drain(..self.pos);
            self.pos = 0;
        }
        self.pending.extend_from_slice(samples);
    }

    fn next_frame(&mut self) -> Option<&[i16]> {
        if self.pending.len() - self.pos < FRAME_SIZE_SAMPLES {
            return None;
        }
        let start = self.pos;
        self.pos += FRAME_SIZE_SAMPLES;
        Some(&self.pending[start..start + FRAME_SIZE_SAMPLES])
    }

    /// Zero-pads and returns the trailing partial frame, if any.
    fn flush(&mut self) -> Option<&[i16]> {
        let start = self.pos;
        if self.pending.len() == start {
            return None;
        }
        self.pending.resize(start + FRAME_SIZE_SAMPLES, 0);
        self.pos = self.pending.len();
        Some(&self.pending[start..])
    }
}

struct PcmPipeline {
    mapper: ChannelMapper,
    resampler: LinearResampler,
    chunker: FrameChunker,
    encoder: Encoder,
    writer: FrameWriter,
    mapped: Vec<i16>,
    resampled: Vec<i16>,
    heard_signal: bool,
}

impl PcmPipeline {
    fn new(source_rate: u32, source_channels: usize) -> Result<Self, TranscodeError> {
        let encoder = Encoder::new().map_err(|e| TranscodeError::Encode(e.to_string()))?;
        Ok(Self {
            mapper: ChannelMapper::new(source_channels),
            resampler: LinearResampler::new(source_rate, TARGET_SAMPLE_RATE, TARGET_CHANNELS),
            chunker: FrameChunker::default(),
            encoder,
            writer: FrameWriter::new(),
            mapped: Vec::new(),
            resampled: Vec::new(),
            heard_signal: false,
        })
    }

    fn push(&mut self, samples: &[i16]) -> Result<(), TranscodeError> {
        self.mapped.clear();
        self.mapper.process(samples, &mut self.mapped);

        self.resampled.clear();
        self.resampler.process(&self.mapped, &mut self.resampled);

        if !self.heard_signal {
            self.heard_signal = self.resampled.iter().any(|&s| s != 0);
        }

        self.chunker.push(&self.resampled);
        while let Some(frame) = self.chunker.next_frame() {
            let packet = self
                .encoder
                .encode(frame)
                .map_err(|e| TranscodeError::Encode(e.to_string()))?;
            self.writer
                .push(packet)
                .map_err(|e| TranscodeError::Encode(e.to_string()))?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<AudioFrameStream, TranscodeError> {
        if let Some(frame) = self.chunker.flush() {
            let packet = self
                .encoder
                .encode(frame)
                .map_err(|e| TranscodeError::Encode(e.to_string()))?;
            self.writer
                .push(packet)
                .map_err(|e| TranscodeError::Encode(e.to_string()))?;
        }

        // an all-zero signal is treated like an empty one
        if !self.heard_signal {
            return Err(TranscodeError::NoAudio);
        }
        self.writer.finish().map_err(|_| TranscodeError::NoAudio)
    }
}
