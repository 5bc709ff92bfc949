//! Opus encoder. Wraps `audiopus` for turning 20 ms stereo PCM frames into
//! packets at the fixed upload bitrate.

use audiopus::{Application, Bitrate, Channels, SampleRate, coder::Encoder as OpusEncoder};

use crate::audio::constants::{MAX_OPUS_PACKET_SIZE, OPUS_BITRATE};

pub struct Encoder {
    encoder: OpusEncoder,
    /// Reusable output buffer; the returned slice borrows from it.
    out: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Result<Self, audiopus::Error> {
        let mut encoder =
            OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(OPUS_BITRATE))?;
        Ok(Self {
            encoder,
            out: vec![0u8; MAX_OPUS_PACKET_SIZE],
        })
    }

    /// Encode one 960-sample (per channel) interleaved frame.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<&[u8], audiopus::Error> {
        let size = self.encoder.encode(pcm, &mut self.out)?;
        Ok(&self.out[..size])
    }
}
