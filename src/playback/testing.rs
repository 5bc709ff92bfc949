use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    audio::{AudioFrameStream, FrameWriter, constants::SILENCE_FRAME},
    common::types::AnyResult,
    playback::FrameSink,
};

/// Records everything sent through it.
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Mutex<Vec<Vec<u8>>>,
    pub speaking: Mutex<Vec<bool>>,
    pub fail_sends: AtomicBool,
}

impl RecordingSink {
    /// Non-silence frames, first byte of each.
    pub fn audio_marks(&self) -> Vec<u8> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.as_slice() != SILENCE_FRAME)
            .map(|f| f[0])
            .collect()
    }

    pub fn silence_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.as_slice() == SILENCE_FRAME)
            .count()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_frame(&self, frame: &[u8]) -> AnyResult<()> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err("socket closed".into());
        }
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }

    async fn set_speaking(&self, speaking: bool) -> AnyResult<()> {
        self.speaking.lock().push(speaking);
        Ok(())
    }
}

/// A stream whose frames are `[mark, 0]` for each mark.
pub fn marked_stream(marks: &[u8]) -> AudioFrameStream {
    let mut writer = FrameWriter::new();
    for &m in marks {
        writer.push(&[m, 0]).unwrap();
    }
    writer.finish().unwrap()
}
