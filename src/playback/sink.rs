use std::time::Duration;

use async_trait::async_trait;

use crate::{
    audio::constants::{FRAME_DURATION_MS, SILENCE_BURST_FRAMES, SILENCE_FRAME},
    common::types::AnyResult,
};

/// Outbound side of a ready voice connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one encoded 20 ms frame.
    async fn send_frame(&self, frame: &[u8]) -> AnyResult<()>;

    /// Toggle the speaking indicator for this connection.
    async fn set_speaking(&self, speaking: bool) -> AnyResult<()>;
}

/// Sends a short run of Opus silence frames at playback pace.
pub async fn send_silence(sink: &dyn FrameSink) {
    for _ in 0..SILENCE_BURST_FRAMES {
        if sink.send_frame(&SILENCE_FRAME).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(FRAME_DURATION_MS)).await;
    }
}
