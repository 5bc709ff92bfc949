//! Blocking one-shot playback (chimes), independent of any looping player.

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::{
    audio::{AudioFrameStream, constants::FRAME_DURATION_MS},
    common::types::AnyResult,
    playback::sink::{FrameSink, send_silence},
};

/// Sends every frame of `stream` once at playback pace, then trailing silence.
/// Returns the number of frames sent.
pub async fn play_once(sink: &dyn FrameSink, stream: &AudioFrameStream) -> AnyResult<usize> {
    sink.set_speaking(true).await?;

    let mut interval = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sent = 0;
    for frame in stream.frames() {
        interval.tick().await;
        sink.send_frame(frame).await?;
        sent += 1;
    }

    send_silence(sink).await;
    sink.set_speaking(false).await?;
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::testing::{RecordingSink, marked_stream};

    #[tokio::test(start_paused = true)]
    async fn plays_each_frame_once_then_silence() {
        let sink = RecordingSink::default();
        let start = tokio::time::Instant::now();

        let sent = play_once(&sink, &marked_stream(&[4, 5, 6])).await.unwrap();

        assert_eq!(sent, 3);
        assert_eq!(sink.audio_marks(), vec![4, 5, 6]);
        assert_eq!(sink.silence_count(), 5);
        assert_eq!(*sink.speaking.lock(), vec![true, false]);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn send_failure_is_reported() {
        let sink = RecordingSink::default();
        sink.fail_sends
            .store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(play_once(&sink, &marked_stream(&[1])).await.is_err());
    }
}
