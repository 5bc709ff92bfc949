//! Length-prefixed Opus frame buffers.
//!
//! Layout: `[u16 little-endian length][length bytes]`, repeated. A zero length
//! or a length running past the end of the buffer ends the stream; trailing
//! padding is tolerated rather than reported.

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{audio::constants::FRAME_DURATION_MS, common::errors::FrameError};

const LENGTH_PREFIX: usize = 2;

/// Reads the frame starting at `offset`. Returns the frame and the offset of
/// the next prefix, or `None` at end of stream.
pub fn read_frame(buf: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let header = buf.get(offset..offset.checked_add(LENGTH_PREFIX)?)?;
    let len = LittleEndian::read_u16(header) as usize;
    if len == 0 {
        return None;
    }

    let start = offset + LENGTH_PREFIX;
    let end = start + len;
    let frame = buf.get(start..end)?;
    Some((frame, end))
}

/// Immutable, cheaply cloneable sequence of encoded frames. Always holds at
/// least one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrameStream {
    data: Bytes,
    frames: usize,
}

impl AudioFrameStream {
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self, FrameError> {
        let data = data.into();
        let frames = FrameIter::new(&data).count();
        if frames == 0 {
            return Err(FrameError::Empty);
        }
        Ok(Self { data, frames })
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.frames as u64 * FRAME_DURATION_MS)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn frames(&self) -> FrameIter<'_> {
        FrameIter::new(&self.data)
    }

    pub fn frame_at(&self, offset: usize) -> Option<(&[u8], usize)> {
        read_frame(&self.data, offset)
    }
}

pub struct FrameIter<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_frame(self.buf, self.offset) {
            Some((frame, next)) => {
                self.offset = next;
                Some(frame)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Appends length-prefixed frames and seals them into an [`AudioFrameStream`].
#[derive(Default)]
pub struct FrameWriter {
    buf: BytesMut,
    frames: usize,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: &[u8]) -> Result<(), FrameError> {
        if frame.is_empty() || frame.len() > u16::MAX as usize {
            return Err(FrameError::InvalidFrameLength(frame.len()));
        }
        self.buf.reserve(LENGTH_PREFIX + frame.len());
        self.buf.put_u16_le(frame.len() as u16);
        self.buf.extend_from_slice(frame);
        self.frames += 1;
        Ok(())
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn finish(self) -> Result<AudioFrameStream, FrameError> {
        if self.frames == 0 {
            return Err(FrameError::Empty);
        }
        Ok(AudioFrameStream {
            data: self.buf.freeze(),
            frames: self.frames,
        })
    }
}

/// Position in a looping track list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub track: usize,
    pub offset: usize,
}

impl PlaybackCursor {
    /// Advances to the next frame, moving on to the next track (and back to the
    /// first after the last) when the current one is exhausted. Returns `None`
    /// only if no track in the list yields a frame.
    pub fn next_frame<'a>(&mut self, tracks: &'a [AudioFrameStream]) -> Option<&'a [u8]> {
        if tracks.is_empty() {
            return None;
        }

        for _ in 0..=tracks.len() {
            if self.track >= tracks.len() {
                self.track = 0;
                self.offset = 0;
            }
            if let Some((frame, next)) = tracks[self.track].frame_at(self.offset) {
                self.offset = next;
                return Some(frame);
            }
            self.track = (self.track + 1) % tracks.len();
            self.offset = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(frames: &[&[u8]]) -> AudioFrameStream {
        let mut writer = FrameWriter::new();
        for f in frames {
            writer.push(f).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn reads_back_frames_in_order() {
        let frames: Vec<Vec<u8>> = (1..=40u8).map(|n| vec![n; n as usize * 3]).collect();
        let refs: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();
        let stream = stream_of(&refs);

        assert_eq!(stream.frame_count(), 40);
        assert_eq!(stream.duration(), Duration::from_millis(800));
        let read: Vec<&[u8]> = stream.frames().collect();
        assert_eq!(read, refs);
    }

    #[test]
    fn corrupt_prefix_terminates_reading() {
        let stream = stream_of(&[&[1, 2, 3], &[4, 5], &[6]]);
        let mut raw = stream.as_bytes().to_vec();
        // second prefix now claims far more bytes than remain
        raw[5] = 0xFF;
        raw[6] = 0x7F;

        let frames: Vec<&[u8]> = FrameIter::new(&raw).collect();
        assert_eq!(frames, vec![&[1u8, 2, 3][..]]);
    }

    #[test]
    fn zero_prefix_is_end_of_stream() {
        let mut raw = stream_of(&[&[9, 9]]).as_bytes().to_vec();
        raw.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        let stream = AudioFrameStream::from_bytes(raw).unwrap();
        assert_eq!(stream.frame_count(), 1);
    }

    #[test]
    fn truncated_header_does_not_panic() {
        assert!(read_frame(&[5], 0).is_none());
        assert!(read_frame(&[], 0).is_none());
        assert!(read_frame(&[1, 0, 7], 10).is_none());
    }

    #[test]
    fn stream_without_frames_is_rejected() {
        assert_eq!(AudioFrameStream::from_bytes(Vec::new()), Err(FrameError::Empty));
        assert_eq!(
            AudioFrameStream::from_bytes(vec![0u8, 0, 1, 2]),
            Err(FrameError::Empty)
        );
        assert_eq!(FrameWriter::new().finish(), Err(FrameError::Empty));
    }

    #[test]
    fn writer_rejects_unprefixable_frames() {
        let mut writer = FrameWriter::new();
        assert_eq!(writer.push(&[]), Err(FrameError::InvalidFrameLength(0)));
        let huge = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(
            writer.push(&huge),
            Err(FrameError::InvalidFrameLength(huge.len()))
        );
        assert_eq!(writer.frame_count(), 0);
    }

    #[test]
    fn cursor_loops_across_tracks() {
        let tracks = vec![stream_of(&[&[1], &[2]]), stream_of(&[&[3]])];
        let mut cursor = PlaybackCursor::default();

        let played: Vec<u8> = (0..7)
            .map(|_| cursor.next_frame(&tracks).unwrap()[0])
            .collect();
        assert_eq!(played, vec![1, 2, 3, 1, 2, 3, 1]);
        assert_eq!(cursor.track, 0);
    }

    #[test]
    fn cursor_recovers_from_out_of_range_track() {
        let tracks = vec![stream_of(&[&[7]])];
        let mut cursor = PlaybackCursor { track: 5, offset: 99 };
        assert_eq!(cursor.next_frame(&tracks), Some(&[7u8][..]));
        assert!(PlaybackCursor::default().next_frame(&[]).is_none());
    }
}
