//! MPEG audio frame scanner.
//!
//! Walks the media buffer as one continuous byte stream (headers may straddle blocks),
//! resynchronizing one byte at a time until a valid frame header is found, then jumping
//! by the decoded frame length. ID3v2 tags are skipped wherever they appear, since every
//! ingested track may start with one. Only complete frames count toward duration.

use std::ops::Range;
use std::time::Duration;

use crate::media_buffer::MediaBuffer;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("target {target:?} is past the scanned duration {total:?}")]
    NotFound { target: Duration, total: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    I,
    II,
    III,
}

/// Decoded 4-byte frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
}

const BITRATES_V1_L1: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const BITRATES_V1_L2: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATES_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES_V1: [u32; 3] = [44_100, 48_000, 32_000];
const SAMPLE_RATES_V2: [u32; 3] = [22_050, 24_000, 16_000];
const SAMPLE_RATES_V25: [u32; 3] = [11_025, 12_000, 8_000];

const HEADER_LEN: usize = 4;
const ID3_HEADER_LEN: usize = 10;

impl FrameHeader {
    /// Decode a header, or `None` if the bytes are not a usable frame sync.
    ///
    /// Free-format and reserved bitrate/sample-rate/version/layer values are rejected.
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Option<Self> {
        if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (bytes[1] >> 3) & 0b11 {
            0b00 => MpegVersion::V25,
            0b10 => MpegVersion::V2,
            0b11 => MpegVersion::V1,
            _ => return None,
        };
        let layer = match (bytes[1] >> 1) & 0b11 {
            0b01 => Layer::III,
            0b10 => Layer::II,
            0b11 => Layer::I,
            _ => return None,
        };
        let bitrate_index = usize::from(bytes[2] >> 4);
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let table = match (version, layer) {
            (MpegVersion::V1, Layer::I) => &BITRATES_V1_L1,
            (MpegVersion::V1, Layer::II) => &BITRATES_V1_L2,
            (MpegVersion::V1, Layer::III) => &BITRATES_V1_L3,
            (_, Layer::I) => &BITRATES_V2_L1,
            (_, _) => &BITRATES_V2_L23,
        };
        let rate_index = usize::from((bytes[2] >> 2) & 0b11);
        let rates = match version {
            MpegVersion::V1 => &SAMPLE_RATES_V1,
            MpegVersion::V2 => &SAMPLE_RATES_V2,
            MpegVersion::V25 => &SAMPLE_RATES_V25,
        };
        let sample_rate = *rates.get(rate_index)?;
        Some(Self {
            version,
            layer,
            bitrate_kbps: table[bitrate_index],
            sample_rate,
            padding: (bytes[2] >> 1) & 1 == 1,
        })
    }

    /// PCM samples per channel carried by one frame.
    pub fn samples(&self) -> u32 {
        match (self.layer, self.version) {
            (Layer::I, _) => 384,
            (Layer::II, _) => 1152,
            (Layer::III, MpegVersion::V1) => 1152,
            (Layer::III, _) => 576,
        }
    }

    /// Encoded frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let bitrate = u64::from(self.bitrate_kbps) * 1000;
        let rate = u64::from(self.sample_rate);
        let len = match self.layer {
            Layer::I => (12 * bitrate / rate + u64::from(self.padding)) * 4,
            _ => u64::from(self.samples()) / 8 * bitrate / rate + u64::from(self.padding),
        };
        len as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(u64::from(self.samples()) * 1_000_000_000 / u64::from(self.sample_rate))
    }
}

/// A frame located in the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePosition {
    /// Block holding the first header byte.
    pub block: usize,
    /// Byte offset of the header within `block`.
    pub offset: usize,
    /// Playback time at which this frame starts.
    pub start: Duration,
    pub duration: Duration,
    pub header: FrameHeader,
}

impl FramePosition {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Byte position that walks across block boundaries.
#[derive(Clone, Copy)]
struct StreamCursor<'a> {
    buffer: &'a MediaBuffer,
    end: usize,
    block: usize,
    offset: usize,
}

impl<'a> StreamCursor<'a> {
    fn new(buffer: &'a MediaBuffer, blocks: Range<usize>) -> Self {
        let mut cursor = Self {
            buffer,
            end: blocks.end.min(buffer.len()),
            block: blocks.start,
            offset: 0,
        };
        cursor.normalize();
        cursor
    }

    fn current(&self) -> Option<&'a [u8]> {
        if self.block < self.end {
            self.buffer.block(self.block)
        } else {
            None
        }
    }

    /// Move off the end of exhausted blocks.
    fn normalize(&mut self) {
        while let Some(block) = self.current() {
            if self.offset < block.len() {
                break;
            }
            self.block += 1;
            self.offset = 0;
        }
    }

    fn peek<const N: usize>(&self) -> Option<[u8; N]> {
        let mut out = [0u8; N];
        let mut probe = *self;
        for byte in out.iter_mut() {
            let block = probe.current()?;
            *byte = block[probe.offset];
            probe.offset += 1;
            probe.normalize();
        }
        Some(out)
    }

    /// Skip `n` bytes. Returns `false` if the stream ends first.
    fn advance(&mut self, mut n: usize) -> bool {
        while n > 0 {
            let Some(block) = self.current() else {
                return false;
            };
            let available = block.len() - self.offset;
            if n < available {
                self.offset += n;
                n = 0;
            } else {
                n -= available;
                self.block += 1;
                self.offset = 0;
            }
        }
        self.normalize();
        true
    }
}

/// Iterator over the complete frames of a block range.
pub struct Frames<'a> {
    cursor: StreamCursor<'a>,
    elapsed: Duration,
}

impl Iterator for Frames<'_> {
    type Item = FramePosition;

    fn next(&mut self) -> Option<FramePosition> {
        loop {
            if let Some(tag_len) = self.cursor.peek::<ID3_HEADER_LEN>().and_then(id3_tag_len) {
                if !self.cursor.advance(tag_len) {
                    return None;
                }
                continue;
            }
            let bytes = self.cursor.peek::<HEADER_LEN>()?;
            let Some(header) = FrameHeader::parse(bytes) else {
                self.cursor.advance(1);
                continue;
            };
            let mut after = self.cursor;
            if !after.advance(header.frame_len()) {
                // Truncated trailing frame.
                return None;
            }
            let frame = FramePosition {
                block: self.cursor.block,
                offset: self.cursor.offset,
                start: self.elapsed,
                duration: header.duration(),
                header,
            };
            self.elapsed += frame.duration;
            self.cursor = after;
            return Some(frame);
        }
    }
}

/// Total tag length (header, body and optional footer) of an ID3v2 tag.
fn id3_tag_len(bytes: [u8; ID3_HEADER_LEN]) -> Option<usize> {
    if &bytes[..3] != b"ID3" || bytes[3] == 0xFF || bytes[4] == 0xFF {
        return None;
    }
    if bytes[6..].iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = bytes[6..]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(*b));
    let footer = if bytes[5] & 0x10 != 0 { ID3_HEADER_LEN } else { 0 };
    Some(ID3_HEADER_LEN + size + footer)
}

/// Frames of the whole buffer as published right now.
pub fn frames(buffer: &MediaBuffer) -> Frames<'_> {
    frames_in(buffer, 0..buffer.len())
}

/// Frames of a block range, timed from the start of that range.
pub fn frames_in(buffer: &MediaBuffer, blocks: Range<usize>) -> Frames<'_> {
    Frames {
        cursor: StreamCursor::new(buffer, blocks),
        elapsed: Duration::ZERO,
    }
}

/// Sum of all complete frame durations in the buffer.
pub fn total_duration(buffer: &MediaBuffer) -> Duration {
    frames(buffer).map(|f| f.duration).sum()
}

/// Duration of one ingested run of blocks.
pub fn range_duration(buffer: &MediaBuffer, blocks: Range<usize>) -> Duration {
    frames_in(buffer, blocks).map(|f| f.duration).sum()
}

/// Find the frame playing at `target`: the first frame whose end is at or past it.
pub fn locate(buffer: &MediaBuffer, target: Duration) -> Result<FramePosition, LocateError> {
    let mut total = Duration::ZERO;
    for frame in frames(buffer) {
        if frame.end() >= target {
            return Ok(frame);
        }
        total = frame.end();
    }
    Err(LocateError::NotFound { target, total })
}

#[cfg(test)]
pub(crate) mod test_frames {
    //! Synthetic MPEG-1 Layer III frames: 128 kbps, 48 kHz, 384 bytes, 24 ms each.

    use std::time::Duration;

    pub(crate) const FRAME_LEN: usize = 384;
    pub(crate) const FRAME_DURATION: Duration = Duration::from_millis(24);

    /// One frame whose payload bytes are all `fill`.
    pub(crate) fn frame(fill: u8) -> Vec<u8> {
        let mut out = vec![0xFF, 0xFB, 0x94, 0xC4];
        out.resize(FRAME_LEN, fill);
        out
    }

    pub(crate) fn stream(count: usize) -> Vec<u8> {
        (0..count).flat_map(|i| frame(i as u8 & 0x7F)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_frames::{FRAME_DURATION, FRAME_LEN, frame, stream};
    use super::*;
    use std::io::Cursor;

    fn buffer_with(block_size: usize, bytes: Vec<u8>) -> MediaBuffer {
        let buffer = MediaBuffer::new(block_size);
        buffer.append_reader(Cursor::new(bytes)).unwrap();
        buffer
    }

    #[test]
    fn parses_mpeg1_layer3_header() {
        let header = FrameHeader::parse([0xFF, 0xFB, 0x94, 0x00]).unwrap();
        assert_eq!(header.version, MpegVersion::V1);
        assert_eq!(header.layer, Layer::III);
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(header.frame_len(), FRAME_LEN);
        assert_eq!(header.duration(), FRAME_DURATION);
    }

    #[test]
    fn padding_adds_one_byte_for_layer3() {
        // 128 kbps, 44.1 kHz, padded.
        let header = FrameHeader::parse([0xFF, 0xFB, 0x92, 0x00]).unwrap();
        assert_eq!(header.sample_rate, 44_100);
        assert!(header.padding);
        assert_eq!(header.frame_len(), 418);
    }

    #[test]
    fn mpeg2_layer3_uses_half_size_frames() {
        // MPEG-2, Layer III, 64 kbps, 24 kHz.
        let header = FrameHeader::parse([0xFF, 0xF3, 0x84, 0x00]).unwrap();
        assert_eq!(header.version, MpegVersion::V2);
        assert_eq!(header.samples(), 576);
        assert_eq!(header.frame_len(), 192);
        assert_eq!(header.duration(), Duration::from_millis(24));
    }

    #[test]
    fn layer1_frame_len_counts_slots() {
        // MPEG-1, Layer I, 384 kbps, 48 kHz.
        let header = FrameHeader::parse([0xFF, 0xFF, 0xC4, 0x00]).unwrap();
        assert_eq!(header.layer, Layer::I);
        assert_eq!(header.frame_len(), 384);
        assert_eq!(header.duration(), Duration::from_millis(8));
    }

    #[test]
    fn rejects_reserved_and_free_format_headers() {
        assert!(FrameHeader::parse([0xFF, 0xEB, 0x94, 0x00]).is_none()); // reserved version
        assert!(FrameHeader::parse([0xFF, 0xF9, 0x94, 0x00]).is_none()); // reserved layer
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x04, 0x00]).is_none()); // free format
        assert!(FrameHeader::parse([0xFF, 0xFB, 0xF4, 0x00]).is_none()); // bad bitrate
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x9C, 0x00]).is_none()); // reserved rate
        assert!(FrameHeader::parse([0xFE, 0xFB, 0x94, 0x00]).is_none()); // no sync
    }

    #[test]
    fn total_is_sum_of_frame_durations() {
        let buffer = buffer_with(1000, stream(10));
        let frames: Vec<_> = frames(&buffer).collect();
        assert_eq!(frames.len(), 10);
        let summed: Duration = frames.iter().map(|f| f.duration).sum();
        assert_eq!(total_duration(&buffer), summed);
        assert_eq!(summed, FRAME_DURATION * 10);
    }

    #[test]
    fn headers_straddling_blocks_are_found() {
        // 386-byte blocks split frame 1's header across blocks 0 and 1.
        let buffer = buffer_with(386, stream(3));
        let frames: Vec<_> = frames(&buffer).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!((frames[1].block, frames[1].offset), (0, 384));
        assert_eq!((frames[2].block, frames[2].offset), (1, 382));

        let small = buffer_with(100, stream(3));
        let frames: Vec<_> = super::frames(&small).collect();
        assert_eq!((frames[1].block, frames[1].offset), (3, 84));
        assert_eq!((frames[2].block, frames[2].offset), (7, 68));
    }

    #[test]
    fn resyncs_past_garbage() {
        let mut bytes = vec![0x00, 0xFF, 0x12, 0xFF];
        bytes.extend(stream(2));
        let buffer = buffer_with(64, bytes);
        let frames: Vec<_> = frames(&buffer).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[0].block, frames[0].offset), (0, 4));
    }

    #[test]
    fn truncated_trailing_frame_is_ignored() {
        let mut bytes = stream(2);
        bytes.extend_from_slice(&frame(1)[..100]);
        let buffer = buffer_with(128, bytes);
        assert_eq!(total_duration(&buffer), FRAME_DURATION * 2);
    }

    #[test]
    fn skips_id3v2_tags_between_tracks() {
        let mut tag = b"ID3\x04\x00\x00".to_vec();
        tag.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]); // 128-byte body
        tag.extend(std::iter::repeat_n(0xFF, 128));
        let mut bytes = tag.clone();
        bytes.extend(stream(2));
        bytes.extend(tag);
        bytes.extend(stream(1));
        let buffer = buffer_with(256, bytes);
        assert_eq!(frames(&buffer).count(), 3);
    }

    #[test]
    fn locate_returns_frame_spanning_target() {
        let buffer = buffer_with(FRAME_LEN, stream(3));
        let at_zero = locate(&buffer, Duration::ZERO).unwrap();
        assert_eq!(at_zero.block, 0);

        let mid_second = locate(&buffer, FRAME_DURATION + FRAME_DURATION / 2).unwrap();
        assert_eq!(mid_second.block, 1);
        assert!(mid_second.end() >= FRAME_DURATION + FRAME_DURATION / 2);
        assert!(mid_second.start < FRAME_DURATION + FRAME_DURATION / 2);

        let boundary = locate(&buffer, FRAME_DURATION * 2).unwrap();
        assert_eq!(boundary.block, 1);

        let last = locate(&buffer, FRAME_DURATION * 3).unwrap();
        assert_eq!(last.block, 2);
    }

    #[test]
    fn mixed_frame_types_sum_and_locate() {
        let headers = [
            [0xFF, 0xFB, 0x92, 0x00], // MPEG-1 L3, 44.1 kHz, padded
            [0xFF, 0xFB, 0x94, 0xC4], // MPEG-1 L3, 48 kHz
            [0xFF, 0xF3, 0x84, 0x00], // MPEG-2 L3, 24 kHz
            [0xFF, 0xFB, 0x92, 0x00],
            [0xFF, 0xFF, 0xC4, 0x00], // MPEG-1 L1, 48 kHz
            [0xFF, 0xF3, 0x84, 0x00],
            [0xFF, 0xFB, 0x94, 0xC4],
            [0xFF, 0xFB, 0x92, 0x00],
        ];
        let mut bytes = Vec::new();
        let mut starts = Vec::new();
        let mut expected = Duration::ZERO;
        for raw in headers {
            let header = FrameHeader::parse(raw).unwrap();
            let start = bytes.len();
            starts.push(start);
            bytes.extend_from_slice(&raw);
            bytes.resize(start + header.frame_len(), 0);
            expected += header.duration();
        }
        let buffer = buffer_with(100, bytes);

        let found: Vec<_> = frames(&buffer).collect();
        assert_eq!(found.len(), headers.len());
        for (frame, start) in found.iter().zip(&starts) {
            assert_eq!(frame.block * 100 + frame.offset, *start);
        }
        let total = total_duration(&buffer);
        assert_eq!(total, expected);
        assert_eq!(total, found.iter().map(|f| f.duration).sum::<Duration>());

        let step = Duration::from_micros(500);
        let mut target = Duration::ZERO;
        while target <= total {
            let hit = locate(&buffer, target).unwrap();
            assert!(hit.end() >= target, "frame ends before {target:?}");
            if target > Duration::ZERO {
                assert!(hit.start < target, "earlier frame already reaches {target:?}");
            }
            assert!(found.contains(&hit));
            target += step;
        }
        assert!(locate(&buffer, total + step).is_err());
    }

    #[test]
    fn locate_past_end_is_not_found() {
        let buffer = buffer_with(FRAME_LEN, stream(3));
        let target = FRAME_DURATION * 3 + Duration::from_millis(1);
        assert_eq!(
            locate(&buffer, target),
            Err(LocateError::NotFound {
                target,
                total: FRAME_DURATION * 3,
            })
        );
        assert!(locate(&MediaBuffer::new(16), Duration::ZERO).is_err());
    }

    #[test]
    fn range_duration_times_one_run() {
        let buffer = MediaBuffer::new(FRAME_LEN);
        buffer.append_reader(Cursor::new(stream(2))).unwrap();
        let second = buffer.append_reader(Cursor::new(stream(5))).unwrap();
        assert_eq!(range_duration(&buffer, second), FRAME_DURATION * 5);
        assert_eq!(total_duration(&buffer), FRAME_DURATION * 7);
    }
}
