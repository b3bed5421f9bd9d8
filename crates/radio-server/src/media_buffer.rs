//! The broadcast buffer: every ingested track, concatenated as fixed-size blocks.

use std::fs::File;
use std::io::{self, Read};
use std::ops::Range;
use std::path::Path;

use crate::append_log::AppendLog;

/// Default transport block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 90_000;

/// Append-only sequence of byte blocks shared by every session.
///
/// One ingestion appends one contiguous run; only the final block of a run may be
/// shorter than `block_size`. Block indices are stable for the life of the process.
pub struct MediaBuffer {
    block_size: usize,
    blocks: AppendLog<Box<[u8]>>,
}

impl MediaBuffer {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            blocks: AppendLog::new(),
        }
    }

    /// Number of published blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, index: usize) -> Option<&[u8]> {
        self.blocks.get(index).map(|b| &b[..])
    }

    pub fn blocks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.blocks.iter().map(|b| &b[..])
    }

    pub fn total_bytes(&self) -> u64 {
        self.blocks().map(|b| b.len() as u64).sum()
    }

    /// Read `reader` to the end in `block_size` pieces and append them as one run.
    ///
    /// Nothing is published if the read fails part-way.
    pub fn append_reader(&self, mut reader: impl Read) -> io::Result<Range<usize>> {
        let mut pending = Vec::new();
        loop {
            let block = read_block(&mut reader, self.block_size)?;
            if block.is_empty() {
                break;
            }
            let short = block.len() < self.block_size;
            pending.push(block.into_boxed_slice());
            if short {
                break;
            }
        }
        Ok(self.blocks.extend(pending))
    }

    pub fn append_file(&self, path: &Path) -> io::Result<Range<usize>> {
        let file = File::open(path)?;
        self.append_reader(io::BufReader::new(file))
    }
}

/// Fill up to `size` bytes, stopping early only at EOF.
fn read_block(reader: &mut impl Read, size: usize) -> io::Result<Vec<u8>> {
    let mut block = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    block.truncate(filled);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.step).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn splits_input_into_ceil_blocks() {
        let buffer = MediaBuffer::new(4);
        let range = buffer.append_reader(Cursor::new(b"abcdefghij".to_vec())).unwrap();
        assert_eq!(range, 0..3);
        assert_eq!(buffer.block(0), Some(&b"abcd"[..]));
        assert_eq!(buffer.block(1), Some(&b"efgh"[..]));
        assert_eq!(buffer.block(2), Some(&b"ij"[..]));
        assert_eq!(buffer.total_bytes(), 10);
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_block() {
        let buffer = MediaBuffer::new(5);
        let range = buffer.append_reader(Cursor::new(vec![1u8; 10])).unwrap();
        assert_eq!(range, 0..2);
    }

    #[test]
    fn empty_input_appends_nothing() {
        let buffer = MediaBuffer::new(5);
        let range = buffer.append_reader(Cursor::new(Vec::new())).unwrap();
        assert!(range.is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn short_reads_still_fill_whole_blocks() {
        let buffer = MediaBuffer::new(8);
        let reader = Trickle {
            data: (0u8..20).collect(),
            pos: 0,
            step: 3,
        };
        buffer.append_reader(reader).unwrap();
        let lens: Vec<usize> = buffer.blocks().map(<[u8]>::len).collect();
        assert_eq!(lens, vec![8, 8, 4]);
    }

    #[test]
    fn runs_start_on_fresh_blocks() {
        let buffer = MediaBuffer::new(4);
        buffer.append_reader(Cursor::new(b"abcde".to_vec())).unwrap();
        let second = buffer.append_reader(Cursor::new(b"xyz".to_vec())).unwrap();
        assert_eq!(second, 2..3);
        assert_eq!(buffer.block(1), Some(&b"e"[..]));
        assert_eq!(buffer.block(2), Some(&b"xyz"[..]));
    }

    #[test]
    fn append_file_reports_missing_path() {
        let buffer = MediaBuffer::new(4);
        let missing = std::env::temp_dir().join("radio-server-missing-file.mp3");
        let err = buffer.append_file(&missing).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
