//! Entry framing (magic + length + crc32c).

use std::io::Read;

use crc32c::crc32c;

use super::{JournalError, JournalResult};

const FRAME_MAGIC: u32 = 0x4343_4C31; // "CCL1"
pub(crate) const FRAME_HEADER_LEN: usize = 12;

/// Upper bound on one serialized entry; a change record carries a full
/// cluster configuration, so this is generous.
pub const MAX_ENTRY_BYTES: usize = 8 * 1024 * 1024;

/// One read step. `Torn` marks the offset where a partial or damaged tail
/// write begins; everything before it is intact.
#[derive(Debug)]
pub enum FrameRead {
    Entry(Vec<u8>),
    Eof,
    Torn { offset: u64 },
}

pub struct FrameReader<R> {
    reader: R,
    offset: u64,
    max_entry_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, max_entry_bytes: usize) -> Self {
        Self {
            reader,
            offset: 0,
            max_entry_bytes,
        }
    }

    /// Byte offset of the next unread frame.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_next(&mut self) -> JournalResult<FrameRead> {
        let frame_start = self.offset;
        let mut header = [0u8; FRAME_HEADER_LEN];
        match self.read_exact_or_eof(&mut header)? {
            ReadOutcome::Full => {}
            ReadOutcome::CleanEof => return Ok(FrameRead::Eof),
            ReadOutcome::Short => return Ok(FrameRead::Torn { offset: frame_start }),
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        // A bad magic, absurd length, or CRC mismatch on the frame being
        // read is indistinguishable from a torn final write; the caller
        // truncates here and stops.
        if magic != FRAME_MAGIC || length == 0 || length > self.max_entry_bytes {
            return Ok(FrameRead::Torn { offset: frame_start });
        }

        let mut body = vec![0u8; length];
        match self.read_exact_or_eof(&mut body)? {
            ReadOutcome::Full => {}
            ReadOutcome::CleanEof | ReadOutcome::Short => {
                return Ok(FrameRead::Torn { offset: frame_start })
            }
        }

        if crc32c(&body) != expected_crc {
            return Ok(FrameRead::Torn { offset: frame_start });
        }

        Ok(FrameRead::Entry(body))
    }

    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> JournalResult<ReadOutcome> {
        let mut read = 0usize;
        while read < buf.len() {
            let n = self.reader.read(&mut buf[read..]).map_err(|source| {
                JournalError::Io {
                    path: std::path::PathBuf::new(),
                    source,
                }
            })?;
            if n == 0 {
                return Ok(if read == 0 {
                    ReadOutcome::CleanEof
                } else {
                    ReadOutcome::Short
                });
            }
            read += n;
        }
        self.offset += buf.len() as u64;
        Ok(ReadOutcome::Full)
    }
}

enum ReadOutcome {
    Full,
    CleanEof,
    Short,
}

pub fn encode_frame(body: &[u8], max_entry_bytes: usize) -> JournalResult<Vec<u8>> {
    if body.is_empty() || body.len() > max_entry_bytes {
        return Err(JournalError::EntryTooLarge {
            max_bytes: max_entry_bytes,
            got_bytes: body.len(),
        });
    }
    let length = body.len() as u32;
    let crc = crc32c(body);

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrips() {
        let frame = encode_frame(b"hello", 1024).unwrap();
        let mut reader = FrameReader::new(Cursor::new(frame), 1024);
        match reader.read_next().unwrap() {
            FrameRead::Entry(body) => assert_eq!(body, b"hello"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(reader.read_next().unwrap(), FrameRead::Eof));
    }

    #[test]
    fn crc_mismatch_reads_as_torn() {
        let mut frame = encode_frame(b"payload", 1024).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let mut reader = FrameReader::new(Cursor::new(frame), 1024);
        assert!(matches!(
            reader.read_next().unwrap(),
            FrameRead::Torn { offset: 0 }
        ));
    }

    #[test]
    fn short_tail_reads_as_torn_with_offset() {
        let mut bytes = encode_frame(b"first", 1024).unwrap();
        let intact = bytes.len() as u64;
        let second = encode_frame(b"second", 1024).unwrap();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let mut reader = FrameReader::new(Cursor::new(bytes), 1024);
        assert!(matches!(reader.read_next().unwrap(), FrameRead::Entry(_)));
        match reader.read_next().unwrap() {
            FrameRead::Torn { offset } => assert_eq!(offset, intact),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn oversized_length_reads_as_torn() {
        let mut frame = encode_frame(b"x", 1024).unwrap();
        frame[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut reader = FrameReader::new(Cursor::new(frame), 1024);
        assert!(matches!(reader.read_next().unwrap(), FrameRead::Torn { .. }));
    }

    #[test]
    fn empty_entry_is_rejected_at_write() {
        assert!(matches!(
            encode_frame(b"", 1024),
            Err(JournalError::EntryTooLarge { .. })
        ));
    }
}
