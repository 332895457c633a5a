// LogScope - core/chunk.rs
//
// Fixed-size chunked reading with line reassembly.
// Core layer: accepts any `Read`, never opens files itself.
//
// A chunk rarely ends exactly on a newline. The bytes after the last
// newline of a chunk are carried forward and prefixed onto the next chunk,
// so every line reaches the parser exactly once and whole. The carry is
// kept as bytes so a multi-byte UTF-8 sequence split across two chunks is
// decoded only after it has been reassembled.

use crate::core::model::{FileChunk, FileId, RawLine};
use crate::util::constants;
use std::io::{self, Read};

/// Number of chunks a file of `size` bytes splits into.
pub fn total_chunks(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    size.div_ceil(chunk_size)
}

// =============================================================================
// ChunkReader
// =============================================================================

/// Iterator over sequential fixed-size chunks of a byte stream.
///
/// Every chunk except the last is exactly `chunk_size` bytes long; short
/// reads from the underlying reader are topped up before a chunk is yielded.
pub struct ChunkReader<R> {
    reader: R,
    file_id: FileId,
    chunk_size: usize,
    offset: u64,
    next_index: u64,
    done: bool,
}

impl<R: Read> ChunkReader<R> {
    /// A `chunk_size` of 0 is treated as 1.
    pub fn new(reader: R, file_id: FileId, chunk_size: usize) -> Self {
        Self {
            reader,
            file_id,
            chunk_size: chunk_size.max(1),
            offset: 0,
            next_index: 0,
            done: false,
        }
    }

    /// Bytes consumed from the underlying reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Read the next chunk, or `Ok(None)` at end of stream.
    pub fn next_chunk(&mut self) -> io::Result<Option<FileChunk>> {
        if self.done {
            return Ok(None);
        }

        let mut data = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.reader.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled < self.chunk_size {
            self.done = true;
        }
        if filled == 0 {
            return Ok(None);
        }
        data.truncate(filled);

        let start = self.offset;
        self.offset += filled as u64;
        let chunk = FileChunk {
            file_id: self.file_id,
            chunk_index: self.next_index,
            byte_range: start..self.offset,
            data,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = io::Result<FileChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

// =============================================================================
// LineAssembler
// =============================================================================

/// Reassembles complete lines from a sequence of chunks.
#[derive(Debug)]
pub struct LineAssembler {
    file_id: FileId,
    /// Bytes after the last newline of the previous chunk, capped at
    /// `max_line`.
    partial: Vec<u8>,
    /// Bytes of the current line dropped past `max_line`.
    overflow: u64,
    /// Line number the next emitted line will carry.
    next_line: u64,
    max_line: usize,
    expected_chunk: u64,
}

impl LineAssembler {
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            partial: Vec::new(),
            overflow: 0,
            next_line: 1,
            max_line: constants::MAX_PARTIAL_LINE_BYTES,
            expected_chunk: 0,
        }
    }

    /// Override the per-line byte cap. Bytes past the cap are dropped; the
    /// line is still emitted once, when its newline or EOF arrives.
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line.max(1);
        self
    }

    /// Number of lines emitted so far.
    pub fn lines_emitted(&self) -> u64 {
        self.next_line - 1
    }

    /// Split a chunk into complete lines, carrying the tail forward.
    pub fn push_chunk(&mut self, chunk: &FileChunk) -> Vec<RawLine> {
        debug_assert_eq!(
            chunk.chunk_index, self.expected_chunk,
            "chunks must arrive in order"
        );
        self.expected_chunk = chunk.chunk_index + 1;

        let mut lines = Vec::new();
        let mut rest: &[u8] = &chunk.data;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            self.carry(head);
            lines.push(self.take_line());
            rest = &tail[1..];
        }
        self.carry(rest);

        lines
    }

    /// Emit the final line if the stream did not end with a newline.
    pub fn finish(&mut self) -> Option<RawLine> {
        if self.partial.is_empty() && self.overflow == 0 {
            return None;
        }
        Some(self.take_line())
    }

    fn carry(&mut self, bytes: &[u8]) {
        let room = self.max_line.saturating_sub(self.partial.len());
        let kept = bytes.len().min(room);
        self.partial.extend_from_slice(&bytes[..kept]);
        self.overflow += (bytes.len() - kept) as u64;
    }

    fn take_line(&mut self) -> RawLine {
        if self.overflow > 0 {
            tracing::warn!(
                file_id = self.file_id,
                line = self.next_line,
                kept = self.partial.len(),
                dropped = self.overflow,
                "Line exceeds limit; truncated"
            );
            self.overflow = 0;
        }
        let joined = std::mem::take(&mut self.partial);
        self.make_line(&joined)
    }

    fn make_line(&mut self, bytes: &[u8]) -> RawLine {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        let line = RawLine {
            file_id: self.file_id,
            line_number: self.next_line,
            text: String::from_utf8_lossy(bytes).into_owned(),
        };
        self.next_line += 1;
        line
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Read a whole stream chunk by chunk, handing each chunk's complete lines
/// to `on_lines` together with the number of bytes consumed so far.
///
/// `on_lines` returns `false` to stop early (e.g. on cancellation); the
/// function then returns without flushing the trailing partial line.
/// Returns the total number of lines delivered.
pub fn read_lines<R, F>(
    reader: R,
    file_id: FileId,
    chunk_size: usize,
    mut on_lines: F,
) -> io::Result<u64>
where
    R: Read,
    F: FnMut(Vec<RawLine>, u64) -> bool,
{
    let mut chunks = ChunkReader::new(reader, file_id, chunk_size);
    let mut assembler = LineAssembler::new(file_id);

    while let Some(chunk) = chunks.next_chunk()? {
        let lines = assembler.push_chunk(&chunk);
        if !on_lines(lines, chunks.bytes_read()) {
            return Ok(assembler.lines_emitted());
        }
    }

    if let Some(last) = assembler.finish() {
        on_lines(vec![last], chunks.bytes_read());
    }
    Ok(assembler.lines_emitted())
}
