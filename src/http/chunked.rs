//! Chunked transfer encoding support
//!
//! Incremental decoder (and an encoder used by tests and tools) for the
//! chunked coding of RFC 9112 Section 7.1. The decoder enforces hard
//! limits: a single chunk may not exceed 64 KiB, a body may not span more
//! than 1000 chunks, and the decoded total is capped by the configured
//! maximum body size.

use super::{Error, Result, CRLF, MAX_CHUNK_COUNT, MAX_CHUNK_SIZE};
use std::io::Write;

/// Chunked encoder
///
/// Writes data in chunked transfer coding to any `Write` sink.
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the final zero-sized chunk
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Chunked decoder with hard limits
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
    chunk_count: usize,
    total_decoded: usize,
    max_total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a decoder capping the decoded body at `max_total` octets
    pub fn new(max_total: usize) -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
            chunk_count: 0,
            total_decoded: 0,
            max_total,
        }
    }

    /// Decode from `input`, appending decoded octets to `output`.
    ///
    /// Returns the number of input bytes consumed and whether the body is
    /// complete. Call again with more input until complete.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool)> {
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf) = find_crlf(&input[pos..]) else {
                        // A size line longer than any sane hex count
                        if input.len() - pos > 18 {
                            return Err(Error::InvalidChunkSize("unterminated size line".into()));
                        }
                        break;
                    };
                    let line = std::str::from_utf8(&input[pos..pos + crlf])
                        .map_err(|_| Error::InvalidChunkSize("non-ASCII size line".into()))?;

                    // Extensions after ';' are ignored
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;

                    if size > MAX_CHUNK_SIZE {
                        return Err(Error::InvalidChunkSize(format!(
                            "chunk of {} bytes exceeds the {} byte limit",
                            size, MAX_CHUNK_SIZE
                        )));
                    }

                    self.chunk_count += 1;
                    if self.chunk_count > MAX_CHUNK_COUNT {
                        return Err(Error::Protocol(format!(
                            "body spans more than {} chunks",
                            MAX_CHUNK_COUNT
                        )));
                    }

                    pos += crlf + 2;
                    self.chunk_size = size;
                    self.chunk_read = 0;
                    self.state = if size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let remaining_in_chunk = self.chunk_size - self.chunk_read;
                    let available = input.len() - pos;
                    let to_copy = remaining_in_chunk.min(available);

                    if self.total_decoded + to_copy > self.max_total {
                        return Err(Error::BodyTooLarge);
                    }

                    output.extend_from_slice(&input[pos..pos + to_copy]);
                    pos += to_copy;
                    self.chunk_read += to_copy;
                    self.total_decoded += to_copy;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    } else {
                        break;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::Protocol("expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] == b"\r\n" {
                        pos += 2;
                        self.state = DecoderState::Complete;
                        return Ok((pos, true));
                    }
                    // Trailer headers are skipped line by line
                    let Some(crlf) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    pos += crlf + 2;
                }

                DecoderState::Complete => {
                    return Ok((pos, true));
                }
            }
        }

        Ok((pos, self.state == DecoderState::Complete))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

/// Find CRLF in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decode a complete chunked body held in memory
pub fn decode_chunked_body(input: &[u8], max_total: usize) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new(max_total);
    let mut output = Vec::new();

    let (_, complete) = decoder.decode(input, &mut output)?;
    if !complete {
        return Err(Error::Incomplete);
    }

    Ok(output)
}

/// Encode data as a chunked body, splitting at `chunk_size`
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut encoder = ChunkedEncoder::new(&mut output);

    for chunk in data.chunks(chunk_size) {
        encoder.write_chunk(chunk)?;
    }
    encoder.finish()?;

    Ok(output)
}
