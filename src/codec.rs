// Codec for the Lounge event stream.
// Each chunk is framed as: <byte length>\n<json array spanning one or more lines>\n
// The declared length counts every content line plus its newline.

use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::LoungeError;

/// One decoded chunk: the ordered event entries of a batch.
pub type EventBatch = Vec<Value>;

/// Line-oriented decoder for length-prefixed chunks.
///
/// Lines are fed without their trailing newline. The decoder alternates
/// between expecting a decimal length line and accumulating content lines
/// until exactly that many bytes (newlines included) have been consumed.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    state: ChunkState,
    buffer: String,
}

#[derive(Debug, Default)]
enum ChunkState {
    #[default]
    ReadingSize,
    ReadingContent {
        remaining: usize,
    },
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while part of a chunk has been read but not yet emitted.
    pub fn in_chunk(&self) -> bool {
        matches!(self.state, ChunkState::ReadingContent { .. })
    }

    /// Feed one line. Returns a batch once the current chunk is complete.
    pub fn push_line(&mut self, line: &str) -> Result<Option<EventBatch>, LoungeError> {
        match self.state {
            ChunkState::ReadingSize => {
                let size_str = line.trim();
                if size_str.is_empty() {
                    return Ok(None);
                }
                if !size_str.chars().all(|c| c.is_ascii_digit()) {
                    return Err(self.fail(format!("expected numeric size, got: {}", size_str)));
                }
                let expected = size_str
                    .parse::<usize>()
                    .map_err(|_| self.fail(format!("invalid size: {}", size_str)))?;
                if expected == 0 {
                    trace!("Skipping empty chunk");
                    return Ok(None);
                }
                self.buffer.clear();
                self.state = ChunkState::ReadingContent {
                    remaining: expected,
                };
                Ok(None)
            }
            ChunkState::ReadingContent { remaining } => {
                let consumed = line.len() + 1;
                if consumed > remaining {
                    return Err(self.fail(format!(
                        "line of {} bytes overruns chunk with {} bytes remaining",
                        consumed, remaining
                    )));
                }
                self.buffer.push_str(line);
                self.buffer.push('\n');

                let remaining = remaining - consumed;
                if remaining > 0 {
                    self.state = ChunkState::ReadingContent { remaining };
                    return Ok(None);
                }

                self.state = ChunkState::ReadingSize;
                let parsed: Value = serde_json::from_str(&self.buffer).map_err(|e| {
                    LoungeError::framing(format!("chunk is not valid JSON: {}", e))
                })?;
                self.buffer.clear();
                match parsed {
                    Value::Array(batch) => Ok(Some(batch)),
                    other => Err(LoungeError::framing(format!(
                        "chunk is not a JSON array: {}",
                        other
                    ))),
                }
            }
        }
    }

    /// Lazily decode batches from already split lines.
    pub fn batches<I, S>(lines: I) -> Batches<I::IntoIter>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Batches {
            lines: lines.into_iter(),
            decoder: ChunkDecoder::new(),
            failed: false,
        }
    }

    fn fail(&mut self, msg: String) -> LoungeError {
        self.state = ChunkState::ReadingSize;
        self.buffer.clear();
        LoungeError::ProtocolFraming(msg)
    }
}

/// Iterator returned by [`ChunkDecoder::batches`]. Stops after the first error.
pub struct Batches<I> {
    lines: I,
    decoder: ChunkDecoder,
    failed: bool,
}

impl<I, S> Iterator for Batches<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = Result<EventBatch, LoungeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        for line in self.lines.by_ref() {
            match self.decoder.push_line(line.as_ref()) {
                Ok(Some(batch)) => return Some(Ok(batch)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        if self.decoder.in_chunk() {
            warn!("Chunk stream ended in the middle of a chunk, dropping partial chunk");
        }
        None
    }
}

/// Frame a batch the way the server does.
pub fn encode_batch(batch: &[Value]) -> Result<String, LoungeError> {
    let payload = serde_json::to_string(batch)?;
    Ok(format!("{}\n{}\n", payload.len() + 1, payload))
}

/// Byte-stream codec for the subscribe channel, built on [`ChunkDecoder`].
#[derive(Debug, Default)]
pub struct LoungeCodec {
    lines: ChunkDecoder,
}

impl LoungeCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LoungeCodec {
    type Item = EventBatch;
    type Error = LoungeError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Look for complete lines; a partial line stays buffered for the next read
        while let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(newline_pos + 1);
            let text = std::str::from_utf8(&line[..line.len() - 1])
                .map_err(|_| LoungeError::framing("invalid UTF-8 in event stream"))?;
            if let Some(batch) = self.lines.push_line(text)? {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(batch) = self.decode(buf)? {
            return Ok(Some(batch));
        }
        if !buf.is_empty() || self.lines.in_chunk() {
            warn!(
                buffered = buf.len(),
                "Event stream closed with a truncated chunk, treating as end of stream"
            );
            buf.clear();
            self.lines = ChunkDecoder::new();
        }
        Ok(None)
    }
}

impl Encoder<EventBatch> for LoungeCodec {
    type Error = LoungeError;

    fn encode(&mut self, item: EventBatch, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let framed = encode_batch(&item)?;
        dst.reserve(framed.len());
        dst.put_slice(framed.as_bytes());
        Ok(())
    }
}
