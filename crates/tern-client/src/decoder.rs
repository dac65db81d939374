//! Incremental SSE frame decoder
//!
//! Bytes arrive in arbitrary chunks. Incomplete lines are buffered as bytes
//! so a multi-byte character split across two chunks decodes correctly.
//! Only `data:` lines carry frames; comments, `event:`/`id:` fields and blank
//! separators are dropped. A line that grows past the pending-byte limit
//! without a terminator fails the stream.

use tern_ai::StreamFrame;

use crate::error::{Error, Result};

/// Default limit on bytes buffered for one unterminated line
pub const DEFAULT_MAX_PENDING: usize = 1024 * 1024;

#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_pending: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Feed one chunk, returning every frame completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamFrame>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if let Some(frame) = parse_line(&self.buf[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.buf.drain(..start);

        if self.buf.len() > self.max_pending {
            let pending = self.buf.len();
            self.buf = Vec::new();
            return Err(Error::Transport(format!(
                "unterminated line exceeds {} bytes ({} pending)",
                self.max_pending, pending
            )));
        }
        Ok(frames)
    }

    /// Flush a trailing line that was never terminated
    pub fn finish(&mut self) -> Option<StreamFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }

    /// Bytes waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn parse_line(line: &[u8]) -> Option<StreamFrame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(b"data:")?;
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_slice(payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(
                "skipping malformed frame ({}): {}",
                e,
                String::from_utf8_lossy(payload)
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ai::{Annotation, AnnotationKind, Span, UsageReport};

    fn sample_frames() -> Vec<StreamFrame> {
        vec![
            StreamFrame::ConversationCreated {
                handle: "conv_1".into(),
            },
            StreamFrame::text("Grüße, "),
            StreamFrame::text("ça va? 😀"),
            StreamFrame::Annotation(Annotation {
                kind: AnnotationKind::FileCitation,
                label: "handbook.pdf".into(),
                locator: "file-1".into(),
                span: Span::new(3, 9),
                quote: Some("Leave accrues monthly.".into()),
            }),
            StreamFrame::UsageReport(UsageReport {
                prompt_tokens: 12,
                completion_tokens: 4,
                total_tokens: 16,
                duration_ms: 840,
            }),
            StreamFrame::Done,
        ]
    }

    fn encode(frames: &[StreamFrame]) -> Vec<u8> {
        frames
            .iter()
            .map(|f| f.to_sse().unwrap())
            .collect::<String>()
            .into_bytes()
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<StreamFrame> {
        let mut decoder = FrameDecoder::new();
        let mut out: Vec<StreamFrame> = chunks
            .iter()
            .flat_map(|c| decoder.feed(c).unwrap())
            .collect();
        out.extend(decoder.finish());
        out
    }

    #[test]
    fn test_decode_whole_stream() {
        let frames = sample_frames();
        assert_eq!(decode_chunks(&[&encode(&frames)]), frames);
    }

    #[test]
    fn test_every_split_point_decodes_identically() {
        let frames = sample_frames();
        let bytes = encode(&frames);
        // Covers mid-line, mid-JSON and mid-UTF-8 splits
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_chunks(&[a, b]), frames, "split at byte {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let frames = sample_frames();
        let bytes = encode(&frames);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_chunks(&chunks), frames);
    }

    #[test]
    fn test_crlf_and_non_data_lines() {
        let input = b": keep-alive\r\n\r\nevent: message\r\ndata: {\"type\":\"chunk\",\"content\":\"hi\"}\r\n\r\ndata:{\"type\":\"done\"}\n\n";
        assert_eq!(
            decode_chunks(&[input]),
            vec![StreamFrame::text("hi"), StreamFrame::Done]
        );
    }

    #[test]
    fn test_malformed_json_is_skipped() {
        let input = b"data: {\"type\":\"chunk\",\"content\":\"a\"}\n\ndata: {not json}\n\ndata: {\"type\":\"mystery\"}\n\ndata: {\"type\":\"done\"}\n\n";
        assert_eq!(
            decode_chunks(&[input]),
            vec![StreamFrame::text("a"), StreamFrame::Done]
        );
    }

    #[test]
    fn test_unterminated_trailing_line_processed_at_finish() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"type\":\"done\"}").unwrap().is_empty());
        assert!(decoder.pending() > 0);
        assert_eq!(decoder.finish(), Some(StreamFrame::Done));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_runaway_line_fails_stream() {
        let mut decoder = FrameDecoder::new().with_max_pending(64);
        assert!(decoder.feed(b"data: {\"type\":\"chunk\",\"content\":\"").unwrap().is_empty());

        let err = decoder.feed(&[b'a'; 64]).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_long_terminated_line_within_limit() {
        let mut decoder = FrameDecoder::new().with_max_pending(64);
        // Frames completed in the same chunk never count against the limit
        let text = "x".repeat(200);
        let bytes = StreamFrame::text(text.clone()).to_sse().unwrap();
        assert_eq!(
            decoder.feed(bytes.as_bytes()).unwrap(),
            vec![StreamFrame::text(text)]
        );
    }
}
