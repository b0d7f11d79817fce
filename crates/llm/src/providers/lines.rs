//! Line-framed stream decoding shared by the HTTP providers.
//!
//! Ollama streams newline-delimited JSON and OpenAI-compatible servers stream
//! server-sent events. Both are line protocols whose lines may be split across
//! network frames, so bytes are buffered until a full line is available.

use crate::client::{LlmStream, LlmStreamChunk};
use futures::{Stream, StreamExt};
use hrdesk_core::{AppError, AppResult};
use std::collections::VecDeque;
use std::pin::Pin;

/// Longest partial line held while waiting for a newline (1MB).
pub(crate) const MAX_LINE_BYTES: usize = 1_048_576;

/// Result of decoding one line.
pub(crate) enum LineEvent {
    /// A chunk to emit
    Chunk(LlmStreamChunk),
    /// A line carrying nothing to emit (keep-alives, comments)
    Skip,
    /// A malformed line
    Invalid(String),
}

struct DecoderState<F> {
    inner: Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<AppResult<LlmStreamChunk>>,
    finished: bool,
    max_line: usize,
    decode: F,
}

impl<F> DecoderState<F>
where
    F: FnMut(&str) -> LineEvent,
{
    fn push_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() || self.finished {
            return;
        }

        match (self.decode)(text) {
            LineEvent::Chunk(chunk) => {
                // Nothing after the final chunk is read
                if chunk.done {
                    self.finished = true;
                }
                self.pending.push_back(Ok(chunk));
            }
            LineEvent::Skip => {}
            LineEvent::Invalid(message) => {
                self.finished = true;
                self.pending.push_back(Err(AppError::Llm(message)));
            }
        }
    }

    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }
}

/// Decode a byte stream into chunks, one decoded line at a time.
///
/// The resulting stream ends after the first chunk marked `done`, after the
/// first error, or when the byte stream ends.
pub(crate) fn decode_lines<S, B, E, F>(bytes: S, decode: F) -> LlmStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(&str) -> LineEvent + Send + 'static,
{
    decode_lines_capped(bytes, decode, MAX_LINE_BYTES)
}

/// [`decode_lines`] with an explicit cap on a single unterminated line.
fn decode_lines_capped<S, B, E, F>(bytes: S, decode: F, max_line: usize) -> LlmStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(&str) -> LineEvent + Send + 'static,
{
    let inner = bytes.map(|item| item.map(|b| b.as_ref().to_vec()).map_err(|e| e.to_string()));

    let state = DecoderState {
        inner: Box::pin(inner),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        max_line,
        decode,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    state.drain_complete_lines();
                    if !state.finished && state.buffer.len() > state.max_line {
                        state.finished = true;
                        state.buffer.clear();
                        state.pending.push_back(Err(AppError::Llm(format!(
                            "Stream line exceeds {} bytes without a newline",
                            state.max_line
                        ))));
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(AppError::Llm(format!("Stream error: {}", e))));
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.push_line(&rest);
                    state.finished = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_plain(line: &str) -> LineEvent {
        if line == "END" {
            return LineEvent::Chunk(LlmStreamChunk {
                content: String::new(),
                model: "t".to_string(),
                done: true,
                usage: None,
            });
        }
        if line.starts_with('#') {
            return LineEvent::Skip;
        }
        if line == "BAD" {
            return LineEvent::Invalid("bad line".to_string());
        }
        LineEvent::Chunk(LlmStreamChunk::partial(line, "t"))
    }

    async fn collect(frames: Vec<&'static str>) -> Vec<AppResult<LlmStreamChunk>> {
        let bytes = futures::stream::iter(
            frames
                .into_iter()
                .map(|f| Ok::<_, std::io::Error>(f.as_bytes().to_vec())),
        );
        decode_lines(bytes, decode_plain).collect().await
    }

    #[tokio::test]
    async fn test_lines_split_across_frames() {
        let items = collect(vec!["Hel", "lo\nwor", "ld\n"]).await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap().content).collect();
        assert_eq!(texts, vec!["Hello", "world"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let items = collect(vec!["a\nb"]).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap().content, "b");
    }

    #[tokio::test]
    async fn test_stops_after_done() {
        let items = collect(vec!["a\nEND\nafter\n"]).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_skips_and_invalid() {
        let items = collect(vec!["# keepalive\n\na\nBAD\nnever\n"]).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content, "a");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_unterminated_line_is_capped() {
        let bytes = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(b"ok\nxxxx".to_vec()),
            Ok(b"xxxx".to_vec()),
            Ok(b"xxxx\n".to_vec()),
        ]);
        let items: Vec<_> = decode_lines_capped(bytes, decode_plain, 6).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content, "ok");
        let err = items[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("exceeds 6 bytes"));
    }

    #[tokio::test]
    async fn test_multibyte_split() {
        // "é" is two bytes; split them across frames
        let bytes = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(vec![b'c', b'a', b'f', 0xC3]),
            Ok(vec![0xA9, b'\n']),
        ]);
        let items: Vec<_> = decode_lines(bytes, decode_plain).collect().await;
        assert_eq!(items[0].as_ref().unwrap().content, "café");
    }
}
