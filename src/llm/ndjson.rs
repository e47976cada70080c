//! Newline-delimited JSON decoding for streamed replies.
//!
//! The server writes one JSON object per line, but network reads do not respect line
//! boundaries: a single read may hold several records, and one record may straddle two
//! reads. [`NdjsonStream`] keeps the unterminated tail of each read and prepends it to the
//! next one, so records are only parsed once their terminating newline has arrived.

use futures::{ ready, Stream, StreamExt };
use log::{ debug, warn };
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ Context, Poll };

/// Longest line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Lazy sequence of JSON objects decoded from a byte stream.
///
/// Lines that fail to parse are skipped, as are lines longer than the line limit. An
/// error from the underlying stream is yielded once and ends the sequence.
pub struct NdjsonStream<S> {
    inner: S,
    pending: Vec<u8>,
    /// Bytes of `pending` already known to hold no newline.
    scanned: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    max_line: usize,
    ready: VecDeque<Value>,
    finished: bool,
}

impl<S> NdjsonStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_max_line(inner, MAX_LINE_BYTES)
    }

    pub fn with_max_line(inner: S, max_line: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn drain_complete_lines(&mut self) {
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                push_line(&self.pending[start..end], &mut self.ready);
            }
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.pending.len() > self.max_line {
            warn!("Dropping stream line longer than {} bytes", self.max_line);
            self.pending.clear();
            self.scanned = 0;
            self.discarding = true;
        }
    }
}

fn push_line(line: &[u8], ready: &mut VecDeque<Value>) {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return;
    }
    match serde_json::from_slice::<Value>(line) {
        Ok(value) => ready.push_back(value),
        Err(e) => {
            debug!(
                "Skipping malformed stream line ({}): {}",
                e,
                String::from_utf8_lossy(line)
            );
        }
    }
}

impl<S, B, E> Stream for NdjsonStream<S>
    where S: Stream<Item = Result<B, E>> + Unpin, B: AsRef<[u8]>
{
    type Item = Result<Value, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(value) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    this.pending.extend_from_slice(chunk.as_ref());
                    this.drain_complete_lines();
                }
                Some(Err(e)) => {
                    this.finished = true;
                    this.pending.clear();
                    this.ready.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.finished = true;
                    let rest = std::mem::take(&mut this.pending);
                    if !this.discarding {
                        push_line(&rest, &mut this.ready);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    async fn decode(chunks: Vec<&'static str>) -> Vec<Value> {
        let source = stream::iter(chunks.into_iter().map(|c| Ok::<_, ()>(c.as_bytes())));
        NdjsonStream::new(source)
            .map(|item| item.unwrap())
            .collect().await
    }

    #[tokio::test]
    async fn splits_records_within_one_read() {
        let values = decode(vec!["{\"a\":1}\n{\"a\":2}\n\n{\"a\":3}\n"]).await;
        assert_eq!(values, vec![json!({"a":1}), json!({"a":2}), json!({"a":3})]);
    }

    #[tokio::test]
    async fn keeps_record_split_across_reads() {
        let values = decode(
            vec!["{\"message\":{\"con", "tent\":\"He\"}}\n{\"message\"", ":{\"content\":\"llo\"}}\n"]
        ).await;
        assert_eq!(
            values,
            vec![json!({"message":{"content":"He"}}), json!({"message":{"content":"llo"}})]
        );
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let values = decode(vec!["{\"n\":1}\n{not json\n{\"n\":2}\n"]).await;
        assert_eq!(values, vec![json!({"n":1}), json!({"n":2})]);
    }

    #[tokio::test]
    async fn accepts_crlf_and_unterminated_last_line() {
        let values = decode(vec!["{\"n\":1}\r\n", "{\"n\":2}"]).await;
        assert_eq!(values, vec![json!({"n":1}), json!({"n":2})]);
    }

    #[tokio::test]
    async fn reassembles_multibyte_characters_split_across_reads() {
        let bytes = "{\"response\":\"żółw\"}\n".as_bytes();
        let (head, tail) = bytes.split_at(14);
        assert!(std::str::from_utf8(head).is_err());

        let source = stream::iter(vec![Ok::<_, ()>(head.to_vec()), Ok(tail.to_vec())]);
        let values: Vec<Value> = NdjsonStream::new(source)
            .map(|item| item.unwrap())
            .collect().await;
        assert_eq!(values, vec![json!({"response":"żółw"})]);
    }

    #[tokio::test]
    async fn long_line_in_small_reads() {
        let text = "x".repeat(50_000);
        let line = format!("{}\n", json!({ "response": text }));
        let chunks: Vec<Result<Vec<u8>, ()>> = line
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();

        let values: Vec<Value> = NdjsonStream::new(stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect().await;
        assert_eq!(values, vec![json!({ "response": text })]);
    }

    #[tokio::test]
    async fn oversized_line_is_dropped_and_decoding_resumes() {
        let source = stream::iter(
            vec![
                Ok::<_, ()>(b"{\"n\":1}\n{\"big\":\"".to_vec()),
                Ok(b"aaaaaaaaaaaaaaaaaaaaaaaa".to_vec()),
                Ok(b"aaaa\"}\n{\"n\":2}\n{\"tail\":\"".to_vec()),
                Ok(b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_vec())
            ]
        );
        let values: Vec<Value> = NdjsonStream::with_max_line(source, 16)
            .map(|item| item.unwrap())
            .collect().await;
        assert_eq!(values, vec![json!({"n":1}), json!({"n":2})]);
    }

    #[tokio::test]
    async fn stream_error_is_yielded_once_and_ends_sequence() {
        let source = stream::iter(
            vec![Ok(b"{\"n\":1}\n{\"n\"".to_vec()), Err("reset"), Ok(b":2}\n".to_vec())]
        );
        let items: Vec<Result<Value, &str>> = NdjsonStream::new(source).collect().await;
        assert_eq!(items, vec![Ok(json!({"n":1})), Err("reset")]);
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        assert!(decode(vec![]).await.is_empty());
        assert!(decode(vec!["\n\n  \n"]).await.is_empty());
    }
}
