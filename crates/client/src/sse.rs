//! Incremental `text/event-stream` decoding.
//!
//! [`SseDecoder`] is a push parser over raw bytes. [`EventStream`] drives it
//! from a response body and is the lazy, pull-based sequence handed to
//! callers.

use erniebot_types::{ApiError, ByteStream, DONE_MARKER, ErnieError, ResponseHeaders, Result, StreamEvent};
use futures_util::{
    Stream, StreamExt as _,
    stream::{BoxStream, try_unfold},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use tokio_util::sync::CancellationToken;

/// One decoding step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(StreamEvent),
    /// `data: [DONE]` was received.
    Done,
}

#[derive(Debug, Default)]
struct Pending {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    /// Field lines seen since the last dispatch.
    lines: usize,
}

impl Pending {
    fn is_done_only(&self) -> bool {
        self.lines == 1 && self.data.as_deref() == Some(DONE_MARKER)
    }
}

/// Line-oriented SSE parser.
///
/// Bytes are buffered raw and split on `\n`, so a UTF-8 sequence split
/// across chunks is only decoded once its line is complete.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Start of the first unconsumed line in `buf`.
    pos: usize,
    /// Bytes from `pos` up to here are known to hold no `\n`.
    scanned: usize,
    pending: Pending,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.scanned -= self.pos;
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete item, or `None` when more bytes are needed.
    pub fn next_event(&mut self) -> Option<Decoded> {
        loop {
            let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                return None;
            };
            let nl = self.scanned + offset;
            let line = decode_line(&self.buf[self.pos..nl]);
            self.pos = nl + 1;
            self.scanned = self.pos;
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(decoded) = self.process_line(line) {
                return Some(decoded);
            }
        }
    }

    /// Checks the decoder state once the byte source is exhausted.
    ///
    /// A pending record holding nothing but `data: [DONE]` ends normally,
    /// terminated or not.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::StreamTruncation`] if a line or a record was
    /// cut off.
    pub fn finish(&mut self) -> Result<()> {
        let rest = std::mem::take(&mut self.buf);
        let rest = decode_line(&rest[self.pos..]);
        self.pos = 0;
        self.scanned = 0;
        let pending = std::mem::take(&mut self.pending);

        let rest = rest.trim_end_matches('\r');
        if !rest.is_empty() {
            if pending.lines == 0 && matches!(rest, "data: [DONE]" | "data:[DONE]") {
                return Ok(());
            }
            return Err(ErnieError::StreamTruncation(format!(
                "stream ended mid-line after {} bytes",
                rest.len()
            )));
        }

        if pending.lines == 0 || pending.is_done_only() {
            return Ok(());
        }
        Err(ErnieError::StreamTruncation(
            "stream ended before the blank line terminating an event".into(),
        ))
    }

    fn process_line(&mut self, line: &str) -> Option<Decoded> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        self.pending.lines += 1;
        match field {
            "data" => match &mut self.pending.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_string()),
            },
            "event" => self.pending.event = Some(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            "retry" => {
                if let Ok(retry) = value.parse() {
                    self.pending.retry = Some(retry);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Decoded> {
        let pending = std::mem::take(&mut self.pending);
        let data = pending.data?;
        if data == DONE_MARKER {
            return Some(Decoded::Done);
        }
        Some(Decoded::Event(StreamEvent {
            event: pending.event,
            data,
            id: pending.id,
            retry: pending.retry,
        }))
    }
}

/// Decodes one line, replacing invalid UTF-8 with U+FFFD.
fn decode_line(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(line) => line.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "invalid UTF-8 in event stream");
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

struct State {
    body: Option<ByteStream>,
    decoder: SseDecoder,
    cancel: CancellationToken,
}

/// A lazy, forward-only sequence of [`StreamEvent`]s.
///
/// The response body is dropped as soon as the sequence ends, fails, or is
/// cancelled.
pub struct EventStream {
    inner: BoxStream<'static, Result<StreamEvent>>,
    headers: ResponseHeaders,
}

impl EventStream {
    pub fn new(body: ByteStream, cancel: CancellationToken, headers: ResponseHeaders) -> Self {
        let state = State {
            body: Some(body),
            decoder: SseDecoder::new(),
            cancel,
        };
        let inner = try_unfold(state, |mut s| async move {
            loop {
                if s.body.is_none() {
                    return Ok(None);
                }
                if s.cancel.is_cancelled() {
                    s.body = None;
                    return Err(ErnieError::UserAbort);
                }
                match s.decoder.next_event() {
                    Some(Decoded::Event(event)) => return Ok(Some((event, s))),
                    Some(Decoded::Done) => {
                        s.body = None;
                        return Ok(None);
                    }
                    None => {}
                }

                let Some(body) = s.body.as_mut() else {
                    return Ok(None);
                };
                let next = tokio::select! {
                    biased;
                    () = s.cancel.cancelled() => None,
                    next = body.next() => Some(next),
                };
                match next {
                    None => {
                        s.body = None;
                        return Err(ErnieError::UserAbort);
                    }
                    Some(Some(Ok(chunk))) => s.decoder.feed(&chunk),
                    Some(Some(Err(e))) => {
                        s.body = None;
                        return Err(match e {
                            ErnieError::Connection(_) | ErnieError::ConnectionTimeout => e,
                            other => ErnieError::Connection(other.to_string()),
                        });
                    }
                    Some(None) => {
                        s.body = None;
                        return s.decoder.finish().map(|()| None);
                    }
                }
            }
        });
        Self {
            inner: inner.boxed(),
            headers,
        }
    }

    /// Headers of the streaming response.
    #[must_use]
    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    /// Decodes every event's data as JSON, checking it for a vendor error
    /// envelope first.
    pub fn json<T>(self) -> BoxStream<'static, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let headers = self.headers.clone();
        self.map(move |event| {
            let value: Value = event?.json()?;
            if let Some(err) = ApiError::from_envelope(&value, &headers) {
                return Err(err.into());
            }
            Ok(serde_json::from_value(value)?)
        })
        .boxed()
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
