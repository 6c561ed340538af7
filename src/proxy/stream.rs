//! Streaming of backend response bodies to the client.
//!
//! Backend chunks are copied into a pooled buffer and released to the client
//! according to a [`FlushInterval`]. Buffers are returned to the
//! [`BufferPool`] when the response finishes or the client goes away, so
//! steady traffic reuses a bounded set of allocations.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::body::{Body, BodyDataStream, Bytes};
use bytes::BytesMut;
use futures_util::{stream, StreamExt};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::HeaderMap;
use tokio::time::{Instant, Interval, MissedTickBehavior};

const BUFFER_SIZE: usize = 32 * 1024;
const MAX_POOLED: usize = 256;

/// A bounded free list of copy buffers shared by every response.
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BUFFER_SIZE, MAX_POOLED)
    }
}

impl BufferPool {
    #[must_use]
    pub const fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            buffer_size,
            max_pooled,
        }
    }

    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn get(&self) -> BytesMut {
        let pooled = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let mut buf = pooled.unwrap_or_default();
        buf.reserve(self.buffer_size);
        buf
    }

    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }

    /// Number of idle buffers waiting for reuse.
    pub fn idle(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// When buffered response bytes are released to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushInterval {
    /// Every backend chunk is forwarded as soon as it arrives.
    Immediate,
    /// Bytes are held until the buffer fills or the body ends.
    OnFull,
    Periodic(Duration),
}

impl FlushInterval {
    /// Negative means immediate, zero means only on a full buffer.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        match u64::try_from(millis) {
            Err(_) => Self::Immediate,
            Ok(0) => Self::OnFull,
            Ok(ms) => Self::Periodic(Duration::from_millis(ms)),
        }
    }

    /// Streaming responses flush immediately whatever was configured.
    #[must_use]
    pub fn for_response(self, headers: &HeaderMap) -> Self {
        let event_stream = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"));
        if event_stream || !headers.contains_key(CONTENT_LENGTH) {
            Self::Immediate
        } else {
            self
        }
    }
}

/// Wrap a backend body so it is released to the client per `interval`.
pub fn relay_body(body: Body, interval: FlushInterval, pool: Arc<BufferPool>) -> Body {
    if interval == FlushInterval::Immediate {
        return body;
    }
    let flusher = Flusher::new(body.into_data_stream(), interval, pool);
    Body::from_stream(stream::unfold(flusher, Flusher::next_chunk))
}

enum Event {
    Data(Option<Result<Bytes, axum::Error>>),
    Tick,
}

struct Flusher {
    upstream: BodyDataStream,
    buf: Option<BytesMut>,
    pool: Arc<BufferPool>,
    ticker: Option<Interval>,
    done: bool,
}

impl Flusher {
    fn new(upstream: BodyDataStream, interval: FlushInterval, pool: Arc<BufferPool>) -> Self {
        let ticker = match interval {
            FlushInterval::Periodic(period) => {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            }
            FlushInterval::Immediate | FlushInterval::OnFull => None,
        };
        Self {
            upstream,
            buf: Some(pool.get()),
            pool,
            ticker,
            done: false,
        }
    }

    async fn next_chunk(mut self) -> Option<(Result<Bytes, axum::Error>, Self)> {
        while !self.done {
            let event = match self.ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    item = self.upstream.next() => Event::Data(item),
                    _ = ticker.tick() => Event::Tick,
                },
                None => Event::Data(self.upstream.next().await),
            };

            match event {
                Event::Data(Some(Ok(bytes))) => {
                    let full = self.push(&bytes);
                    if full {
                        return Some((Ok(self.take()), self));
                    }
                }
                Event::Data(Some(Err(e))) => {
                    self.done = true;
                    return Some((Err(e), self));
                }
                Event::Data(None) => {
                    self.done = true;
                    if self.pending() > 0 {
                        return Some((Ok(self.take()), self));
                    }
                }
                Event::Tick => {
                    if self.pending() > 0 {
                        return Some((Ok(self.take()), self));
                    }
                }
            }
        }
        None
    }

    /// Append a chunk; true once the buffer has reached its capacity.
    fn push(&mut self, bytes: &[u8]) -> bool {
        let limit = self.pool.buffer_size();
        self.buf.as_mut().is_some_and(|buf| {
            buf.extend_from_slice(bytes);
            buf.len() >= limit
        })
    }

    fn pending(&self) -> usize {
        self.buf.as_ref().map_or(0, BytesMut::len)
    }

    fn take(&mut self) -> Bytes {
        self.buf.as_mut().map_or_else(Bytes::new, |buf| {
            let chunk = Bytes::copy_from_slice(&buf[..]);
            buf.clear();
            chunk
        })
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
