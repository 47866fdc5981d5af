// src/net/link.rs
//! One ordered, bidirectional message channel per connection.
//!
//! A reader task decodes frames: acks resolve pending requests, events are
//! queued to the connection handler in arrival order. A writer task drains
//! outbound frames. Dropping the last `Link` aborts the reader and lets the
//! writer flush and close the socket.
use crate::errors::LinkError;
use crate::net::framing::Framer;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use station_protocol::Frame;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

const OUTBOUND_DEPTH: usize = 256;
const INBOUND_DEPTH: usize = 256;

/// Event received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub event: String,
    pub id: Option<u64>,
    pub data: Value,
}

/// `None` once the reader has stopped; no new request may register then.
type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Value>>>>>;

struct Inner {
    peer: String,
    framer: Framer,
    out: mpsc::Sender<Bytes>,
    pending: Pending,
    next_id: AtomicU64,
    reader: AbortHandle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[derive(Clone)]
pub struct Link {
    inner: Arc<Inner>,
}

impl Link {
    /// Split `io` into reader/writer tasks. The receiver yields inbound events
    /// and ends on disconnect.
    pub fn spawn<T>(io: T, peer: String) -> (Link, mpsc::Receiver<Inbound>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let framer = Framer;
        let (mut sink, mut stream) = Framed::new(io, framer.codec()).split();
        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(OUTBOUND_DEPTH);
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(INBOUND_DEPTH);
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));

        // writer
        {
            let peer = peer.clone();
            tokio::spawn(async move {
                while let Some(bytes) = out_rx.recv().await {
                    if let Err(e) = sink.send(bytes).await {
                        debug!(%peer, ?e, "write failed; closing writer");
                        break;
                    }
                }
                let _ = sink.close().await;
            });
        }

        // reader
        let reader = {
            let framer = framer.clone();
            let pending = pending.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                while let Some(next) = stream.next().await {
                    let body = match next {
                        Ok(b) => b,
                        Err(e) => {
                            debug!(%peer, ?e, "read failed");
                            break;
                        }
                    };
                    match framer.deframe(&body) {
                        Ok(Frame::Ack { ack, data }) => {
                            let waiter = pending.lock().as_mut().and_then(|m| m.remove(&ack));
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(data);
                                }
                                None => debug!(%peer, ack, "ack for unknown request"),
                            }
                        }
                        Ok(Frame::Event { event, id, data }) => {
                            if in_tx.send(Inbound { event, id, data }).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(%peer, %e, "undecodable frame; closing");
                            break;
                        }
                    }
                }
                // fail every outstanding request
                pending.lock().take();
            })
            .abort_handle()
        };

        let link = Link {
            inner: Arc::new(Inner {
                peer,
                framer,
                out: out_tx,
                pending,
                next_id: AtomicU64::new(1),
                reader,
            }),
        };
        (link, in_rx)
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Fire-and-forget event.
    pub async fn emit(&self, event: &str, data: Value) -> Result<(), LinkError> {
        self.send(Frame::event(event, data)).await
    }

    /// Event with acknowledgment; resolves with the ack payload.
    pub async fn request(&self, event: &str, data: Value) -> Result<Value, LinkError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            let Some(m) = pending.as_mut() else {
                return Err(LinkError::Closed);
            };
            m.insert(id, tx);
        }
        self.send(Frame::request(event, id, data)).await?;
        rx.await.map_err(|_| LinkError::Closed)
    }

    /// Acknowledge an inbound request.
    pub async fn reply(&self, id: u64, data: Value) -> Result<(), LinkError> {
        self.send(Frame::ack(id, data)).await
    }

    /// Encoding happens here so an oversized frame fails its sender only.
    async fn send(&self, frame: Frame) -> Result<(), LinkError> {
        let bytes = self.inner.framer.frame(&frame)?;
        self.inner.out.send(bytes).await.map_err(|_| LinkError::Closed)
    }
}
