//! The byte side of the stream tee.
//!
//! One producer (the pipeline driver) feeds two consumers: the caller's
//! byte stream and the in-driver accumulator. [`ByteSink`] is the caller
//! side: a bounded channel whose back-pressure throttles the provider
//! stream while the caller keeps up, and which detaches the moment the
//! caller cancels or drops the feed, leaving the accumulator to run to a
//! natural end.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Caller-facing stream of generated text bytes, in provider order.
#[derive(Debug)]
pub struct ByteFeed {
    rx: mpsc::Receiver<Bytes>,
}

impl Stream for ByteFeed {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Producer half held by the pipeline driver.
pub struct ByteSink {
    tx: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
}

impl ByteSink {
    /// Channel capacity for outbound bytes.
    const BUFFER: usize = 64;

    pub fn channel(cancel: CancellationToken) -> (ByteSink, ByteFeed) {
        let (tx, rx) = mpsc::channel(Self::BUFFER);
        (
            ByteSink {
                tx: Some(tx),
                cancel,
            },
            ByteFeed { rx },
        )
    }

    /// Forward one text delta. Detaches (and stops back-pressuring) once
    /// the caller cancelled or dropped the feed; never errors.
    pub async fn send_text(&mut self, text: &str) {
        let Some(tx) = self.tx.clone() else {
            return;
        };
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            self.tx = None;
            return;
        }
        let payload = Bytes::copy_from_slice(text.as_bytes());
        tokio::select! {
            _ = cancel.cancelled() => {
                self.tx = None;
            }
            sent = tx.send(payload) => {
                if sent.is_err() {
                    // Receiver dropped: caller went away mid-stream.
                    self.tx = None;
                }
            }
        }
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_none()
    }
}
