//! A `Client` that turns session deliveries into an async stream.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{BaseMessage, Client};

/// One item delivered to a stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A message, live or from a catch-up batch.
    Message(BaseMessage),
    /// No data is available for this version.
    Gap(u64),
}

impl Delivery {
    /// Version this delivery accounts for.
    #[must_use]
    pub const fn version(&self) -> u64 {
        match self {
            Self::Message(msg) => msg.version,
            Self::Gap(version) => *version,
        }
    }
}

/// Client that forwards everything it receives into a channel.
#[derive(Debug, Clone)]
pub struct StreamClient {
    tx: mpsc::UnboundedSender<Delivery>,
    last_version: Arc<AtomicU64>,
}

impl StreamClient {
    /// Create a client and the stream that yields its deliveries.
    #[must_use]
    pub fn new() -> (Self, ClientStream) {
        Self::starting_at(0)
    }

    /// Create a client that will join at `start_version`.
    #[must_use]
    pub fn starting_at(start_version: u64) -> (Self, ClientStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let last_version = Arc::new(AtomicU64::new(start_version));
        let client = Self {
            tx,
            last_version: Arc::clone(&last_version),
        };
        let stream = ClientStream {
            inner: UnboundedReceiverStream::new(rx),
            last_version,
        };
        (client, stream)
    }

    /// Highest version delivered so far.
    #[must_use]
    pub fn last_version(&self) -> u64 {
        self.last_version.load(Ordering::Acquire)
    }

    fn forward(&self, delivery: Delivery) {
        self.last_version
            .fetch_max(delivery.version(), Ordering::AcqRel);
        if self.tx.send(delivery).is_err() {
            tracing::trace!("stream client receiver dropped");
        }
    }
}

impl Client for StreamClient {
    fn recv(&self, msg: &BaseMessage) {
        self.forward(Delivery::Message(msg.clone()));
    }

    fn recv_bulk(&self, first: u64, msgs: &[Option<BaseMessage>]) {
        for (version, slot) in (first..).zip(msgs) {
            self.forward(match slot {
                Some(msg) => Delivery::Message(msg.clone()),
                None => Delivery::Gap(version),
            });
        }
    }
}

/// Stream of deliveries for one `StreamClient`.
pub struct ClientStream {
    inner: UnboundedReceiverStream<Delivery>,
    last_version: Arc<AtomicU64>,
}

impl ClientStream {
    /// Highest version handed to the client so far.
    #[must_use]
    pub fn last_version(&self) -> u64 {
        self.last_version.load(Ordering::Acquire)
    }

    /// Take every delivery that is already queued.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let rx = self.inner.as_mut();
        let mut out = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            out.push(delivery);
        }
        out
    }
}

impl Stream for ClientStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
