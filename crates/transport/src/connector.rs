use std::pin::Pin;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use dtail_protocol::error::DtailError;

/// Blanket trait tying [`AsyncRead`] and [`AsyncWrite`] together into a
/// single object-safe duplex stream, so [`Connector::connect`] can return one
/// concrete boxed type regardless of which variant produced it.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncDuplex for T {}

/// A boxed, type-erased bidirectional byte stream (spec §1: "an
/// authenticated, bidirectional, byte-stream channel per (client, server)
/// pair").
pub type BoxedIo = Pin<Box<dyn AsyncDuplex>>;

/// Binds one transport channel to a handler pair (component C8). Both the
/// networked SSH variant and the in-process variant implement this with an
/// identical interface, so the client supervisor does not need to know
/// which one it is driving.
pub trait Connector: Send + Sync {
    /// Establishes the channel, returning a duplex stream the caller can
    /// frame commands/records over. `cancel` must be honored promptly if
    /// connecting takes a while (spec §5: "All suspending operations must
    /// also select on parent cancellation").
    fn connect(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<BoxedIo, DtailError>>;
}

/// Wraps any [`Connector`] with the fixed-backoff retry policy described for
/// long-lived client modes (spec §4.8): on failure, wait `backoff`, then try
/// again, aborting immediately if `cancel` fires first.
pub struct RetryingConnector<C> {
    inner: C,
    backoff: Duration,
    max_attempts: Option<u32>,
}

impl<C: Connector> RetryingConnector<C> {
    /// Wraps `inner`, retrying indefinitely with `backoff` between attempts.
    #[must_use]
    pub fn new(inner: C, backoff: Duration) -> Self {
        Self {
            inner,
            backoff,
            max_attempts: None,
        }
    }

    /// Bounds the number of attempts (used by one-shot modes like `dcat`).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl<C: Connector> Connector for RetryingConnector<C> {
    fn connect(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<BoxedIo, DtailError>> {
        Box::pin(async move {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(DtailError::Transport("connect cancelled".to_string()));
                    }
                    result = self.inner.connect(cancel.clone()) => {
                        match result {
                            Ok(io) => return Ok(io),
                            Err(err) => {
                                if self.max_attempts.is_some_and(|max| attempt >= max) {
                                    return Err(err);
                                }
                                tracing::warn!(attempt, error = %err, "connect failed, retrying after backoff");
                            }
                        }
                    }
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(DtailError::Transport("connect cancelled".to_string()));
                    }
                    () = tokio::time::sleep(self.backoff) => {}
                }
            }
        })
    }
}
