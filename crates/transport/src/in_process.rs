use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use dtail_protocol::error::DtailError;

use crate::connector::{BoxedIo, Connector};

/// Bounded buffer size for each in-process queue. Matches spec §5's
/// requirement for "bounded in-memory queues... to explicitly prevent the
/// classic bidirectional-copy deadlock".
pub const QUEUE_CAPACITY: usize = 64 * 1024;

/// Builds a connected pair of bounded duplex streams: one end for the
/// client handler, one for the server handler (spec §4.8's in-process
/// variant).
#[must_use]
pub fn in_process_pair() -> (BoxedIo, BoxedIo) {
    let (client_end, server_end) = tokio::io::duplex(QUEUE_CAPACITY);
    (Box::pin(client_end), Box::pin(server_end))
}

/// A [`Connector`] that, instead of dialing out, spawns a local server
/// handler task bound to one end of an in-process pipe and hands the other
/// end back to the caller. Used "when no servers are configured, to
/// preserve identical semantics for local execution" (spec §4.8).
pub struct InProcessConnector<F> {
    spawn_server: F,
}

impl<F> InProcessConnector<F>
where
    F: Fn(BoxedIo) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    /// `spawn_server` is invoked with the server-side end of a fresh pipe
    /// each time `connect` is called; it should drive one full session to
    /// completion (spec §4.6's server handler loop).
    #[must_use]
    pub fn new(spawn_server: F) -> Self {
        Self { spawn_server }
    }
}

impl<F> Connector for InProcessConnector<F>
where
    F: Fn(BoxedIo) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    fn connect(&self, _cancel: CancellationToken) -> BoxFuture<'_, Result<BoxedIo, DtailError>> {
        Box::pin(async move {
            let (client_io, server_io) = in_process_pair();
            tokio::spawn((self.spawn_server)(server_io));
            Ok(client_io)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn in_process_pair_bridges_both_directions() {
        let (mut client, mut server) = in_process_pair();
        client.write_all(b"hello server").await.unwrap();
        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello server");

        server.write_all(b"hello client").await.unwrap();
        let mut buf2 = [0u8; 12];
        client.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"hello client");
    }

    #[tokio::test]
    async fn connector_spawns_server_and_returns_client_end() {
        let connector = InProcessConnector::new(|mut server_io: BoxedIo| {
            Box::pin(async move {
                use tokio::io::AsyncWriteExt;
                let _ = server_io.write_all(b"ready").await;
            }) as BoxFuture<'static, ()>
        });

        let mut client_io = connector.connect(CancellationToken::new()).await.unwrap();
        let mut buf = [0u8; 5];
        use tokio::io::AsyncReadExt;
        client_io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ready");
    }
}
