use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use russh::server::{Auth, Handle, Handler, Msg, Server as RusshServer, Session};
use russh::{Channel, ChannelId};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use dtail_protocol::error::DtailError;

use crate::connector::BoxedIo;
use crate::in_process::QUEUE_CAPACITY;

/// Decides whether one SSH authentication attempt succeeds. Implemented by
/// the binary crate to wire `dtail-server`'s own `auth::accepts_public_key_user`
/// / `auth::accepts_special_user` in without this crate depending on
/// `dtail-config`/`dtail-server` (spec §4.6 step 1's "pluggable
/// authentication callback").
pub trait SshServerAuth: Send + Sync + 'static {
    /// Whether `user` may authenticate by public key alone (no signature
    /// verification beyond what `russh` itself performs).
    fn accepts_public_key(&self, user: &str) -> bool;

    /// Whether `user`/`password` match a configured special user, optionally
    /// constrained by the peer's address.
    fn accepts_password(&self, user: &str, password: &str, peer_addr: Option<SocketAddr>) -> bool;
}

/// Binds `bind_addr`, accepts SSH connections, authenticates them against
/// `authenticator`, and hands each successfully opened session channel's
/// bridged [`BoxedIo`] to `on_session` — which is expected to drive one
/// `dtail_server::ServerSession::run` to completion (spec §4.6, §4.8).
///
/// Mirrors the client-side [`crate::ssh::SshConnector`]'s channel-to-duplex
/// bridging almost exactly, just with the roles (and the direction data
/// flows in response to `Handler::data`) reversed.
pub async fn serve<A, F, Fut>(
    bind_addr: (String, u16),
    host_keys: Vec<KeyPair>,
    authenticator: Arc<A>,
    on_session: F,
) -> Result<(), DtailError>
where
    A: SshServerAuth,
    F: Fn(BoxedIo, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let config = Arc::new(russh::server::Config {
        keys: host_keys,
        ..Default::default()
    });
    let server = DtailSshServer {
        authenticator,
        on_session,
    };
    russh::server::run(config, bind_addr, server)
        .await
        .map_err(|e| DtailError::Transport(format!("ssh server error: {e}")))
}

struct DtailSshServer<A, F> {
    authenticator: Arc<A>,
    on_session: F,
}

impl<A, F, Fut> RusshServer for DtailSshServer<A, F>
where
    A: SshServerAuth,
    F: Fn(BoxedIo, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    type Handler = DtailSshHandler<A, F>;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        DtailSshHandler {
            authenticator: self.authenticator.clone(),
            on_session: self.on_session.clone(),
            peer_addr,
            user: String::new(),
            channels: HashMap::new(),
        }
    }
}

/// One accepted SSH connection. `channels` routes inbound `data()` callbacks
/// to the background pump task bridging that channel to its `ServerSession`.
struct DtailSshHandler<A, F> {
    authenticator: Arc<A>,
    on_session: F,
    peer_addr: Option<SocketAddr>,
    user: String,
    channels: HashMap<ChannelId, mpsc::UnboundedSender<Vec<u8>>>,
}

impl<A, F, Fut> Handler for DtailSshHandler<A, F>
where
    A: SshServerAuth,
    F: Fn(BoxedIo, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, _key: &PublicKey) -> Result<Auth, Self::Error> {
        self.user = user.to_string();
        if self.authenticator.accepts_public_key(user) {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.user = user.to_string();
        if self.authenticator.accepts_password(user, password, self.peer_addr) {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let channel_id = channel.id();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.channels.insert(channel_id, inbound_tx);

        let (app_end, bridge_end) = tokio::io::duplex(QUEUE_CAPACITY);
        let handle = session.handle();
        let user = self.user.clone();
        let on_session = self.on_session.clone();

        tokio::spawn(async move {
            tokio::spawn(pump_channel(channel_id, handle, bridge_end, inbound_rx));
            (on_session)(Box::pin(app_end), user).await;
        });

        Ok(true)
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(sender) = self.channels.get(&channel) {
            let _ = sender.send(data.to_vec());
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // dserver's own session loop speaks the same framed wire protocol
        // regardless of which command string the client execs (spec §4.8's
        // networked connector always runs `dserver --ssh-subsystem`).
        session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }
}

/// Bridges one SSH channel's data to/from the duplex half handed to
/// `ServerSession::run`: inbound SSH data arrives via `inbound_rx` (fed by
/// `Handler::data`), and anything the session writes into `bridge` goes back
/// out over the channel via the cloneable session [`Handle`].
async fn pump_channel(
    channel_id: ChannelId,
    handle: Handle,
    mut bridge: tokio::io::DuplexStream,
    mut inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut read_buf = vec![0u8; 32 * 1024];
    loop {
        tokio::select! {
            maybe_data = inbound_rx.recv() => {
                match maybe_data {
                    Some(data) => {
                        if bridge.write_all(&data).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            read = bridge.read(&mut read_buf) => {
                match read {
                    Ok(0) => {
                        let _ = handle.close(channel_id).await;
                        return;
                    }
                    Ok(n) => {
                        let data = russh::CryptoVec::from_slice(&read_buf[..n]);
                        if handle.data(channel_id, data).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        }
    }
}
