//! Channel server
//!
//! One listening socket. Accepting is single-shot like readiness watching:
//! [`ChannelServer::start_listening`] arms exactly one accept, and the
//! accept callback decides whether to call `start_listening` again. This is
//! what lets the control interface enforce its single-session policy without
//! the server knowing anything about sessions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use phantom_sched::{ExecutorHandle, TaskGroupId};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info, warn};

use crate::channel::DataChannel;
use crate::error::NetError;

/// Callback invoked for each accepted connection, on the execution context
pub type AcceptCallback = Box<dyn FnMut(DataChannel, Arc<ChannelServer>) + Send>;

/// One listening socket with explicit accept re-arming
pub struct ChannelServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    executor: ExecutorHandle,
    accept_group: TaskGroupId,
    on_accept: Arc<Mutex<Option<AcceptCallback>>>,
    armed: AtomicBool,
}

impl ChannelServer {
    /// Bind and listen on an address with an explicit backlog
    pub async fn bind(
        addr: SocketAddr,
        backlog: u32,
        executor: ExecutorHandle,
    ) -> Result<Arc<Self>, NetError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|source| NetError::Bind { addr, source })?;

        socket
            .set_reuseaddr(true)
            .map_err(|source| NetError::Bind { addr, source })?;
        socket
            .bind(addr)
            .map_err(|source| NetError::Bind { addr, source })?;
        let listener = socket
            .listen(backlog)
            .map_err(|source| NetError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(NetError::Io)?;

        let accept_group = executor.new_group();
        info!("listening on {}", local_addr);

        Ok(Arc::new(Self {
            listener,
            local_addr,
            executor,
            accept_group,
            on_accept: Arc::new(Mutex::new(None)),
            armed: AtomicBool::new(false),
        }))
    }

    /// Address actually bound (port 0 resolves to an ephemeral port)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Install the connection-accepted callback
    pub fn set_accept_callback(
        &self,
        callback: impl FnMut(DataChannel, Arc<ChannelServer>) + Send + 'static,
    ) {
        *self.on_accept.lock().unwrap() = Some(Box::new(callback));
    }

    /// Arm one accept; a no-op if an accept is already armed
    ///
    /// The accepted channel and a reference to this server are handed to
    /// the accept callback on the execution context. Accepting does not
    /// re-arm by itself.
    pub fn start_listening(self: &Arc<Self>) {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.accept_one().await;
        });
    }

    async fn accept_one(self: Arc<Self>) {
        match self.listener.accept().await {
            Ok((stream, peer)) => {
                debug!("accepted connection from {} on {}", peer, self.local_addr);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("failed to set nodelay for {}: {}", peer, e);
                }
                let channel = match DataChannel::from_stream(stream) {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!("dropping connection from {}: {}", peer, e);
                        self.armed.store(false, Ordering::SeqCst);
                        self.start_listening();
                        return;
                    }
                };

                self.armed.store(false, Ordering::SeqCst);
                let server = Arc::clone(&self);
                let on_accept = self.on_accept.clone();
                let result = self.executor.execute(self.accept_group, move || {
                    if let Some(callback) = on_accept.lock().unwrap().as_mut() {
                        callback(channel, server);
                    } else {
                        warn!("accepted connection with no accept callback installed");
                    }
                });
                if result.is_err() {
                    debug!("dropping accepted connection: executor shut down");
                }
            }
            Err(e) => {
                warn!("accept failed on {}: {}", self.local_addr, e);
                self.armed.store(false, Ordering::SeqCst);
            }
        }
    }
}
