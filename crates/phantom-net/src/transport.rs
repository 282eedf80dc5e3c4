//! Transport binder
//!
//! Thin setup helper the orchestrator uses once per logical interface: bind
//! a listening endpoint, install the connection handler, arm the first
//! accept. Setup failure is returned to the caller; the orchestrator
//! decides which interfaces are essential and which are best-effort. There
//! is no silent retry.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use phantom_sched::ExecutorHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::DataChannel;
use crate::error::NetError;
use crate::server::ChannelServer;

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_backlog() -> u32 {
    4
}

/// Configuration for one listening endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Address to bind; defaults to loopback
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Port to listen on; 0 picks an ephemeral port
    pub port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl EndpointConfig {
    /// Loopback endpoint on a fixed port with the default backlog
    pub fn loopback(port: u16) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port,
            backlog: default_backlog(),
        }
    }

    /// The socket address this endpoint binds
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Owns one channel server and wires it to a connection handler
pub struct Transport {
    server: Option<Arc<ChannelServer>>,
}

impl Transport {
    /// Create an unbound transport
    pub fn new() -> Self {
        Self { server: None }
    }

    /// Bind, install the handler, and arm the first accept
    ///
    /// Returns the bound address on success. On failure the transport stays
    /// unbound; the caller may retry explicitly with a new config.
    pub async fn set_up(
        &mut self,
        config: &EndpointConfig,
        executor: &ExecutorHandle,
        on_accept: impl FnMut(DataChannel, Arc<ChannelServer>) + Send + 'static,
    ) -> Result<SocketAddr, NetError> {
        let server =
            ChannelServer::bind(config.socket_addr(), config.backlog, executor.clone()).await?;
        server.set_accept_callback(on_accept);
        server.start_listening();

        let addr = server.local_addr();
        debug!("transport set up on {}", addr);
        self.server = Some(server);
        Ok(addr)
    }

    /// The bound address, if set up
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr())
    }

    /// The underlying server, if set up
    pub fn server(&self) -> Option<&Arc<ChannelServer>> {
        self.server.as_ref()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
