//! Endpoint parameters and connection helpers, grounded on
//! `examples/original_source/proxycore/pipe/endpoint.py`.
//!
//! Unlike the original, where `Endpoint`/`InputEndpoint`/`OutputEndpoint` own
//! the socket and its read loop directly, the actual socket plumbing here
//! lives in [`crate::dispatcher::Dispatcher`] — the natural place for it once
//! ownership of split read/write halves has to cross task boundaries. This
//! module keeps the parameter types and the one piece of standalone logic
//! worth naming on its own: dialing an upstream with a bounded timeout.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OutputEndpointParameters {
    pub name: String,
    pub remote_addr: SocketAddr,
    pub connect_timeout: Duration,
}

impl OutputEndpointParameters {
    pub fn new(name: impl Into<String>, remote_addr: SocketAddr) -> Self {
        OutputEndpointParameters {
            name: name.into(),
            remote_addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Dials `addr`, failing with [`Error::ConnectTimeout`] or [`Error::Connect`]
/// rather than hanging forever, matching `OutputEndpoint.open_connection`'s
/// `asyncio.wait_for(..., timeout=5)`.
pub async fn connect_with_timeout(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(Error::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_elapsed) => Err(Error::ConnectTimeout {
            addr: addr.to_string(),
        }),
    }
}
