//! Proxy configuration, grounded on
//! `examples/original_source/proxycore/pipe/endpoint.py`'s
//! `EndpointParameters`/`InputEndpointParameters` and `pipe/aserver.py`'s
//! `ServerParameters`.

use std::net::SocketAddr;

use crate::endpoint::OutputEndpointParameters;

/// The two addresses a `relay-proxy` instance is configured with: where to
/// listen, and where to forward. `outputs` is a list rather than a single
/// address so a custom flow can call out to more than one named upstream
/// (see `spec.md`'s chained-round-trip scenario); the CLI only ever
/// populates one, named `"remote"`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub outputs: Vec<OutputEndpointParameters>,
}

impl ProxyConfig {
    pub fn single_upstream(listen_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        ProxyConfig {
            listen_addr,
            outputs: vec![OutputEndpointParameters::new("remote", remote_addr)],
        }
    }
}
