//! Accepts client connections and spins up a [`Dispatcher`] for each one,
//! grounded on `examples/original_source/proxycore/pipe/communication.py`'s
//! `Server` and `pipe/aserver.py`'s `ServerThread`.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::dispatcher::Dispatcher;
use crate::flow::Flow;
use crate::reporting::MessageListener;

pub struct Server {
    config: ProxyConfig,
    flow: Arc<Flow>,
    listener: Option<Arc<dyn MessageListener>>,
}

impl Server {
    pub fn new(config: ProxyConfig, flow: Arc<Flow>, listener: Option<Arc<dyn MessageListener>>) -> Self {
        Server { config, flow, listener }
    }

    /// Binds the listen address and accepts connections until `shutdown`
    /// resolves (graceful) or accept itself fails (fatal). Each accepted
    /// connection gets its own `Dispatcher` task, matching the original's
    /// one-dispatcher-per-client model; there is deliberately no shared
    /// mutable state between them.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        tracing::info!(addr = %self.config.listen_addr, "listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    let dispatcher = Dispatcher::new(
                        self.flow.clone(),
                        self.config.outputs.clone(),
                        self.listener.clone(),
                    );
                    tokio::spawn(async move {
                        dispatcher.handle_client(stream, addr).await;
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested; no longer accepting new connections");
                    return Ok(());
                }
            }
        }
    }
}
