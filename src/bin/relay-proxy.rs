//! CLI entry point, grounded on
//! `examples/original_source/proxycore/pipe/aserver.py`'s `main`, with
//! argument parsing moved onto `clap` (as `dav-server-rs`'s examples and
//! `rusty-timer`'s services do) instead of hand-indexing `sys.argv`.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use relay_proxy::config::ProxyConfig;
use relay_proxy::default_flow;
use relay_proxy::server::Server;

/// An intercepting HTTP/1.1 reverse proxy with a programmable flow pipeline.
#[derive(Parser, Debug)]
#[command(name = "relay-proxy", version, about)]
struct Args {
    /// Address to accept client connections on, e.g. 127.0.0.1:8080
    listen_addr: SocketAddr,

    /// Upstream address to forward requests to, e.g. 127.0.0.1:9090
    remote_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ProxyConfig::single_upstream(args.listen_addr, args.remote_addr);

    let register_default = default_flow::register_flow(args.remote_addr);
    let flow = Arc::new(build_flow_with_default(register_default));

    let server = Server::new(config, flow, None);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match server.run(shutdown).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "server exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

fn build_flow_with_default(
    register_default: impl Fn(relay_proxy::flow::Flow) -> relay_proxy::flow::Flow,
) -> relay_proxy::flow::Flow {
    // `loader::build_flow` takes plain `fn` registrations so a compiled-in
    // recipe list can be a `const` array of function pointers; the bundled
    // default flow closes over the remote address instead, so it doesn't fit
    // that signature and is applied directly here.
    register_default(relay_proxy::flow::Flow::new())
}
