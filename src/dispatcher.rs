//! Routes parsed messages between the client connection and whatever named
//! upstream endpoints a flow calls out to, grounded on
//! `examples/original_source/proxycore/pipe/communication.py`'s `Dispatcher`.
//!
//! One `Dispatcher` is created per accepted client connection (matching
//! `Server.handle_client` creating one `Dispatcher` per `(reader, writer)`
//! pair). Per Design Note §9, flows are real `async fn` trees rather than
//! generator-coroutines, so the "yield `(endpoint, message)`, get woken with
//! the response" suspend point becomes an ordinary channel round trip: a
//! [`FlowContext::call_endpoint`] call sends the outgoing message plus a
//! `oneshot::Sender` through [`DispatcherEvent::CallEndpoint`]; the matching
//! output endpoint's FIFO (`OutputHandle::pending`, mirroring
//! `OutputEndpoint.pending_processsings`) resolves that sender once its
//! response comes back, in strict arrival order.
//!
//! Final responses are written back to the client through a second, equally
//! strict FIFO (`InputWriter`) so that client-visible response order always
//! matches request arrival order on that connection, regardless of how the
//! tasks processing concurrent exchanges happen to be scheduled.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::endpoint::{connect_with_timeout, OutputEndpointParameters};
use crate::flow::Flow;
use crate::message::{HttpRequest, HttpResponse};
use crate::processing;
use crate::proto::parse::{RequestParser, ResponseParser};
use crate::reporting::{LogReport, MessageListener, RequestResponse};

pub const LOCAL_ENDPOINT: &str = "local";

const READ_CHUNK: usize = 8192;

pub enum DispatcherEvent {
    InputReceived(HttpRequest),
    CallEndpoint {
        guid: Uuid,
        endpoint: String,
        request: HttpRequest,
        respond_to: oneshot::Sender<HttpResponse>,
    },
    OutputReceived {
        endpoint: String,
        response: HttpResponse,
    },
    Finished {
        guid: Uuid,
        response: HttpResponse,
    },
    EndpointClosed(String),
}

/// Handed to every flow invocation; the flow's only way to reach another
/// endpoint. Cloneable and `'static` so it can be moved into a spawned task.
#[derive(Clone)]
pub struct FlowContext {
    guid: Uuid,
    events_tx: mpsc::UnboundedSender<DispatcherEvent>,
}

impl FlowContext {
    pub fn new(guid: Uuid, events_tx: mpsc::UnboundedSender<DispatcherEvent>) -> Self {
        FlowContext { guid, events_tx }
    }

    /// Sends `request` to the named endpoint and waits for its response.
    /// Never fails outright: a broken or unknown endpoint resolves to a
    /// synthesized `500`, the same externally observable shape as any other
    /// flow-level failure (§7).
    pub async fn call_endpoint(&self, name: &str, request: HttpRequest) -> HttpResponse {
        let (respond_to, rx) = oneshot::channel();
        let sent = self.events_tx.send(DispatcherEvent::CallEndpoint {
            guid: self.guid,
            endpoint: name.to_string(),
            request,
            respond_to,
        });
        if sent.is_err() {
            return processing::canceled_response("dispatcher is shutting down");
        }
        rx.await
            .unwrap_or_else(|_| processing::canceled_response(&format!("endpoint \"{name}\" is unavailable")))
    }
}

struct OutputHandle {
    write_half: OwnedWriteHalf,
    pending: VecDeque<(Uuid, oneshot::Sender<HttpResponse>)>,
}

/// One accepted client connection's worth of routing state.
pub struct Dispatcher {
    flow: Arc<Flow>,
    outputs_config: Vec<OutputEndpointParameters>,
    listener: Option<Arc<dyn MessageListener>>,
}

impl Dispatcher {
    pub fn new(
        flow: Arc<Flow>,
        outputs_config: Vec<OutputEndpointParameters>,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> Self {
        Dispatcher {
            flow,
            outputs_config,
            listener,
        }
    }

    /// Opens every configured upstream, then routes traffic until the client
    /// disconnects or every upstream is gone. Mirrors
    /// `Dispatcher.handle_client`/`Dispatcher.loop` collapsed into one task
    /// plus the per-endpoint reader/writer tasks it spawns.
    pub async fn handle_client(self, client_stream: TcpStream, client_addr: SocketAddr) {
        let mut upstreams = HashMap::new();
        for params in &self.outputs_config {
            match connect_with_timeout(params.remote_addr, params.connect_timeout).await {
                Ok(stream) => {
                    upstreams.insert(params.name.clone(), stream);
                }
                Err(error) => {
                    tracing::error!(
                        %client_addr,
                        endpoint = %params.name,
                        %error,
                        "failed to open upstream connection; closing client connection"
                    );
                    return;
                }
            }
        }

        tracing::info!(%client_addr, "client connection opened");

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<DispatcherEvent>();
        let (client_read, client_write) = client_stream.into_split();

        let mut outputs: HashMap<String, OutputHandle> = HashMap::new();
        for (name, stream) in upstreams {
            let (read_half, write_half) = stream.into_split();
            outputs.insert(
                name.clone(),
                OutputHandle {
                    write_half,
                    pending: VecDeque::new(),
                },
            );
            tokio::spawn(output_read_loop(name, read_half, events_tx.clone()));
        }

        tokio::spawn(input_read_loop(client_read, events_tx.clone()));

        let (final_queue_tx, final_queue_rx) = mpsc::unbounded_channel::<oneshot::Receiver<HttpResponse>>();
        tokio::spawn(input_writer_loop(client_write, final_queue_rx));

        let mut reports: HashMap<Uuid, LogReport> = HashMap::new();

        while let Some(event) = events_rx.recv().await {
            match event {
                DispatcherEvent::InputReceived(request) => {
                    let guid = Uuid::new_v4();
                    let mut report = LogReport::new(guid);
                    report.log_request(LOCAL_ENDPOINT, request.clone());
                    if let Some(listener) = &self.listener {
                        listener.on_change(&report);
                    }
                    reports.insert(guid, report);

                    let ctx = FlowContext::new(guid, events_tx.clone());
                    let flow = self.flow.clone();
                    let (final_tx, final_rx) = oneshot::channel();
                    let finished_tx = events_tx.clone();
                    tokio::spawn(async move {
                        let response = processing::execute(flow, ctx, request).await;
                        let _ = finished_tx.send(DispatcherEvent::Finished {
                            guid,
                            response: response.clone(),
                        });
                        let _ = final_tx.send(response);
                    });
                    if final_queue_tx.send(final_rx).is_err() {
                        break;
                    }
                }
                DispatcherEvent::CallEndpoint {
                    guid,
                    endpoint,
                    request,
                    respond_to,
                } => {
                    if let Some(report) = reports.get_mut(&guid) {
                        report.log_request(&endpoint, request.clone());
                        if let Some(listener) = &self.listener {
                            listener.on_change(report);
                        }
                    }
                    match outputs.get_mut(&endpoint) {
                        Some(handle) => {
                            let bytes = request.to_bytes();
                            if let Err(error) = handle.write_half.write_all(&bytes).await {
                                tracing::error!(%endpoint, %error, "failed to write to upstream");
                                // dropping respond_to resolves the caller's
                                // `call_endpoint` await to a synthesized 500
                            } else {
                                handle.pending.push_back((guid, respond_to));
                            }
                        }
                        None => {
                            tracing::error!(%endpoint, "flow referenced an unknown endpoint");
                        }
                    }
                }
                DispatcherEvent::OutputReceived { endpoint, response } => {
                    if let Some(handle) = outputs.get_mut(&endpoint) {
                        if let Some((guid, respond_to)) = handle.pending.pop_front() {
                            if let Some(report) = reports.get_mut(&guid) {
                                report.log_response(&endpoint, response.clone());
                                if let Some(listener) = &self.listener {
                                    listener.on_change(report);
                                }
                            }
                            let _ = respond_to.send(response);
                        }
                    }
                }
                DispatcherEvent::Finished { guid, response } => {
                    if let Some(mut report) = reports.remove(&guid) {
                        report.log_response(LOCAL_ENDPOINT, response.clone());
                        if let Some(listener) = &self.listener {
                            listener.on_change(&report);
                            let exchange = RequestResponse {
                                guid: Some(guid),
                                request: report.request().cloned(),
                                response: report.response().cloned(),
                            };
                            listener.on_request_response(&exchange);
                        }
                    }
                }
                DispatcherEvent::EndpointClosed(name) => {
                    if name == LOCAL_ENDPOINT {
                        tracing::info!(%client_addr, "client connection closed");
                        break;
                    }
                    if let Some(mut handle) = outputs.remove(&name) {
                        while let Some((_, respond_to)) = handle.pending.pop_front() {
                            let _ = respond_to.send(processing::canceled_response(&format!(
                                "endpoint \"{name}\" closed its connection"
                            )));
                        }
                    }
                }
            }
        }
    }
}

async fn input_read_loop(mut read_half: OwnedReadHalf, events_tx: mpsc::UnboundedSender<DispatcherEvent>) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut parser = RequestParser::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                parser.notify_eof();
                if let Ok(Some(request)) = parser.poll(&mut buf) {
                    let _ = events_tx.send(DispatcherEvent::InputReceived(request));
                }
                let _ = events_tx.send(DispatcherEvent::EndpointClosed(LOCAL_ENDPOINT.to_string()));
                return;
            }
            Err(_) => {
                let _ = events_tx.send(DispatcherEvent::EndpointClosed(LOCAL_ENDPOINT.to_string()));
                return;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match parser.poll(&mut buf) {
                        Ok(Some(request)) => {
                            if events_tx.send(DispatcherEvent::InputReceived(request)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            tracing::warn!(%error, "malformed request; closing connection");
                            let _ = events_tx
                                .send(DispatcherEvent::EndpointClosed(LOCAL_ENDPOINT.to_string()));
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn output_read_loop(
    name: String,
    mut read_half: OwnedReadHalf,
    events_tx: mpsc::UnboundedSender<DispatcherEvent>,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut parser = ResponseParser::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                parser.notify_eof();
                if let Ok(Some(response)) = parser.poll(&mut buf) {
                    let _ = events_tx.send(DispatcherEvent::OutputReceived {
                        endpoint: name.clone(),
                        response,
                    });
                }
                let _ = events_tx.send(DispatcherEvent::EndpointClosed(name));
                return;
            }
            Err(_) => {
                let _ = events_tx.send(DispatcherEvent::EndpointClosed(name));
                return;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match parser.poll(&mut buf) {
                        Ok(Some(response)) => {
                            if events_tx
                                .send(DispatcherEvent::OutputReceived {
                                    endpoint: name.clone(),
                                    response,
                                })
                                .is_err()
                            {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            tracing::warn!(endpoint = %name, %error, "malformed upstream response");
                            let _ = events_tx.send(DispatcherEvent::EndpointClosed(name));
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Drains final responses strictly in the order their requests arrived,
/// regardless of which order the flow tasks that produced them finished in.
async fn input_writer_loop(
    mut write_half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<oneshot::Receiver<HttpResponse>>,
) {
    while let Some(final_rx) = queue.recv().await {
        let response = final_rx
            .await
            .unwrap_or_else(|_| processing::canceled_response("flow task ended unexpectedly"));
        let bytes = response.to_bytes();
        if write_half.write_all(&bytes).await.is_err() {
            return;
        }
    }
}
