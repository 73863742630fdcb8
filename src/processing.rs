//! One request/response exchange flowing through a `Flow`, grounded on
//! `examples/original_source/proxycore/pipe/endpoint.py`'s `Processing`.
//!
//! The original catches `StopIteration`/`Exception` raised out of a
//! generator-coroutine flow and turns it into a synthesized `500`. Here the
//! flow is a real `async fn` tree (Design Note §9), so the two failure modes
//! map onto: `Err(DoesNotAccept)` bubbling out of the root `Flow` (handled
//! below), and an outright panic inside a flow body, which is instead caught
//! one layer up, at the point where the spawned task's result is awaited
//! (`dispatcher::Dispatcher`) — a dropped `oneshot::Sender` there produces
//! the same synthesized response via `RecvError`.

use std::sync::Arc;

use crate::dispatcher::FlowContext;
use crate::flow::{DoesNotAccept, Flow, FlowNode};
use crate::message::{HttpRequest, HttpResponse};

/// Drives one request through the flow tree to completion, turning a root
/// rejection into the same synthetic `500` response the original emits for
/// an uncaught flow exception.
pub async fn execute(flow: Arc<Flow>, ctx: FlowContext, request: HttpRequest) -> HttpResponse {
    match flow.call(request, &ctx).await {
        Ok(response) => response,
        Err(DoesNotAccept) => canceled_response("No flow accepted the request."),
    }
}

pub fn canceled_response(detail: &str) -> HttpResponse {
    let body = format!("Internal proxy error:\n{detail}\n");
    HttpResponse::internal_error(body)
}
