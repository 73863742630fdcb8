//! The flow DSL: a small tree of branches that decides, for each request,
//! whether to respond directly, rewrite and forward it, or hand it to
//! another named endpoint, grounded on
//! `examples/original_source/proxycore/pipe/recipe/flow.py`.
//!
//! `flow.py` rebinds a `Flow` per-handler-instance via Python's descriptor
//! protocol (`Flow.__get__`); per Design Note §9 that mechanism is
//! deliberately not carried over. Instead a flow is an ordinary owned tree
//! (`Flow`, built with the fluent methods below) shared behind an `Arc` and
//! driven by real `async fn` bodies — the "(a) async tasks with channels"
//! mapping chosen in Design Note §9. Branch nodes return a boxed future
//! rather than relying on `async-trait` (not used anywhere in the reference
//! corpus), following the manual `Pin<Box<dyn Future>>` pattern the teacher
//! pack shows in `messense-dav-server-rs/src/async_stream.rs`.

pub mod matchers;
pub mod transform;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dispatcher::FlowContext;
use crate::message::{HttpRequest, HttpResponse};
use matchers::Matcher;
use transform::Transform;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raised internally when a branch's guard fails; causes the containing
/// `Flow` to move on to its next branch (or its fallback), never seen
/// outside this module.
#[derive(Debug, Clone, Copy)]
pub struct DoesNotAccept;

pub trait FlowNode: Send + Sync {
    fn call<'a>(
        &'a self,
        request: HttpRequest,
        ctx: &'a FlowContext,
    ) -> BoxFuture<'a, Result<HttpResponse, DoesNotAccept>>;
}

/// A sequence of branches tried in order, with an optional fallback tried if
/// every branch declines. `Flow` itself implements `FlowNode`, so a `Flow`
/// can be nested inside another via [`Flow::delegate`].
#[derive(Default)]
pub struct Flow {
    branches: Vec<Arc<dyn FlowNode>>,
    fallback_node: Option<Arc<dyn FlowNode>>,
}

impl Flow {
    pub fn new() -> Self {
        Flow::default()
    }

    pub fn when(mut self, matchers: Vec<Box<dyn Matcher>>, inner: Flow) -> Self {
        self.branches.push(Arc::new(GuardedFlow { matchers, inner }));
        self
    }

    pub fn transform(mut self, transform: Arc<dyn Transform>, inner: Flow) -> Self {
        self.branches.push(Arc::new(TransformingFlow { transform, inner }));
        self
    }

    pub fn respond(mut self, response: HttpResponse) -> Self {
        self.branches.push(Arc::new(RespondNode(response)));
        self
    }

    pub fn respond_with(
        mut self,
        responder: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Self {
        self.branches.push(Arc::new(RespondFnNode(Box::new(responder))));
        self
    }

    /// Shorthand for `when(matchers, Flow::new().respond(response))`,
    /// mirroring `flow.py`'s `respond_when`.
    pub fn respond_when(self, matchers: Vec<Box<dyn Matcher>>, response: HttpResponse) -> Self {
        self.when(matchers, Flow::new().respond(response))
    }

    pub fn call_endpoint(mut self, name: impl Into<String>) -> Self {
        self.branches.push(Arc::new(CallEndpointNode(name.into())));
        self
    }

    pub fn delegate(mut self, inner: Flow) -> Self {
        self.branches.push(Arc::new(inner));
        self
    }

    pub fn fallback(mut self, inner: Flow) -> Self {
        self.fallback_node = Some(Arc::new(inner));
        self
    }
}

impl FlowNode for Flow {
    fn call<'a>(
        &'a self,
        request: HttpRequest,
        ctx: &'a FlowContext,
    ) -> BoxFuture<'a, Result<HttpResponse, DoesNotAccept>> {
        Box::pin(async move {
            for branch in &self.branches {
                match branch.call(request.clone(), ctx).await {
                    Ok(response) => return Ok(response),
                    Err(DoesNotAccept) => continue,
                }
            }
            if let Some(fallback) = &self.fallback_node {
                return fallback.call(request, ctx).await;
            }
            Err(DoesNotAccept)
        })
    }
}

struct GuardedFlow {
    matchers: Vec<Box<dyn Matcher>>,
    inner: Flow,
}

impl FlowNode for GuardedFlow {
    fn call<'a>(
        &'a self,
        request: HttpRequest,
        ctx: &'a FlowContext,
    ) -> BoxFuture<'a, Result<HttpResponse, DoesNotAccept>> {
        Box::pin(async move {
            if self.matchers.iter().all(|m| m.matches(&request)) {
                self.inner.call(request, ctx).await
            } else {
                Err(DoesNotAccept)
            }
        })
    }
}

struct TransformingFlow {
    transform: Arc<dyn Transform>,
    inner: Flow,
}

impl FlowNode for TransformingFlow {
    fn call<'a>(
        &'a self,
        request: HttpRequest,
        ctx: &'a FlowContext,
    ) -> BoxFuture<'a, Result<HttpResponse, DoesNotAccept>> {
        Box::pin(async move {
            let original = request.clone();
            let Some(new_request) = self.transform.transform_request(request) else {
                return Err(DoesNotAccept);
            };
            let response = self.inner.call(new_request.clone(), ctx).await?;
            Ok(self.transform.transform_response(&new_request, response, &original))
        })
    }
}

struct RespondNode(HttpResponse);

impl FlowNode for RespondNode {
    fn call<'a>(
        &'a self,
        _request: HttpRequest,
        _ctx: &'a FlowContext,
    ) -> BoxFuture<'a, Result<HttpResponse, DoesNotAccept>> {
        let response = self.0.clone();
        Box::pin(async move { Ok(response) })
    }
}

struct RespondFnNode(Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>);

impl FlowNode for RespondFnNode {
    fn call<'a>(
        &'a self,
        request: HttpRequest,
        _ctx: &'a FlowContext,
    ) -> BoxFuture<'a, Result<HttpResponse, DoesNotAccept>> {
        let response = (self.0)(&request);
        Box::pin(async move { Ok(response) })
    }
}

struct CallEndpointNode(String);

impl FlowNode for CallEndpointNode {
    fn call<'a>(
        &'a self,
        request: HttpRequest,
        ctx: &'a FlowContext,
    ) -> BoxFuture<'a, Result<HttpResponse, DoesNotAccept>> {
        Box::pin(async move { Ok(ctx.call_endpoint(&self.0, request).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::matchers::has_method;
    use crate::message::HttpVersion;
    use tokio::sync::mpsc;

    fn test_context() -> (FlowContext, mpsc::UnboundedReceiver<crate::dispatcher::DispatcherEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FlowContext::new(uuid::Uuid::new_v4(), tx), rx)
    }

    #[tokio::test]
    async fn first_matching_branch_wins() {
        let flow = Flow::new()
            .when(vec![has_method("GET")], Flow::new().respond(HttpResponse::new("200", "OK")))
            .respond(HttpResponse::new("404", "Not Found"));
        let (ctx, _rx) = test_context();
        let req = HttpRequest::new("GET", "/", HttpVersion::Http11);
        let resp = flow.call(req, &ctx).await.unwrap();
        assert_eq!(resp.status_code, "200");
    }

    #[tokio::test]
    async fn falls_through_to_next_branch_when_guard_fails() {
        let flow = Flow::new()
            .when(vec![has_method("POST")], Flow::new().respond(HttpResponse::new("201", "Created")))
            .respond(HttpResponse::new("200", "OK"));
        let (ctx, _rx) = test_context();
        let req = HttpRequest::new("GET", "/", HttpVersion::Http11);
        let resp = flow.call(req, &ctx).await.unwrap();
        assert_eq!(resp.status_code, "200");
    }

    #[tokio::test]
    async fn uses_fallback_when_no_branch_matches() {
        let flow = Flow::new()
            .when(vec![has_method("POST")], Flow::new().respond(HttpResponse::new("201", "Created")))
            .fallback(Flow::new().respond(HttpResponse::new("405", "Method Not Allowed")));
        let (ctx, _rx) = test_context();
        let req = HttpRequest::new("GET", "/", HttpVersion::Http11);
        let resp = flow.call(req, &ctx).await.unwrap();
        assert_eq!(resp.status_code, "405");
    }
}
