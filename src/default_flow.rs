//! The bundled default flow: forward everything to `"remote"`, rewriting
//! `Host` on the way out and `Location`/`Referer` on the way back, grounded
//! on `examples/original_source/proxycore/flows/zz_default_recipe.py`'s
//! `DefaultTransform`.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::flow::transform::Transform;
use crate::flow::Flow;
use crate::message::{HttpRequest, HttpResponse};
use crate::proto::decode::normalize_chunked;

/// `host:port`, omitting `:80` the way a browser's default `Host` header
/// does, matching `DefaultTransform.remote_address_with_port`.
fn authority(addr: SocketAddr) -> String {
    if addr.port() == 80 {
        addr.ip().to_string()
    } else {
        addr.to_string()
    }
}

pub struct DefaultTransform {
    remote_addr: SocketAddr,
}

impl DefaultTransform {
    pub fn new(remote_addr: SocketAddr) -> Self {
        DefaultTransform { remote_addr }
    }

    fn rewrite_location_header(&self, headers_value: &str, original_host: &str, new_host: &str) -> String {
        headers_value.replacen(new_host, original_host, 1)
    }
}

impl Transform for DefaultTransform {
    fn transform_request(&self, mut request: HttpRequest) -> Option<HttpRequest> {
        let original_host = request.headers().get("Host").unwrap_or("").to_string();
        let new_host = authority(self.remote_addr);

        if !original_host.is_empty() {
            request.headers_mut().set("X-Original-Host", original_host);
        }
        request.headers_mut().set("Host", new_host);

        normalize_chunked(request.headers_mut(), &request.parts.body);
        Some(request)
    }

    fn transform_response(
        &self,
        new_request: &HttpRequest,
        mut response: HttpResponse,
        original_request: &HttpRequest,
    ) -> HttpResponse {
        let new_host = new_request.headers().get("Host").unwrap_or("").to_string();
        let original_host = original_request
            .headers()
            .get("X-Original-Host")
            .or_else(|| original_request.headers().get("Host"))
            .unwrap_or("")
            .to_string();

        if !original_host.is_empty() && !new_host.is_empty() {
            for header in ["Location", "Referer"] {
                if let Some(value) = response.headers().get(header) {
                    let rewritten = self.rewrite_location_header(value, &original_host, &new_host);
                    response.headers_mut().set(header, rewritten);
                }
            }
        }

        normalize_chunked(response.headers_mut(), &response.parts.body);
        response
    }
}

/// The flow registered by default when no custom recipe is supplied: rewrite
/// `Host`/`Location`/`Referer` and forward everything to `"remote"`,
/// mirroring `register_flow(flow)` in `zz_default_recipe.py`.
pub fn register_flow(remote_addr: SocketAddr) -> impl Fn(Flow) -> Flow {
    move |flow: Flow| {
        flow.transform(
            Arc::new(DefaultTransform::new(remote_addr)),
            Flow::new().call_endpoint("remote"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowNode;
    use crate::message::HttpVersion;

    #[test]
    fn authority_omits_default_http_port() {
        let addr: SocketAddr = "10.0.0.1:80".parse().unwrap();
        assert_eq!(authority(addr), "10.0.0.1");
        let addr: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        assert_eq!(authority(addr), "10.0.0.1:8080");
    }

    #[test]
    fn transform_request_rewrites_host_and_keeps_original() {
        let transform = DefaultTransform::new("10.0.0.1:8080".parse().unwrap());
        let mut request = HttpRequest::new("GET", "/", HttpVersion::Http11);
        request.headers_mut().set("Host", "public.example.com");
        let rewritten = transform.transform_request(request).unwrap();
        assert_eq!(rewritten.headers().get("Host"), Some("10.0.0.1:8080"));
        assert_eq!(
            rewritten.headers().get("X-Original-Host"),
            Some("public.example.com")
        );
    }

    #[tokio::test]
    async fn flow_node_trait_is_in_scope() {
        // keeps the `FlowNode` import exercised for the trait method below
        let flow = Flow::new().respond(HttpResponse::new("200", "OK"));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = crate::dispatcher::FlowContext::new(uuid::Uuid::new_v4(), tx);
        let response = flow
            .call(HttpRequest::new("GET", "/", HttpVersion::Http11), &ctx)
            .await
            .unwrap();
        assert_eq!(response.status_code, "200");
    }
}
