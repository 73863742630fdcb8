//! Assembles the root flow from an explicit, ordered list of registration
//! functions, grounded on
//! `examples/original_source/proxycore/pipe/recipe/flow_finder.py`'s
//! `_find_flows`/`register_flows`.
//!
//! The original discovers flow modules by scanning a package directory and
//! sorting the results by module name (`pipe/importing.py`). Rust has no
//! equivalent of dynamic module discovery, and per Design Note §9 this is
//! exactly the kind of Python-runtime-specific mechanism that should not be
//! replicated: the registration order becomes an explicit `Vec` supplied by
//! whoever builds the server, instead of being derived from the filesystem.

use crate::flow::Flow;

/// One contribution to the root flow; receives the flow built by every
/// registration before it and returns the flow with its own branches added,
/// mirroring `register_flow(flow) -> flow`.
pub type FlowRegistration = fn(Flow) -> Flow;

pub fn build_flow(registrations: &[FlowRegistration]) -> Flow {
    registrations.iter().fold(Flow::new(), |flow, register| register(flow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowNode;
    use crate::message::{HttpRequest, HttpVersion};

    fn register_ping(flow: Flow) -> Flow {
        flow.respond_when(
            vec![crate::flow::matchers::has_path("/ping")],
            crate::message::HttpResponse::new("200", "OK"),
        )
    }

    #[tokio::test]
    async fn build_flow_applies_registrations_in_order() {
        let flow = build_flow(&[register_ping]);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = crate::dispatcher::FlowContext::new(uuid::Uuid::new_v4(), tx);
        let request = HttpRequest::new("GET", "/ping", HttpVersion::Http11);
        let response = flow.call(request, &ctx).await.unwrap();
        assert_eq!(response.status_code, "200");
    }
}
