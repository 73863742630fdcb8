//! Observing exchanges as they flow through a dispatcher, grounded on
//! `examples/original_source/proxycore/pipe/reporting.py`.

use uuid::Uuid;

use crate::message::{HttpRequest, HttpResponse};

/// One logical exchange as seen from one side: the request that arrived and
/// the response that was sent back, either of which may still be pending.
#[derive(Debug, Clone, Default)]
pub struct RequestResponse {
    pub guid: Option<Uuid>,
    pub request: Option<HttpRequest>,
    pub response: Option<HttpResponse>,
}

impl RequestResponse {
    pub fn set_request(&mut self, guid: Uuid, request: HttpRequest) {
        self.guid = Some(guid);
        self.request = Some(request);
    }

    pub fn set_response(&mut self, guid: Uuid, response: HttpResponse) {
        self.guid = Some(guid);
        self.response = Some(response);
    }
}

/// Receives exchange lifecycle notifications. Implemented by whatever wants
/// to observe traffic: a persistence writer, a UI, or (in tests) a simple
/// recorder.
pub trait MessageListener: Send + Sync {
    fn on_change(&self, report: &LogReport) {
        let _ = report;
    }
    fn on_request_response(&self, exchange: &RequestResponse) {
        let _ = exchange;
    }
    fn on_error(&self, guid: Uuid, error: &str) {
        let _ = (guid, error);
    }
}

/// Per-exchange log of what each named endpoint saw, keyed by endpoint name
/// in the order endpoints first appear — mirrors `LogReport.messages`
/// (an `OrderedDict`).
#[derive(Debug, Clone, Default)]
pub struct LogReport {
    pub guid: Uuid,
    messages: Vec<(String, RequestResponse)>,
}

impl LogReport {
    pub fn new(guid: Uuid) -> Self {
        LogReport {
            guid,
            messages: Vec::new(),
        }
    }

    fn entry(&mut self, endpoint: &str) -> &mut RequestResponse {
        if let Some(pos) = self.messages.iter().position(|(n, _)| n == endpoint) {
            &mut self.messages[pos].1
        } else {
            self.messages.push((endpoint.to_string(), RequestResponse::default()));
            &mut self.messages.last_mut().unwrap().1
        }
    }

    pub fn log_request(&mut self, endpoint: &str, request: HttpRequest) {
        self.entry(endpoint).set_request(self.guid, request);
    }

    pub fn log_response(&mut self, endpoint: &str, response: HttpResponse) {
        self.entry(endpoint).set_response(self.guid, response);
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|(n, _)| n.as_str())
    }

    pub fn for_endpoint(&self, endpoint: &str) -> Option<&RequestResponse> {
        self.messages.iter().find(|(n, _)| n == endpoint).map(|(_, rr)| rr)
    }

    /// The originating request: prefers the `"remote"`-named endpoint's view
    /// (what was actually sent upstream, post-transform) and falls back to
    /// `"local"` (what the client originally sent), matching
    /// `LogReport.request`.
    pub fn request(&self) -> Option<&HttpRequest> {
        self.for_endpoint("remote")
            .and_then(|rr| rr.request.as_ref())
            .or_else(|| self.for_endpoint("local").and_then(|rr| rr.request.as_ref()))
    }

    /// The response ultimately sent to the client; always the `"local"`
    /// endpoint's view, matching `LogReport.response`.
    pub fn response(&self) -> Option<&HttpResponse> {
        self.for_endpoint("local").and_then(|rr| rr.response.as_ref())
    }
}
