//! Request/response rewriting hook for a flow branch, grounded on
//! `examples/original_source/proxycore/pipe/recipe/flow.py`'s `Transform`.

use crate::message::{HttpRequest, HttpResponse};

/// Rewrites a request on the way in and (optionally) the corresponding
/// response on the way back out. Returning `None` from
/// `transform_request` rejects the message the same way a failed guard
/// does, moving on to the next branch or the fallback.
pub trait Transform: Send + Sync {
    fn transform_request(&self, request: HttpRequest) -> Option<HttpRequest> {
        Some(request)
    }

    fn transform_response(
        &self,
        _new_request: &HttpRequest,
        response: HttpResponse,
        _original_request: &HttpRequest,
    ) -> HttpResponse {
        response
    }
}
