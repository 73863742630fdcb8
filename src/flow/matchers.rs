//! Request predicates used to guard flow branches, grounded on
//! `examples/original_source/proxycore/pipe/recipe/matchers.py`.

use crate::message::HttpRequest;

pub trait Matcher: Send + Sync {
    fn matches(&self, request: &HttpRequest) -> bool;
}

struct HasHeader {
    name: String,
    prefix: Option<String>,
}

impl Matcher for HasHeader {
    fn matches(&self, request: &HttpRequest) -> bool {
        match request.headers().get(&self.name) {
            Some(value) => self
                .prefix
                .as_ref()
                .map(|p| value.starts_with(p.as_str()))
                .unwrap_or(true),
            None => false,
        }
    }
}

pub fn has_header(name: impl Into<String>) -> Box<dyn Matcher> {
    Box::new(HasHeader {
        name: name.into(),
        prefix: None,
    })
}

pub fn has_content_type(prefix: impl Into<String>) -> Box<dyn Matcher> {
    Box::new(HasHeader {
        name: "Content-Type".to_string(),
        prefix: Some(prefix.into()),
    })
}

struct HasMethod(String);

impl Matcher for HasMethod {
    fn matches(&self, request: &HttpRequest) -> bool {
        request.method.eq_ignore_ascii_case(&self.0)
    }
}

pub fn has_method(method: impl Into<String>) -> Box<dyn Matcher> {
    Box::new(HasMethod(method.into()))
}

struct HasPath(String);

impl Matcher for HasPath {
    fn matches(&self, request: &HttpRequest) -> bool {
        let (path, _) = request.path_query();
        path == self.0
    }
}

pub fn has_path(path: impl Into<String>) -> Box<dyn Matcher> {
    Box::new(HasPath(path.into()))
}

struct HasPathStarting(String);

impl Matcher for HasPathStarting {
    fn matches(&self, request: &HttpRequest) -> bool {
        let (path, _) = request.path_query();
        path.starts_with(&self.0)
    }
}

pub fn has_path_starting(prefix: impl Into<String>) -> Box<dyn Matcher> {
    Box::new(HasPathStarting(prefix.into()))
}

struct LambdaMatcher<F>(F);

impl<F> Matcher for LambdaMatcher<F>
where
    F: Fn(&HttpRequest) -> bool + Send + Sync,
{
    fn matches(&self, request: &HttpRequest) -> bool {
        (self.0)(request)
    }
}

pub fn matcher_fn(f: impl Fn(&HttpRequest) -> bool + Send + Sync + 'static) -> Box<dyn Matcher> {
    Box::new(LambdaMatcher(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HttpVersion;

    #[test]
    fn has_path_starting_matches_prefix() {
        let req = HttpRequest::new("GET", "/api/v1/users", HttpVersion::Http11);
        assert!(has_path_starting("/api/").matches(&req));
        assert!(!has_path_starting("/admin/").matches(&req));
    }

    #[test]
    fn has_method_is_case_insensitive() {
        let req = HttpRequest::new("get", "/", HttpVersion::Http11);
        assert!(has_method("GET").matches(&req));
    }
}
