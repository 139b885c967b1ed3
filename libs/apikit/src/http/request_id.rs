use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::field::Empty;

pub fn header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

/// Generates request ids with `nanoid` when the client did not send one.
#[derive(Clone, Default)]
pub struct MakeReqId;

impl MakeRequestId for MakeReqId {
    fn make_request_id<B>(&mut self, _req: &Request<B>) -> Option<RequestId> {
        let id = nanoid::nanoid!();
        Some(RequestId::new(id.parse().ok()?))
    }
}

pub fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Trace layer whose span carries method, path and request id.
#[allow(clippy::type_complexity)]
pub fn create_trace_layer() -> tower_http::trace::TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    impl Fn(&Request<Body>) -> tracing::Span + Clone,
> {
    use tower_http::trace::TraceLayer;

    TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let rid = request_id_from(req.headers()).unwrap_or_else(|| "n/a".to_string());
        tracing::info_span!(
            "http_request",
            method = %req.method(),
            path = %req.uri().path(),
            version = ?req.version(),
            request_id = %rid,
            status = Empty,
            latency_ms = Empty
        )
    })
}
