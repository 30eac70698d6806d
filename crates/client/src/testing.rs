//! In-memory [`Transport`] answering from a route table.
//!
//! ```rust,ignore
//! use serde_json::json;
//! use sitegraph_client::testing::MockTransport;
//! use sitegraph_client::{Method, Protocol};
//!
//! let mock = MockTransport::new();
//! mock.route(Protocol::Rest, Method::Get, "_api/web")
//!     .reply(json!({ "Id": "7b4d...", "Title": "Dev" }));
//! mock.route(Protocol::Graph, Method::Get, "sites/root")
//!     .with_param("$select", "id,description")
//!     .fail(404, "itemNotFound", "not here");
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::{
    BatchResponse, Document, Method, Protocol, RequestDescriptor, ServiceError, Transport,
    TransportError,
};

#[derive(Debug, Clone)]
struct Route {
    protocol: Protocol,
    method: Method,
    path: String,
    params: Vec<(String, ParamMatch)>,
    reply: Result<Document, TransportError>,
}

#[derive(Debug, Clone)]
enum ParamMatch {
    Exact(String),
    Contains(String),
    Absent,
}

impl Route {
    fn matches(&self, request: &RequestDescriptor) -> bool {
        self.protocol == request.protocol
            && self.method == request.method
            && self.path == request.path
            && self.params.iter().all(|(name, expected)| {
                match (expected, request.param(name)) {
                    (ParamMatch::Exact(v), Some(actual)) => v == actual,
                    (ParamMatch::Contains(v), Some(actual)) => actual.contains(v.as_str()),
                    (ParamMatch::Absent, None) => true,
                    _ => false,
                }
            })
    }
}

#[derive(Debug, Default)]
struct MockState {
    routes: Vec<Route>,
    log: Vec<RequestDescriptor>,
    round_trips: usize,
    delay: Option<Duration>,
}

/// Canned-response transport recording every descriptor it receives.
///
/// Later routes take precedence over earlier ones; among matching routes the
/// one with the most parameter conditions wins.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start declaring a route; finish with [`RouteBuilder::reply`] or [`RouteBuilder::fail`].
    pub fn route(&self, protocol: Protocol, method: Method, path: impl Into<String>) -> RouteBuilder<'_> {
        RouteBuilder {
            mock: self,
            route: Route {
                protocol,
                method,
                path: path.into(),
                params: Vec::new(),
                reply: Ok(Value::Null),
            },
        }
    }

    /// Delay every response (to observe in-flight cancellation).
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    /// Every descriptor received so far, in arrival order.
    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.state().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state().log.len()
    }

    /// Number of `send`/`send_batch` calls.
    pub fn round_trips(&self) -> usize {
        self.state().round_trips
    }

    /// Rendered `[protocol] METHOD path?query` lines, in arrival order.
    pub fn request_lines(&self) -> Vec<String> {
        self.state().log.iter().map(|r| r.to_string()).collect()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.log.clear();
        state.round_trips = 0;
    }

    fn answer(&self, request: &RequestDescriptor) -> Result<Document, TransportError> {
        let mut state = self.state();
        state.log.push(request.clone());

        let reply = state
            .routes
            .iter()
            .enumerate()
            .filter(|(_, route)| route.matches(request))
            .max_by_key(|(index, route)| (route.params.len(), *index))
            .map(|(_, route)| route.reply.clone());

        trace!("mock transport: {} -> matched={}", request, reply.is_some());

        reply.unwrap_or_else(|| {
            Err(TransportError::Service(ServiceError::new(
                request.protocol,
                404,
                "mockRouteNotFound",
                format!("no mock route for {}", request),
            )))
        })
    }

    fn delay(&self) -> Option<Duration> {
        self.state().delay
    }
}

/// Declares one mock route.
pub struct RouteBuilder<'a> {
    mock: &'a MockTransport,
    route: Route,
}

impl<'a> RouteBuilder<'a> {
    /// Only match when the query parameter has exactly this value.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.route
            .params
            .push((name.into(), ParamMatch::Exact(value.into())));
        self
    }

    /// Only match when the query parameter contains this text.
    pub fn with_param_containing(mut self, name: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.route
            .params
            .push((name.into(), ParamMatch::Contains(fragment.into())));
        self
    }

    /// Only match when the query parameter is not present.
    pub fn without_param(mut self, name: impl Into<String>) -> Self {
        self.route.params.push((name.into(), ParamMatch::Absent));
        self
    }

    pub fn reply(self, document: Document) {
        self.finish(Ok(document));
    }

    /// Answer with a service error of the route's protocol.
    pub fn fail(self, status: u16, code: &str, message: &str) {
        let error = ServiceError::new(self.route.protocol, status, code, message);
        self.finish(Err(TransportError::Service(error)));
    }

    pub fn fail_with(self, error: TransportError) {
        self.finish(Err(error));
    }

    fn finish(mut self, reply: Result<Document, TransportError>) {
        self.route.reply = reply;
        self.mock.state().routes.push(self.route);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Document, TransportError> {
        self.state().round_trips += 1;
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        self.answer(request)
    }

    async fn send_batch(&self, requests: Vec<RequestDescriptor>) -> Vec<BatchResponse> {
        self.state().round_trips += 1;
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        requests
            .iter()
            .map(|request| BatchResponse {
                correlation_id: request.correlation_id,
                result: self.answer(request),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CorrelationId;
    use serde_json::json;

    #[tokio::test]
    async fn test_most_specific_route_wins() {
        let mock = MockTransport::new();
        mock.route(Protocol::Rest, Method::Get, "_api/web/lists")
            .reply(json!([{ "Id": 1 }, { "Id": 2 }]));
        mock.route(Protocol::Rest, Method::Get, "_api/web/lists")
            .with_param_containing("$filter", "Title eq")
            .reply(json!([{ "Id": 2 }]));

        let id = CorrelationId::new();
        let plain = RequestDescriptor::get(id, Protocol::Rest, "_api/web/lists");
        let filtered = plain.clone().with_param("$filter", "Title eq 'Docs'");

        assert_eq!(mock.send(&plain).await.unwrap(), json!([{ "Id": 1 }, { "Id": 2 }]));
        assert_eq!(mock.send(&filtered).await.unwrap(), json!([{ "Id": 2 }]));
        assert_eq!(mock.round_trips(), 2);
    }

    #[tokio::test]
    async fn test_batch_is_one_round_trip_in_order() {
        let mock = MockTransport::new();
        mock.route(Protocol::Graph, Method::Get, "sites/root").reply(json!({ "id": "s" }));
        mock.route(Protocol::Rest, Method::Get, "_api/web").fail(403, "accessDenied", "no");

        let first = RequestDescriptor::get(CorrelationId::new(), Protocol::Graph, "sites/root");
        let second = RequestDescriptor::get(CorrelationId::new(), Protocol::Rest, "_api/web");
        let responses = mock.send_batch(vec![first.clone(), second.clone()]).await;

        assert_eq!(mock.round_trips(), 1);
        assert_eq!(responses[0].correlation_id, first.correlation_id);
        assert!(responses[0].result.is_ok());
        assert_eq!(responses[1].correlation_id, second.correlation_id);
        assert_eq!(
            responses[1].result.as_ref().err().and_then(|e| e.service_error()).map(|e| e.http_response_code),
            Some(403)
        );
    }

    #[tokio::test]
    async fn test_unrouted_request_is_not_found() {
        let mock = MockTransport::new();
        let request = RequestDescriptor::get(CorrelationId::new(), Protocol::Rest, "_api/site");
        let err = mock.send(&request).await.unwrap_err();
        assert!(err.service_error().is_some_and(|e| e.is_not_found()));
        assert_eq!(mock.request_lines(), vec!["[REST] GET _api/site".to_string()]);
    }
}
