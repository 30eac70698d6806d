use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tap::TapFallible;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use super::concurrency_limiter::{limits_for_host, ConcurrencyLimitConfig, HostLimits};
use crate::{
    BatchResponse, Document, Method, Protocol, RequestDescriptor, ServiceError, Transport,
    TransportError,
};

/// Maximum number of requests in one Graph JSON batch.
pub const GRAPH_BATCH_LIMIT: usize = 20;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Sends descriptors over HTTPS.
///
/// REST paths are resolved against the site URL (`https://contoso.sharepoint.com/sites/dev/`),
/// Graph paths against the Graph endpoint (`https://graph.microsoft.com/v1.0/`).
#[derive(Clone, Debug)]
pub struct HttpTransport {
    rest_base: Url,
    graph_base: Url,
    http: Client,
    timeout: Duration,
    bearer: HashMap<Protocol, String>,
    rest_limits: HostLimits,
    graph_limits: HostLimits,
}

impl HttpTransport {
    /// Limits from `SITEGRAPH_CONCURRENCY_LIMIT_READ` / `_WRITE` are applied when set.
    pub fn new(rest_base: Url, graph_base: Url) -> Result<Self, TransportError> {
        let transport = Self {
            rest_base: with_trailing_slash(rest_base),
            graph_base: with_trailing_slash(graph_base),
            http: build_client(DEFAULT_TIMEOUT)?,
            timeout: DEFAULT_TIMEOUT,
            bearer: HashMap::new(),
            rest_limits: HostLimits::default(),
            graph_limits: HostLimits::default(),
        };

        Ok(match ConcurrencyLimitConfig::from_env() {
            Some(config) => transport.with_concurrency_limit(config),
            None => transport,
        })
    }

    pub fn with_bearer_token(mut self, protocol: Protocol, token: impl Into<String>) -> Self {
        self.bearer.insert(protocol, token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, TransportError> {
        self.http = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_concurrency_limit(mut self, config: ConcurrencyLimitConfig) -> Self {
        self.rest_limits = limits_for_host(self.rest_base.host_str().unwrap_or_default(), &config);
        self.graph_limits =
            limits_for_host(self.graph_base.host_str().unwrap_or_default(), &config);
        self
    }

    fn base(&self, protocol: Protocol) -> &Url {
        match protocol {
            Protocol::Rest => &self.rest_base,
            Protocol::Graph => &self.graph_base,
        }
    }

    fn limits(&self, protocol: Protocol) -> &HostLimits {
        match protocol {
            Protocol::Rest => &self.rest_limits,
            Protocol::Graph => &self.graph_limits,
        }
    }

    fn url_for(&self, request: &RequestDescriptor) -> Result<Url, TransportError> {
        self.base(request.protocol)
            .join(request.target().trim_start_matches('/'))
            .map_err(|e| TransportError::Other(format!("invalid request path {}: {}", request.path, e)))
    }

    fn accept_header(protocol: Protocol) -> &'static str {
        match protocol {
            Protocol::Rest => "application/json;odata=minimalmetadata",
            Protocol::Graph => "application/json",
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                after: Some(self.timeout),
            }
        } else {
            err.into()
        }
    }

    #[instrument(
        name = "sitegraph.http.send",
        skip(self, request),
        fields(
            protocol = %request.protocol,
            method = %request.method,
            path = %request.path
        ),
        err
    )]
    async fn send_one(&self, request: &RequestDescriptor) -> Result<Document, TransportError> {
        let url = self.url_for(request)?;
        debug!("{} {}", request.method, url);

        let _permit = match self.limits(request.protocol).for_method(request.method) {
            Some(semaphore) => Some(
                semaphore
                    .acquire()
                    .await
                    .map_err(|e| TransportError::Other(e.to_string()))?,
            ),
            None => None,
        };

        let mut builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Patch => self.http.patch(url),
            Method::Delete => self.http.delete(url),
        }
        .header("Accept", Self::accept_header(request.protocol));

        if let Some(token) = self.bearer.get(&request.protocol) {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_send_error(e))
            .tap_err(|e| warn!("request failed before a response arrived: {}", e))?;

        read_document(request.protocol, response).await
    }

    /// POST up to [`GRAPH_BATCH_LIMIT`] Graph descriptors to `$batch`.
    #[instrument(
        name = "sitegraph.http.graph_batch",
        skip(self, requests),
        fields(size = requests.len()),
        err
    )]
    async fn send_graph_chunk(
        &self,
        requests: &[RequestDescriptor],
    ) -> Result<Vec<Result<Document, TransportError>>, TransportError> {
        let url = self
            .graph_base
            .join("$batch")
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let body = json!({
            "requests": requests
                .iter()
                .enumerate()
                .map(|(index, request)| graph_batch_entry(index, request))
                .collect::<Vec<_>>()
        });

        let method = if requests.iter().all(|r| r.method.is_read()) {
            Method::Get
        } else {
            Method::Post
        };
        let _permit = match self.graph_limits.for_method(method) {
            Some(semaphore) => Some(
                semaphore
                    .acquire()
                    .await
                    .map_err(|e| TransportError::Other(e.to_string()))?,
            ),
            None => None,
        };

        let mut builder = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(token) = self.bearer.get(&Protocol::Graph) {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;
        let envelope = read_document(Protocol::Graph, response).await?;

        Ok(split_graph_batch_response(requests.len(), &envelope))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Document, TransportError> {
        self.send_one(request).await
    }

    async fn send_batch(&self, requests: Vec<RequestDescriptor>) -> Vec<BatchResponse> {
        let mut results: Vec<Option<Result<Document, TransportError>>> =
            (0..requests.len()).map(|_| None).collect();

        let (graph, rest): (Vec<usize>, Vec<usize>) =
            (0..requests.len()).partition(|&i| requests[i].protocol == Protocol::Graph);

        let graph_chunks = graph.chunks(GRAPH_BATCH_LIMIT).map(|indices| {
            let chunk: Vec<RequestDescriptor> =
                indices.iter().map(|&i| requests[i].clone()).collect();
            async move {
                let outcome = self.send_graph_chunk(&chunk).await;
                (indices, outcome)
            }
        });
        let rest_calls = rest.iter().map(|&i| {
            let request = &requests[i];
            async move { (i, self.send_one(request).await) }
        });

        let (graph_results, rest_results) =
            futures_util::join!(join_all(graph_chunks), join_all(rest_calls));

        for (indices, outcome) in graph_results {
            match outcome {
                Ok(items) => {
                    for (&i, item) in indices.iter().zip(items) {
                        results[i] = Some(item);
                    }
                }
                Err(err) => {
                    for &i in indices {
                        results[i] = Some(Err(err.clone()));
                    }
                }
            }
        }
        for (i, item) in rest_results {
            results[i] = Some(item);
        }

        requests
            .iter()
            .zip(results)
            .map(|(request, result)| BatchResponse {
                correlation_id: request.correlation_id,
                result: result.unwrap_or_else(|| {
                    Err(TransportError::Other("no response for request".to_string()))
                }),
            })
            .collect()
    }
}

fn build_client(timeout: Duration) -> Result<Client, TransportError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::Other(format!("could not build http client: {}", e)))
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

async fn read_document(protocol: Protocol, response: Response) -> Result<Document, TransportError> {
    let status = response.status();
    let request_id = response
        .headers()
        .get("request-id")
        .or_else(|| response.headers().get("SPRequestGuid"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let text = response.text().await?;
    trace!("response {}: {}", status, text);

    if !status.is_success() {
        let mut error = ServiceError::parse(protocol, status.as_u16(), &text);
        if error.client_request_id.is_none() {
            error.client_request_id = request_id;
        }
        return Err(TransportError::Service(error));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn graph_batch_entry(index: usize, request: &RequestDescriptor) -> Value {
    let mut entry = json!({
        "id": (index + 1).to_string(),
        "method": request.method.as_str(),
        "url": format!("/{}", request.target().trim_start_matches('/')),
    });

    let mut headers: serde_json::Map<String, Value> = request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    if let Some(body) = &request.body {
        headers.insert("Content-Type".to_string(), json!("application/json"));
        entry["body"] = body.clone();
    }
    if !headers.is_empty() {
        entry["headers"] = Value::Object(headers);
    }
    entry
}

/// Demultiplex a Graph `$batch` response into per-request results, in request order.
///
/// Graph may answer the entries in any order; they are matched back by `id`.
fn split_graph_batch_response(
    count: usize,
    envelope: &Value,
) -> Vec<Result<Document, TransportError>> {
    let mut by_id: HashMap<String, &Value> = HashMap::new();
    if let Some(responses) = envelope.get("responses").and_then(|r| r.as_array()) {
        for response in responses {
            if let Some(id) = response.get("id").and_then(|v| v.as_str()) {
                by_id.insert(id.to_string(), response);
            }
        }
    }

    (1..=count)
        .map(|id| {
            let Some(response) = by_id.get(&id.to_string()) else {
                return Err(TransportError::Decode(format!(
                    "graph batch response has no entry for request {}",
                    id
                )));
            };
            let status = response
                .get("status")
                .and_then(|s| s.as_u64())
                .unwrap_or(500) as u16;
            let body = response.get("body").cloned().unwrap_or(Value::Null);

            if (200..300).contains(&status) {
                Ok(body)
            } else {
                let text = match &body {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Err(TransportError::Service(ServiceError::parse(
                    Protocol::Graph,
                    status,
                    &text,
                )))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CorrelationId;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_graph_batch_entry_shape() {
        let request = RequestDescriptor::get(CorrelationId::new(), Protocol::Graph, "sites/root")
            .with_param("$select", "id,displayName");

        let entry = graph_batch_entry(0, &request);
        assert_eq!(
            entry,
            json!({
                "id": "1",
                "method": "GET",
                "url": "/sites/root?$select=id%2CdisplayName"
            })
        );
    }

    #[test]
    fn test_split_graph_batch_response_matches_ids_out_of_order() {
        let envelope = json!({
            "responses": [
                { "id": "2", "status": 404, "body": { "error": { "code": "itemNotFound", "message": "gone" } } },
                { "id": "1", "status": 200, "body": { "id": "abc" } }
            ]
        });

        let results = split_graph_batch_response(3, &envelope);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().ok(), Some(&json!({ "id": "abc" })));

        let err = results[1].as_ref().err().and_then(|e| e.service_error()).cloned();
        assert_eq!(err.map(|e| e.code), Some("itemNotFound".to_string()));

        assert!(matches!(results[2], Err(TransportError::Decode(_))));
    }

    #[test]
    fn test_rest_url_resolution() {
        let transport = HttpTransport::new(
            Url::parse("https://contoso.sharepoint.com/sites/dev").unwrap(),
            Url::parse("https://graph.microsoft.com/v1.0").unwrap(),
        )
        .unwrap();
        let request = RequestDescriptor::get(CorrelationId::new(), Protocol::Rest, "_api/web")
            .with_param("$select", "Title");

        assert_eq!(
            transport.url_for(&request).unwrap().as_str(),
            "https://contoso.sharepoint.com/sites/dev/_api/web?$select=Title"
        );
    }
}
