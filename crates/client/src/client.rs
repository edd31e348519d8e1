//! The request pipeline.

use crate::{
    http_util::{RquestTransport, build_http_client},
    response::ApiResponse,
    sse::EventStream,
};
use bytes::Bytes;
use erniebot_backend::{AuthContext, Backend, BackendAdapter};
use erniebot_config::Config;
use erniebot_types::{
    ApiError, ErnieError, Headers, HttpRequest, HttpResponse, Method, RequestDescriptor, Result,
    Transport, join_url,
};
use serde_json::Value;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Applied when neither the client nor the request sets a timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Query parameters whose values never appear in logs.
const REDACTED_QUERY_KEYS: [&str; 1] = ["access_token"];

#[must_use]
pub fn default_user_agent() -> String {
    format!("ErnieBot/Rust-SDK {}", env!("CARGO_PKG_VERSION"))
}

/// Dispatches [`RequestDescriptor`]s against one backend.
pub struct ErnieClient {
    backend: Arc<dyn BackendAdapter>,
    transport: Arc<dyn Transport>,
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl ErnieClient {
    pub fn new(backend: Arc<dyn BackendAdapter>, transport: Arc<dyn Transport>) -> Self {
        let base_url = backend.base_url().to_string();
        Self {
            backend,
            transport,
            base_url,
            timeout: DEFAULT_TIMEOUT,
            user_agent: default_user_agent(),
        }
    }

    /// Builds the configured backend over an `rquest` transport.
    ///
    /// # Errors
    ///
    /// Returns the backend registry's error for an unknown `api_type` or
    /// unusable credentials.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(RquestTransport::new(build_http_client(
            config.proxy_url.as_deref(),
        )));
        let backend = Backend::from_config(config, Arc::clone(&transport))?;
        tracing::debug!(backend = %backend.kind(), "client configured");

        let mut client = Self::new(Arc::new(backend), transport).with_timeout(config.timeout());
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url);
        }
        if let Some(user_agent) = &config.user_agent {
            client = client.with_user_agent(user_agent);
        }
        Ok(client)
    }

    /// Base URL for paths the backend does not map.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn backend(&self) -> &dyn BackendAdapter {
        self.backend.as_ref()
    }

    /// The URL a descriptor resolves to, before query merging.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::InvalidArgument`] for an unknown model on a
    /// mapped path or an unparseable URL.
    pub fn resolve_url(&self, descriptor: &RequestDescriptor) -> Result<Url> {
        match self.backend.resolve_path(descriptor.path(), descriptor.model())? {
            Some(resolved) => Url::parse(&resolved)
                .map_err(|e| ErnieError::InvalidArgument(format!("invalid URL {resolved}: {e}"))),
            None => join_url(&self.base_url, descriptor.path()),
        }
    }

    /// Sends one request and routes the response.
    ///
    /// # Errors
    ///
    /// - [`ErnieError::UserAbort`] if the token was cancelled before or during
    ///   the call.
    /// - [`ErnieError::ConnectionTimeout`] if the timeout elapsed first.
    /// - [`ErnieError::InvalidArgument`] if the URL cannot be resolved.
    /// - [`ErnieError::Api`] for a non-success status or a vendor error code.
    /// - [`ErnieError::Connection`] for network failures.
    pub async fn dispatch(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        let cancel = descriptor.cancel_token().clone();
        if cancel.is_cancelled() {
            return Err(ErnieError::UserAbort);
        }
        let url = self.resolve_url(&descriptor)?;
        let deadline = Instant::now() + descriptor.timeout().unwrap_or(self.timeout);

        let response = guarded(&cancel, deadline, self.send(&descriptor, url)).await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = descriptor.path(), error = %e, "request failed");
                return Err(e);
            }
        };
        tracing::debug!(
            status = response.status,
            content_type = response.header("content-type").unwrap_or_default(),
            "response received"
        );

        let result = self.route(response, &descriptor, &cancel, deadline).await;
        if let Err(e) = &result {
            tracing::warn!(path = descriptor.path(), error = %e, "request failed");
        }
        result
    }

    async fn send(&self, descriptor: &RequestDescriptor, mut url: Url) -> Result<HttpResponse> {
        let defaults = self.backend.default_query().await?;
        merge_query(&mut url, defaults, descriptor.query());

        // The backend sees the headers that will be sent, so a signature
        // covers the caller's values too. Caller headers still win over auth.
        let mut headers = self.default_headers(descriptor.is_stream());
        merge_headers(&mut headers, descriptor.headers().iter().cloned());
        let auth = self
            .backend
            .auth_headers(&AuthContext {
                method: descriptor.method(),
                url: &url,
                headers: &headers,
            })
            .await?;
        merge_headers(&mut headers, auth);
        merge_headers(&mut headers, descriptor.headers().iter().cloned());

        let body = descriptor
            .body()
            .map(serde_json::to_vec)
            .transpose()?
            .map(Bytes::from);

        tracing::debug!(
            method = %descriptor.method(),
            url = %redact(&url),
            stream = descriptor.is_stream(),
            "dispatching request"
        );
        self.transport
            .send(HttpRequest {
                method: descriptor.method(),
                url,
                headers,
                body,
            })
            .await
    }

    async fn route(
        &self,
        response: HttpResponse,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<ApiResponse> {
        let status = response.status;
        let headers = response.headers.clone();
        let is_json = response
            .header("content-type")
            .is_some_and(|ct| ct.contains("application/json"));

        if !response.is_success() {
            let text = guarded(cancel, deadline, response.text()).await?;
            return Err(ApiError::from_status(status, &text, headers).into());
        }

        if descriptor.is_stream() && !is_json {
            return Ok(ApiResponse::Stream(EventStream::new(
                response.body,
                cancel.clone(),
                headers,
            )));
        }

        let bytes = guarded(cancel, deadline, response.bytes()).await?;
        if !is_json {
            return Ok(ApiResponse::Text {
                body: String::from_utf8_lossy(&bytes).into_owned(),
                headers,
            });
        }
        let json: Value = serde_json::from_slice(&bytes)?;
        if let Some(err) = ApiError::from_envelope(&json, &headers) {
            return Err(err.into());
        }
        Ok(ApiResponse::Json {
            body: self.backend.transform_response(json),
            headers,
        })
    }

    fn default_headers(&self, stream: bool) -> Headers {
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        vec![
            ("Accept".into(), accept.into()),
            ("Content-Type".into(), "application/json".into()),
            ("User-Agent".into(), self.user_agent.clone()),
        ]
    }

    /// `POST /chat/completions`, streaming when `body.stream` is `true`.
    ///
    /// # Errors
    ///
    /// See [`ErnieClient::dispatch`].
    pub async fn chat_completions(&self, body: Value, cancel: CancellationToken) -> Result<ApiResponse> {
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        self.dispatch(
            RequestDescriptor::builder()
                .method(Method::Post)
                .path("/chat/completions")
                .body(body)
                .stream(stream)
                .cancel(cancel)
                .build(),
        )
        .await
    }

    /// `POST /embeddings`. Never streams.
    ///
    /// # Errors
    ///
    /// See [`ErnieClient::dispatch`]. A non-JSON body is a
    /// [`ErnieError::Serialization`] error.
    pub async fn embeddings(&self, body: Value, cancel: CancellationToken) -> Result<Value> {
        self.dispatch(
            RequestDescriptor::builder()
                .method(Method::Post)
                .path("/embeddings")
                .body(body)
                .cancel(cancel)
                .build(),
        )
        .await?
        .into_json()
    }

    /// # Errors
    ///
    /// See [`ErnieClient::dispatch`].
    pub async fn get(&self, path: &str, cancel: CancellationToken) -> Result<ApiResponse> {
        self.dispatch(
            RequestDescriptor::builder()
                .method(Method::Get)
                .path(path)
                .cancel(cancel)
                .build(),
        )
        .await
    }

    /// # Errors
    ///
    /// See [`ErnieClient::dispatch`].
    pub async fn post(&self, path: &str, body: Value, cancel: CancellationToken) -> Result<ApiResponse> {
        self.dispatch(
            RequestDescriptor::builder()
                .method(Method::Post)
                .path(path)
                .body(body)
                .cancel(cancel)
                .build(),
        )
        .await
    }
}

impl std::fmt::Debug for ErnieClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErnieClient")
            .field("backend", &self.backend.kind())
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Runs `work` until it completes, `cancel` fires, or `deadline` passes.
///
/// Cancellation wins every tie: a result that arrives after the token was
/// cancelled is reported as [`ErnieError::UserAbort`].
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Instant,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ErnieError::UserAbort),
        () = tokio::time::sleep_until(deadline) => Err(ErnieError::ConnectionTimeout),
        result = work => {
            if cancel.is_cancelled() {
                Err(ErnieError::UserAbort)
            } else {
                result
            }
        }
    }
}

/// Merges the URL's own query, then `defaults`, then `explicit`; a later
/// value replaces an earlier one with the same key.
fn merge_query(url: &mut Url, defaults: Vec<(String, String)>, explicit: &[(String, String)]) {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    for (key, value) in defaults.into_iter().chain(explicit.iter().cloned()) {
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => pairs.push((key, value)),
        }
    }
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}

/// Sets each header, replacing any existing one with the same name
/// (case-insensitive).
fn merge_headers(headers: &mut Headers, overrides: impl IntoIterator<Item = (String, String)>) {
    for (name, value) in overrides {
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        headers.push((name, value));
    }
}

fn is_redacted(key: &str) -> bool {
    REDACTED_QUERY_KEYS.contains(&key)
}

fn redact(url: &Url) -> Url {
    if !url.query_pairs().any(|(k, _)| is_redacted(&k)) {
        return url.clone();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if is_redacted(&k) {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use erniebot_auth::{
        ClientCredentialsFetcher, ManualClock, SignatureEngine, TokenCache,
        signature::DEFAULT_EXPIRATION_SECS,
    };
    use erniebot_backend::{BackendKind, ResourceMap, SignedBackend, TokenBackend};
    use erniebot_config::SigningMode;
    use erniebot_types::{AccessKeyPair, ByteStream, Query, ResponseHeaders};
    use futures_util::{StreamExt as _, stream};
    use serde_json::json;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    /// Replies with canned responses and records what was sent.
    struct ScriptedTransport {
        replies: Mutex<Vec<Box<dyn FnOnce() -> HttpResponse + Send>>>,
        seen: Mutex<Vec<HttpRequest>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn reply(&self, f: impl FnOnce() -> HttpResponse + Send + 'static) {
            self.replies.lock().unwrap().push(Box::new(f));
        }

        fn json(&self, status: u16, body: Value) {
            self.reply(move || HttpResponse::from_bytes(status, json_headers(), body.to_string()));
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let reply = self.replies.lock().unwrap().remove(0);
            Ok(reply())
        }
    }

    fn json_headers() -> ResponseHeaders {
        ResponseHeaders::from([("content-type".into(), "application/json; charset=utf-8".into())])
    }

    fn sse_headers() -> ResponseHeaders {
        ResponseHeaders::from([("content-type".into(), "text/event-stream".into())])
    }

    /// A backend that supplies a query default and an auth header.
    struct FakeBackend {
        resources: ResourceMap,
        query_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                resources: ResourceMap::ernie(),
                query_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BackendAdapter for FakeBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Qianfan
        }

        fn base_url(&self) -> &str {
            "https://vendor.test/v1"
        }

        fn resources(&self) -> &ResourceMap {
            &self.resources
        }

        async fn default_query(&self) -> Result<Query> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                ("access_token".into(), "backend-token".into()),
                ("lang".into(), "zh".into()),
            ])
        }

        async fn auth_headers(&self, ctx: &AuthContext<'_>) -> Result<Headers> {
            assert!(ctx.url.query().unwrap_or_default().contains("access_token"));
            Ok(vec![
                ("authorization".into(), "backend-auth".into()),
                ("x-trace".into(), "backend".into()),
            ])
        }
    }

    fn client_with(backend: Arc<dyn BackendAdapter>, transport: Arc<ScriptedTransport>) -> ErnieClient {
        ErnieClient::new(backend, transport)
    }

    fn chat_body() -> Value {
        json!({"model": "ernie-bot", "messages": [{"role": "user", "content": "hi"}]})
    }

    #[tokio::test]
    async fn test_resolves_model_to_vendor_url() {
        let transport = ScriptedTransport::new();
        transport.json(200, json!({"id": "as-1"}));
        let client = client_with(Arc::new(FakeBackend::new()), transport.clone());

        client.chat_completions(chat_body(), CancellationToken::new()).await.unwrap();
        let sent = transport.sent();
        assert_eq!(sent[0].url.path(), "/v1/chat/completions");
        assert_eq!(sent[0].method, Method::Post);
        let body: Value = serde_json::from_slice(sent[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["model"], "ernie-bot");
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_network() {
        let transport = ScriptedTransport::new();
        let backend = Arc::new(FakeBackend::new());
        let client = client_with(backend.clone(), transport.clone());

        let err = client
            .chat_completions(json!({"model": "gpt-4", "messages": []}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ErnieError::InvalidArgument(_)));
        assert!(transport.sent().is_empty());
        assert_eq!(backend.query_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmapped_path_joins_base_url() {
        let transport = ScriptedTransport::new();
        transport.json(200, json!({"ok": true}));
        let client = client_with(Arc::new(FakeBackend::new()), transport.clone())
            .with_base_url("https://override.test/api/");

        client.get("/models", CancellationToken::new()).await.unwrap();
        let url = &transport.sent()[0].url;
        assert_eq!(url.host_str(), Some("override.test"));
        assert_eq!(url.path(), "/api/models");
    }

    #[tokio::test]
    async fn test_query_and_header_precedence() {
        let transport = ScriptedTransport::new();
        transport.json(200, json!({}));
        let client = client_with(Arc::new(FakeBackend::new()), transport.clone());

        let descriptor = RequestDescriptor::builder()
            .method(Method::Post)
            .path("/chat/completions")
            .body(chat_body())
            .query(vec![("access_token".into(), "caller-token".into())])
            .headers(vec![
                ("X-Trace".into(), "caller".into()),
                ("accept".into(), "application/x-custom".into()),
            ])
            .build();
        client.dispatch(descriptor).await.unwrap();

        let req = &transport.sent()[0];
        let pairs: Vec<(String, String)> = req.url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("access_token".to_string(), "caller-token".to_string()),
                ("lang".to_string(), "zh".to_string()),
            ]
        );
        assert_eq!(req.header("authorization"), Some("backend-auth"));
        assert_eq!(req.header("x-trace"), Some("caller"));
        assert_eq!(req.header("Accept"), Some("application/x-custom"));
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.header("user-agent").unwrap().starts_with("ErnieBot/Rust-SDK"));
        let accepts = req.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("accept")).count();
        assert_eq!(accepts, 1);
    }

    #[tokio::test]
    async fn test_accept_header_follows_stream_flag() {
        let transport = ScriptedTransport::new();
        transport.reply(|| HttpResponse::from_bytes(200, sse_headers(), "data: [DONE]\n\n"));
        let client = client_with(Arc::new(FakeBackend::new()), transport.clone());

        let mut body = chat_body();
        body["stream"] = json!(true);
        let response = client.chat_completions(body, CancellationToken::new()).await.unwrap();
        assert!(response.is_stream());
        assert_eq!(transport.sent()[0].header("accept"), Some("text/event-stream"));
    }

    #[tokio::test]
    async fn test_vendor_code_110_is_401() {
        let transport = ScriptedTransport::new();
        transport.json(200, json!({"error_code": 110, "error_msg": "Access token invalid or no longer valid"}));
        let client = client_with(Arc::new(FakeBackend::new()), transport);

        let err = client.chat_completions(chat_body(), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.vendor_code(), Some(110));
    }

    #[tokio::test]
    async fn test_non_success_status_keeps_headers() {
        let transport = ScriptedTransport::new();
        transport.reply(|| {
            let headers = ResponseHeaders::from([
                ("content-type".into(), "application/json".into()),
                ("x-request-id".into(), "req-9".into()),
            ]);
            HttpResponse::from_bytes(429, headers, r#"{"error_code":18,"error_msg":"qps limit"}"#)
        });
        let client = client_with(Arc::new(FakeBackend::new()), transport);

        let err = client.chat_completions(chat_body(), CancellationToken::new()).await.unwrap_err();
        let ErnieError::Api(api) = err else {
            panic!("expected an API error");
        };
        assert_eq!(api.status(), Some(429));
        assert_eq!(api.code(), Some(18));
        assert_eq!(api.headers()["x-request-id"], "req-9");
        assert_eq!(api.to_string(), "429 qps limit");
    }

    #[tokio::test]
    async fn test_text_body_returned_as_text() {
        let transport = ScriptedTransport::new();
        transport.reply(|| {
            let headers = ResponseHeaders::from([("content-type".into(), "text/plain".into())]);
            HttpResponse::from_bytes(200, headers, "pong")
        });
        let client = client_with(Arc::new(FakeBackend::new()), transport);

        let response = client.get("/ping", CancellationToken::new()).await.unwrap();
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert!(matches!(response, ApiResponse::Text { body, .. } if body == "pong"));
    }

    #[tokio::test]
    async fn test_json_error_on_stream_request_is_reported() {
        let transport = ScriptedTransport::new();
        transport.json(200, json!({"error_code": 17, "error_msg": "Open api daily request limit reached"}));
        let client = client_with(Arc::new(FakeBackend::new()), transport);

        let mut body = chat_body();
        body["stream"] = json!(true);
        let err = client.chat_completions(body, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(429));
    }

    #[tokio::test]
    async fn test_aistudio_result_unwrapped() {
        let transport = ScriptedTransport::new();
        transport.json(200, json!({"errorCode": 0, "errorMsg": "success", "result": {"id": "as-2", "result": "hello"}}));
        let client = client_with(Arc::new(TokenBackend::new(Some("tok".into()))), transport.clone());

        let json = client.chat_completions(chat_body(), CancellationToken::new()).await.unwrap().into_json().unwrap();
        assert_eq!(json, json!({"id": "as-2", "result": "hello"}));
        let req = &transport.sent()[0];
        assert_eq!(req.header("authorization"), Some("token tok"));
        assert_eq!(req.url.as_str(), "https://aistudio.baidu.com/llm/lmapi/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_embeddings_require_json() {
        let transport = ScriptedTransport::new();
        transport.reply(|| {
            let headers = ResponseHeaders::from([("content-type".into(), "text/html".into())]);
            HttpResponse::from_bytes(200, headers, "<html></html>")
        });
        let client = client_with(Arc::new(FakeBackend::new()), transport);

        let err = client
            .embeddings(json!({"model": "ernie-text-embedding", "input": ["a"]}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ErnieError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_request_never_sent() {
        let transport = ScriptedTransport::new();
        let backend = Arc::new(FakeBackend::new());
        let client = client_with(backend.clone(), transport.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.chat_completions(chat_body(), cancel).await.unwrap_err();
        assert!(matches!(err, ErnieError::UserAbort));
        assert!(transport.sent().is_empty());
        assert_eq!(backend.query_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_connection_timeout() {
        let transport = ScriptedTransport::with_delay(Duration::from_secs(30));
        transport.json(200, json!({}));
        let client = client_with(Arc::new(FakeBackend::new()), transport)
            .with_timeout(Duration::from_secs(5));

        let err = client.chat_completions(chat_body(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ErnieError::ConnectionTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_descriptor_timeout_overrides_client() {
        let transport = ScriptedTransport::with_delay(Duration::from_secs(30));
        transport.json(200, json!({"ok": true}));
        let client = client_with(Arc::new(FakeBackend::new()), transport)
            .with_timeout(Duration::from_secs(5));

        let descriptor = RequestDescriptor::builder()
            .path("/ping")
            .timeout(Duration::from_secs(60))
            .build();
        assert!(client.dispatch(descriptor).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_abort_during_call() {
        let transport = ScriptedTransport::with_delay(Duration::from_secs(30));
        transport.json(200, json!({}));
        let client = client_with(Arc::new(FakeBackend::new()), transport)
            .with_timeout(Duration::from_secs(60));

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });
        let err = client.chat_completions(chat_body(), cancel).await.unwrap_err();
        assert!(matches!(err, ErnieError::UserAbort));
    }

    /// Cancels the caller's token while the call is in flight, then answers 200.
    struct CancelThenOk {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Transport for CancelThenOk {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            self.cancel.cancel();
            Ok(HttpResponse::from_bytes(200, json_headers(), r#"{"ok":true}"#))
        }
    }

    #[tokio::test]
    async fn test_cancel_before_success_reports_abort() {
        let cancel = CancellationToken::new();
        let transport = Arc::new(CancelThenOk {
            cancel: cancel.clone(),
        });
        let client = ErnieClient::new(Arc::new(FakeBackend::new()), transport);

        let err = client.chat_completions(chat_body(), cancel).await.unwrap_err();
        assert!(matches!(err, ErnieError::UserAbort));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_elapsed_deadline() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let deadline = Instant::now();

        let pending = guarded(&cancel, deadline, std::future::pending::<Result<()>>()).await;
        assert!(matches!(pending, Err(ErnieError::UserAbort)));

        let ready = guarded(&cancel, deadline, async { Ok(()) }).await;
        assert!(matches!(ready, Err(ErnieError::UserAbort)));

        let live = CancellationToken::new();
        let timed_out = guarded(&live, deadline, std::future::pending::<Result<()>>()).await;
        assert!(matches!(timed_out, Err(ErnieError::ConnectionTimeout)));
    }

    #[tokio::test]
    async fn test_iam_signature_covers_caller_headers() {
        let transport = ScriptedTransport::new();
        transport.json(200, json!({"id": "as-3"}));
        let start = chrono::DateTime::parse_from_rfc3339("2023-10-01T08:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let pair = AccessKeyPair::new("AKIDEXAMPLE", "SECRETKEYEXAMPLE");
        let tokens = Arc::new(TokenCache::new(Arc::new(ClientCredentialsFetcher::new(
            transport.clone(),
        ))));
        let backend = SignedBackend::new(Some(pair.clone()), tokens)
            .with_signing(SigningMode::Iam, &[])
            .with_clock(Arc::new(ManualClock::new(start)));
        let client = client_with(Arc::new(backend), transport.clone());

        let descriptor = RequestDescriptor::builder()
            .method(Method::Post)
            .path("/chat/completions")
            .body(chat_body())
            .headers(vec![(
                "Content-Type".into(),
                "application/json; charset=utf-8".into(),
            )])
            .build();
        client.dispatch(descriptor).await.unwrap();

        let req = &transport.sent()[0];
        assert_eq!(req.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(req.header("x-bce-date"), Some("2023-10-01T08:00:00Z"));

        let mut on_wire = req.headers.clone();
        on_wire.push(("host".into(), req.url.host_str().unwrap().into()));
        let query: Query = req.url.query_pairs().into_owned().collect();
        let expected = SignatureEngine::new(pair)
            .with_headers_to_sign(["host", "content-type", "x-bce-date"])
            .sign(
                req.method.as_str(),
                req.url.path(),
                &query,
                &on_wire,
                start,
                DEFAULT_EXPIRATION_SECS,
            );
        assert_eq!(req.header("authorization"), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_streaming_end_to_end() {
        let transport = ScriptedTransport::new();
        transport.reply(|| {
            let chunks: Vec<Result<bytes::Bytes>> = vec![
                Ok("data: {\"result\":\"你\"}\n\ndata: {\"res".into()),
                Ok("ult\":\"好\"}\n\ndata: [DONE]\n\n".into()),
            ];
            let body: ByteStream = Box::pin(stream::iter(chunks));
            HttpResponse::new(200, sse_headers(), body)
        });
        let client = client_with(Arc::new(FakeBackend::new()), transport);

        let mut body = chat_body();
        body["stream"] = json!(true);
        let events = client
            .chat_completions(body, CancellationToken::new())
            .await
            .unwrap()
            .into_stream()
            .unwrap()
            .json::<Value>();
        let results: Vec<String> = events
            .map(|e| e.unwrap()["result"].as_str().unwrap().to_string())
            .collect()
            .await;
        assert_eq!(results, vec!["你", "好"]);
    }

    #[test]
    fn test_merge_query_replaces_existing_keys() {
        let mut url = Url::parse("https://h.test/p?a=0&keep=1").unwrap();
        merge_query(
            &mut url,
            vec![("a".into(), "1".into()), ("b".into(), "2".into())],
            &[("b".into(), "3".into())],
        );
        assert_eq!(url.query(), Some("a=1&keep=1&b=3"));

        let mut bare = Url::parse("https://h.test/p").unwrap();
        merge_query(&mut bare, Vec::new(), &[]);
        assert_eq!(bare.query(), None);
    }

    #[test]
    fn test_redact_hides_access_token() {
        let url = Url::parse("https://h.test/p?access_token=secret&x=1").unwrap();
        let shown = redact(&url).to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("x=1"));
    }
}
