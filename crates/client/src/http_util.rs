//! The production [`Transport`] on top of `rquest`.

use async_trait::async_trait;
use erniebot_types::{
    ByteStream, ErnieError, HttpRequest, HttpResponse, Method, ResponseHeaders, Result, Transport,
};
use futures_util::StreamExt as _;
use rquest::Client;

/// Sends requests through a shared `rquest` client.
#[derive(Clone)]
pub struct RquestTransport {
    http: Client,
}

impl RquestTransport {
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Converts an `rquest::Response` body into a `ByteStream`.
    #[must_use]
    pub fn byte_stream(resp: rquest::Response) -> ByteStream {
        Box::pin(
            resp.bytes_stream()
                .map(|r| r.map_err(|e| ErnieError::Connection(e.to_string()))),
        )
    }
}

fn to_rquest_method(method: Method) -> rquest::Method {
    match method {
        Method::Get => rquest::Method::GET,
        Method::Post => rquest::Method::POST,
        Method::Put => rquest::Method::PUT,
        Method::Patch => rquest::Method::PATCH,
        Method::Delete => rquest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for RquestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .http
            .request(to_rquest_method(request.method), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers: ResponseHeaders = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        Ok(HttpResponse::new(status, headers, Self::byte_stream(resp)))
    }
}

/// Build an HTTP client, optionally configured with a proxy URL.
#[must_use]
pub fn build_http_client(proxy_url: Option<&str>) -> Client {
    if let Some(url) = proxy_url {
        match rquest::Proxy::all(url) {
            Ok(proxy) => {
                return Client::builder()
                    .proxy(proxy)
                    .build()
                    .unwrap_or_else(|_| Client::new());
            }
            Err(e) => {
                tracing::warn!(url = url, error = %e, "invalid proxy_url, using direct connection");
            }
        }
    }
    Client::new()
}
