use crate::application::services::HttpClient;
use crate::domain::entities::{Method as DomainMethod, Request, Response};
use crate::domain::value_objects::RequestBody;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, HeaderName, HeaderValue, LOCATION,
    USER_AGENT,
};
use hyper::{Method, Request as HyperRequest};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_native_tls::{TlsConnector, native_tls};
use tracing::debug;

const DEFAULT_USER_AGENT: &str = concat!("hulaki/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// Infrastructure implementation of HttpClient using Hyper
///
/// Every request gets its own HTTP/1.1 connection, wrapped in TLS for
/// `https` URLs. Redirects are followed up to ten hops, and the whole
/// exchange, every hop included, is bounded by `request_timeout`.
pub struct HyperHttpClient {
    tls: TlsConnector,
    request_timeout: Duration,
}

impl HyperHttpClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| anyhow!("Failed to initialise TLS: {}", e))?;
        Ok(Self {
            tls: TlsConnector::from(connector),
            request_timeout,
        })
    }
}

#[async_trait]
impl HttpClient for HyperHttpClient {
    async fn send(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.request_timeout, self.follow(request))
            .await
            .map_err(|_| anyhow!("Request timed out after {:?}", self.request_timeout))?
    }
}

impl HyperHttpClient {
    async fn follow(&self, mut request: Request) -> Result<Response> {
        for _ in 0..=MAX_REDIRECTS {
            let response = self.execute(request.clone()).await?;
            match RedirectPolicy::next_request(&request, &response)? {
                Some(next) => {
                    debug!(
                        status = %response.status,
                        location = %next.url.as_str(),
                        "following redirect"
                    );
                    request = next;
                }
                None => return Ok(response),
            }
        }
        bail!("Stopped after {} redirects", MAX_REDIRECTS)
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let host = request
            .url
            .host()
            .ok_or_else(|| anyhow!("URL must include a host"))?
            .to_string();
        let port = request.url.port();
        let https = request.url.is_https();
        let hyper_request = RequestAdapter::to_hyper_request(request)?;

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        debug!(%host, port, https, "connected");

        let hyper_response = if https {
            let tls = self
                .tls
                .connect(&host, tcp)
                .await
                .map_err(|e| anyhow!("TLS handshake with {} failed: {}", host, e))?;
            Self::exchange(TokioIo::new(tls), hyper_request).await?
        } else {
            Self::exchange(TokioIo::new(tcp), hyper_request).await?
        };

        ResponseAdapter::to_domain_response(hyper_response).await
    }

    async fn exchange<T>(
        io: T,
        request: HyperRequest<Full<Bytes>>,
    ) -> Result<hyper::Response<Incoming>>
    where
        T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let (mut sender, connection) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| anyhow!("HTTP handshake failed: {}", e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "connection ended with error");
            }
        });

        sender
            .send_request(request)
            .await
            .map_err(|e| anyhow!("HTTP request execution failed: {}", e))
    }
}

/// Adapter for converting domain requests to Hyper requests
struct RequestAdapter;

impl RequestAdapter {
    fn to_hyper_request(domain_request: Request) -> Result<HyperRequest<Full<Bytes>>> {
        let method = MethodAdapter::to_hyper_method(domain_request.method);
        let mut builder = HyperRequest::builder()
            .method(method)
            .uri(domain_request.url.request_target())
            .header(HOST, domain_request.url.authority())
            .header(USER_AGENT, DEFAULT_USER_AGENT);

        builder = HeaderAdapter::add_user_headers(builder, &domain_request.headers)?;
        if !domain_request.has_header(CONTENT_TYPE.as_str()) {
            builder = HeaderAdapter::add_json_content_type(builder, &domain_request.body);
        }

        builder
            .body(BodyAdapter::to_hyper_body(&domain_request.body))
            .map_err(|e| {
                anyhow!("Failed to build HTTP request for {}: {}", domain_request.url.as_str(), e)
            })
    }
}

/// Turns a 3xx response into the request for the next hop
struct RedirectPolicy;

impl RedirectPolicy {
    fn next_request(previous: &Request, response: &Response) -> Result<Option<Request>> {
        let status = response.status.as_u16();
        if !matches!(status, 301 | 302 | 303 | 307 | 308) {
            return Ok(None);
        }
        let Some(location) = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(LOCATION.as_str()))
            .map(|(_, value)| value.as_str())
        else {
            return Ok(None);
        };

        let url = previous
            .url
            .join(location)
            .with_context(|| format!("Invalid redirect location '{}'", location))?;
        let mut next = Request { url, ..previous.clone() };

        // 307 and 308 replay the request as is; the others continue with a GET
        let keeps_method = matches!(status, 307 | 308)
            || matches!(previous.method, DomainMethod::Get | DomainMethod::Head);
        if !keeps_method {
            next.method = DomainMethod::Get;
            next.body = None;
            Self::drop_headers(&mut next, &[CONTENT_TYPE, CONTENT_LENGTH]);
        }
        if next.url.authority() != previous.url.authority() {
            Self::drop_headers(&mut next, &[AUTHORIZATION, COOKIE]);
        }
        Ok(Some(next))
    }

    fn drop_headers(request: &mut Request, names: &[HeaderName]) {
        request
            .headers
            .retain(|(key, _)| !names.iter().any(|name| key.eq_ignore_ascii_case(name.as_str())));
    }
}

/// Adapter for converting domain responses from Hyper responses
struct ResponseAdapter;

impl ResponseAdapter {
    async fn to_domain_response(hyper_response: hyper::Response<Incoming>) -> Result<Response> {
        let status = hyper_response.status();
        let headers = hyper_response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = Self::extract_response_body(hyper_response).await?;

        Ok(Response { status, headers, body })
    }

    async fn extract_response_body(response: hyper::Response<Incoming>) -> Result<String> {
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?
            .to_bytes();

        String::from_utf8(body_bytes.to_vec())
            .map_err(|e| anyhow!("Response body contains invalid UTF-8: {}", e))
    }
}

/// Adapter for converting domain HTTP methods to Hyper methods
struct MethodAdapter;

impl MethodAdapter {
    fn to_hyper_method(domain_method: DomainMethod) -> Method {
        match domain_method {
            DomainMethod::Get => Method::GET,
            DomainMethod::Post => Method::POST,
            DomainMethod::Put => Method::PUT,
            DomainMethod::Delete => Method::DELETE,
            DomainMethod::Patch => Method::PATCH,
            DomainMethod::Head => Method::HEAD,
            DomainMethod::Options => Method::OPTIONS,
        }
    }
}

/// Adapter for converting domain request bodies to Hyper bodies
struct BodyAdapter;

impl BodyAdapter {
    fn to_hyper_body(domain_body: &Option<RequestBody>) -> Full<Bytes> {
        match domain_body {
            Some(body) => Full::new(Bytes::from(body.content.clone())),
            None => Full::new(Bytes::new()),
        }
    }
}

/// Adapter for handling HTTP headers
struct HeaderAdapter;

impl HeaderAdapter {
    fn add_user_headers(
        mut builder: http::request::Builder,
        headers: &[(String, String)],
    ) -> Result<http::request::Builder> {
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{}': {}", key, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid value for header '{}': {}", key, e))?;
            builder = builder.header(name, value);
        }
        Ok(builder)
    }

    fn add_json_content_type(
        builder: http::request::Builder,
        body: &Option<RequestBody>,
    ) -> http::request::Builder {
        match body {
            Some(body) if body.is_json => {
                builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            }
            _ => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::builders::request_builder::RequestBuilder;
    use crate::domain::value_objects::KeyValuePairs;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const FOUND_FINAL: &str =
        "HTTP/1.1 302 Found\r\nLocation: /final\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const OK_DONE: &str =
        "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndone";

    /// Reads one request, headers and `Content-Length` body included
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text
                    .lines()
                    .map(str::to_ascii_lowercase)
                    .find_map(|l| l.strip_prefix("content-length:")?.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    /// Answers one connection per canned response, in order, and reports
    /// every raw request it saw
    async fn serve(responses: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let raw = read_request(&mut stream).await;
                stream.write_all(response.as_bytes()).await.unwrap();
                let _ = tx.send(raw);
            }
        });
        (format!("http://{}", addr), rx)
    }

    fn client() -> HyperHttpClient {
        HyperHttpClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn sends_method_target_headers_and_json_body() {
        let (base, mut seen) = serve(vec![
            concat!(
                "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\n",
                "Content-Length: 11\r\nConnection: close\r\n\r\n{\"id\":\"7\"}\n",
            ),
        ])
        .await;

        let request = RequestBuilder::new()
            .method(DomainMethod::Post)
            .url(&format!("{}/items", base))
            .unwrap()
            .params(&KeyValuePairs::parse("x=1").unwrap())
            .headers(&KeyValuePairs::parse("X-Trace=abc").unwrap())
            .body(RequestBody::parse("name=John").unwrap())
            .build()
            .unwrap();

        let response = client().send(request).await.unwrap();

        assert_eq!(response.status, hyper::StatusCode::CREATED);
        assert_eq!(response.body, "{\"id\":\"7\"}\n");
        assert!(response
            .headers
            .iter()
            .any(|(k, v)| k == "content-type" && v == "application/json"));

        let raw = seen.recv().await.unwrap();
        assert!(raw.starts_with("POST /items?x=1 HTTP/1.1\r\n"));
        let lower = raw.to_ascii_lowercase();
        assert!(lower.contains("x-trace: abc"));
        assert!(lower.contains("content-type: application/json"));
        assert!(lower.contains(&format!("host: {}", base.trim_start_matches("http://"))));
        assert!(raw.ends_with("{\"name\":\"John\"}"));
    }

    #[tokio::test]
    async fn caller_content_type_wins() {
        let (base, mut seen) =
            serve(vec!["HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"]).await;
        let request = RequestBuilder::new()
            .method(DomainMethod::Put)
            .url(&base)
            .unwrap()
            .headers(&KeyValuePairs::parse("Content-Type=text/plain").unwrap())
            .body(Some(RequestBody::raw("{}")))
            .build()
            .unwrap();

        client().send(request).await.unwrap();

        let lower = seen.recv().await.unwrap().to_ascii_lowercase();
        assert!(lower.contains("content-type: text/plain"));
        assert!(!lower.contains("application/json"));
    }

    #[tokio::test]
    async fn found_redirect_continues_as_get_without_body() {
        let (base, mut seen) = serve(vec![FOUND_FINAL, OK_DONE]).await;
        let request = RequestBuilder::new()
            .method(DomainMethod::Post)
            .url(&format!("{}/start", base))
            .unwrap()
            .body(RequestBody::parse("name=John").unwrap())
            .build()
            .unwrap();

        let response = client().send(request).await.unwrap();
        assert_eq!(response.status, hyper::StatusCode::OK);
        assert_eq!(response.body, "done");

        assert!(seen.recv().await.unwrap().starts_with("POST /start HTTP/1.1\r\n"));
        let second = seen.recv().await.unwrap();
        assert!(second.starts_with("GET /final HTTP/1.1\r\n"));
        assert!(!second.to_ascii_lowercase().contains("application/json"));
        assert!(!second.contains("John"));
    }

    #[tokio::test]
    async fn temporary_redirect_replays_method_and_body() {
        let (base, mut seen) = serve(vec![
            concat!(
                "HTTP/1.1 307 Temporary Redirect\r\nLocation: again\r\n",
                "Content-Length: 0\r\nConnection: close\r\n\r\n",
            ),
            OK_DONE,
        ])
        .await;
        let request = RequestBuilder::new()
            .method(DomainMethod::Put)
            .url(&format!("{}/v1/first", base))
            .unwrap()
            .body(Some(RequestBody::raw("{\"n\":1}")))
            .build()
            .unwrap();

        let response = client().send(request).await.unwrap();
        assert_eq!(response.body, "done");

        seen.recv().await.unwrap();
        let second = seen.recv().await.unwrap();
        assert!(second.starts_with("PUT /v1/again HTTP/1.1\r\n"));
        assert!(second.ends_with("{\"n\":1}"));
    }

    #[tokio::test]
    async fn redirect_loops_stop_after_ten_hops() {
        let (base, _seen) = serve(vec![FOUND_FINAL; MAX_REDIRECTS + 1]).await;
        let request = RequestBuilder::new()
            .method(DomainMethod::Get)
            .url(&format!("{}/final", base))
            .unwrap()
            .build()
            .unwrap();

        let err = client().send(request).await.unwrap_err();
        assert!(err.to_string().contains("Stopped after 10 redirects"));
    }

    #[test]
    fn cross_origin_redirect_drops_credentials() {
        let previous = RequestBuilder::new()
            .method(DomainMethod::Get)
            .url("http://a.example/start")
            .unwrap()
            .headers(&KeyValuePairs::parse("Authorization=Bearer x,Accept=text/plain").unwrap())
            .build()
            .unwrap();
        let response = Response {
            status: hyper::StatusCode::MOVED_PERMANENTLY,
            headers: vec![("location".into(), "http://b.example/next".into())],
            body: String::new(),
        };

        let next = RedirectPolicy::next_request(&previous, &response).unwrap().unwrap();
        assert_eq!(next.url.as_str(), "http://b.example/next");
        assert_eq!(next.headers, vec![("Accept".to_string(), "text/plain".to_string())]);

        let not_found = Response { status: hyper::StatusCode::NOT_FOUND, ..response };
        assert!(RedirectPolicy::next_request(&previous, &not_found).unwrap().is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = RequestBuilder::new()
            .method(DomainMethod::Get)
            .url(&format!("http://{}/", addr))
            .unwrap()
            .build()
            .unwrap();
        let err = client().send(request).await.unwrap_err();
        assert!(err.to_string().contains("Failed to connect"));
    }
}
