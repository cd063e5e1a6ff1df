use crate::domain::entities::{Request, Response};
use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::info;

/// Trait for HTTP clients to enable mocking and dependency inversion
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Application service for orchestrating HTTP request workflows
pub struct HttpRequestService {
    http_client: Box<dyn HttpClient>,
}

impl HttpRequestService {
    pub fn new(http_client: Box<dyn HttpClient>) -> Self {
        Self { http_client }
    }

    /// Validates and sends a single request
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        RequestValidator::validate(&request)?;
        info!(method = %request.method, url = %request.url.as_str(), "sending request");
        self.http_client.send(request).await
    }
}

/// Rules a request must satisfy before it goes on the wire
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate(request: &Request) -> Result<()> {
        Self::validate_url(&request.url)?;
        Self::validate_method_body_combination(request)?;
        Ok(())
    }

    fn validate_url(url: &crate::domain::value_objects::Url) -> Result<()> {
        let url_str = url.as_str();

        if url_str.is_empty() {
            bail!("URL cannot be empty");
        }
        if !url_str.starts_with("http://") && !url_str.starts_with("https://") {
            bail!("URL must start with http:// or https://");
        }
        if url.host().is_none_or(str::is_empty) {
            bail!("URL must include a host");
        }
        Ok(())
    }

    fn validate_method_body_combination(request: &Request) -> Result<()> {
        match (&request.method, &request.body) {
            (method, Some(_)) if method.forbids_body() => {
                bail!("{} requests should not have a body", method)
            }
            _ => Ok(()),
        }
    }
}
