use crate::domain::entities::{Method, Request};
use crate::domain::value_objects::{KeyValuePairs, RequestBody, Url};
use anyhow::{Result, anyhow};

/// Assembles a [`Request`] from command-line pieces
///
/// Params are folded into the URL at build time, so `url` and `params` may
/// be given in either order.
#[derive(Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    url: Option<Url>,
    headers: Vec<(String, String)>,
    params: KeyValuePairs,
    body: Option<RequestBody>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn url(mut self, raw_url: &str) -> Result<Self> {
        self.url = Some(Url::new(raw_url)?);
        Ok(self)
    }

    /// Later headers replace earlier ones with the same (case-insensitive) name
    pub fn headers(mut self, headers: &KeyValuePairs) -> Self {
        for (key, value) in headers.iter() {
            self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(key));
            self.headers.push((key.to_string(), value.to_string()));
        }
        self
    }

    pub fn params(mut self, params: &KeyValuePairs) -> Self {
        let mut merged: Vec<(String, String)> = self
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        merged.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self.params = KeyValuePairs::from(merged);
        self
    }

    pub fn body(mut self, body: Option<RequestBody>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Result<Request> {
        let method = self.method.ok_or_else(|| anyhow!("Method is required"))?;
        let url = self
            .url
            .ok_or_else(|| anyhow!("URL is required"))?
            .with_query(&self.params)?;

        Ok(Request {
            method,
            url,
            headers: self.headers,
            body: self.body,
        })
    }
}
