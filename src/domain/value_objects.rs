use anyhow::{Result, anyhow, bail};
use hyper::http::Uri;
use serde_json::{Map, Value};
use std::fmt;

/// Represents a validated URL
#[derive(Debug, Clone)]
pub struct Url(pub Uri);

impl Url {
    /// Creates a new Url with validation
    ///
    /// # Arguments
    /// * `url` - The URL string to parse
    ///
    /// # Returns
    /// * `Ok(Url)` - Validated URL
    /// * `Err(anyhow::Error)` - If the URL is invalid
    pub fn new(url: &str) -> Result<Self> {
        let uri = url.parse::<Uri>().map_err(|e| anyhow!("Invalid URL: {}", e))?;
        Ok(Url(uri))
    }

    /// Returns a copy of this URL with `params` appended to its query string
    pub fn with_query(&self, params: &KeyValuePairs) -> Result<Self> {
        if params.is_empty() {
            return Ok(self.clone());
        }
        Url::new(&append_query(&self.as_str(), params))
    }

    /// Returns the URL as a string
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    pub fn is_https(&self) -> bool {
        self.0.scheme_str() == Some("https")
    }

    pub fn host(&self) -> Option<&str> {
        self.0.host()
    }

    /// Port from the URL, or the scheme default
    pub fn port(&self) -> u16 {
        self.0
            .port_u16()
            .unwrap_or(if self.is_https() { 443 } else { 80 })
    }

    /// `Host` header value: the host, plus the port when it is explicit
    pub fn authority(&self) -> String {
        match self.0.authority() {
            Some(authority) => authority.as_str().to_string(),
            None => String::new(),
        }
    }

    /// Resolves a `Location`-style reference against this URL
    ///
    /// Absolute references replace the URL, `//host` keeps the scheme,
    /// `/path` keeps the origin, and anything else is taken relative to
    /// the current path's directory. Fragments are dropped.
    pub fn join(&self, reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let reference = reference.split_once('#').map_or(reference, |(r, _)| r);
        if reference.is_empty() {
            return Ok(self.clone());
        }
        if has_scheme(reference) {
            return Url::new(reference);
        }

        let scheme = self.0.scheme_str().unwrap_or("http");
        let origin = format!("{}://{}", scheme, self.authority());
        let joined = if let Some(rest) = reference.strip_prefix("//") {
            format!("{}://{}", scheme, rest)
        } else if reference.starts_with('/') {
            format!("{}{}", origin, reference)
        } else if reference.starts_with('?') {
            format!("{}{}{}", origin, self.0.path(), reference)
        } else {
            let path = self.0.path();
            let dir = &path[..path.rfind('/').map_or(0, |i| i + 1)];
            let dir = if dir.is_empty() { "/" } else { dir };
            format!("{}{}{}", origin, dir, reference)
        };
        Url::new(&joined)
    }

    /// Path and query used as the request target on the wire
    pub fn request_target(&self) -> String {
        match self.0.path_and_query().map(|pq| pq.as_str()) {
            Some(target) if target.starts_with('/') => target.to_string(),
            Some(target) => format!("/{}", target),
            None => "/".to_string(),
        }
    }
}

fn has_scheme(reference: &str) -> bool {
    match reference.split_once(':') {
        Some((scheme, _)) => {
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Request payload ready to be sent as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub content: String,
    pub is_json: bool,
}

impl RequestBody {
    /// Body taken verbatim, e.g. piped in on stdin
    pub fn raw(content: impl Into<String>) -> Self {
        let content = content.into();
        let is_json = serde_json::from_str::<Value>(&content).is_ok();
        Self { content, is_json }
    }

    /// Interprets a `--body` flag value
    ///
    /// A valid JSON document is kept verbatim; anything else must be
    /// `key=value[,key=value...]` and is encoded as a flat JSON object.
    /// An empty value means no body.
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if serde_json::from_str::<Value>(trimmed).is_ok() {
            return Ok(Some(Self { content: trimmed.to_string(), is_json: true }));
        }

        let pairs = KeyValuePairs::parse(trimmed)
            .map_err(|e| anyhow!("Invalid body: {}", e))?;
        let object: Map<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        let content = serde_json::to_string(&Value::Object(object))
            .map_err(|e| anyhow!("Failed to encode body: {}", e))?;
        Ok(Some(Self { content, is_json: true }))
    }
}

/// Ordered `key=value` pairs as given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValuePairs(Vec<(String, String)>);

impl KeyValuePairs {
    /// Parses `key=value[,key=value...]`
    ///
    /// Each segment is split on its first `=`, so values may contain `=`.
    /// Empty segments are ignored; a segment without `=` is an error.
    pub fn parse(input: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for segment in input.split(',') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let Some((key, value)) = segment.split_once('=') else {
                bail!("expected key=value, got '{}'", segment);
            };
            let key = key.trim();
            if key.is_empty() {
                bail!("missing key in '{}'", segment);
            }
            pairs.push((key.to_string(), value.trim().to_string()));
        }
        Ok(Self(pairs))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<Vec<(String, String)>> for KeyValuePairs {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

/// A WebSocket endpoint with its scheme normalised to `ws`/`wss`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl(String);

impl WsUrl {
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| anyhow!("Invalid URL '{}': missing scheme", raw))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => bail!("Unsupported scheme '{}': use ws, wss, http or https", other),
        };
        let normalized = format!("{}://{}", scheme, rest);
        let uri = normalized
            .parse::<Uri>()
            .map_err(|e| anyhow!("Invalid URL: {}", e))?;
        if uri.host().is_none_or(str::is_empty) {
            bail!("Invalid URL '{}': missing host", raw);
        }
        Ok(Self(normalized))
    }

    pub fn with_query(&self, params: &KeyValuePairs) -> Self {
        Self(append_query(&self.0, params))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Appends percent-encoded `params` to `url`'s query string
pub fn append_query(url: &str, params: &KeyValuePairs) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&");

    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = match base.find('?') {
        Some(i) if i + 1 == base.len() || base.ends_with('&') => "",
        Some(_) => "&",
        None => "?",
    };
    let mut out = format!("{}{}{}", base, separator, query);
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Percent-encodes everything outside the RFC 3986 unreserved set
fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
