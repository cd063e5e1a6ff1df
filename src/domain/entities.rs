use crate::domain::value_objects::{RequestBody, Url};
use anyhow::{Result, anyhow};
use hyper::StatusCode;
use std::fmt;
use std::str::FromStr;

/// HTTP method enum for simplicity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    /// Methods whose requests must not carry a body
    pub fn forbids_body(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(anyhow!("Unsupported HTTP method: '{}'", other)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents an HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>, // Key-value pairs for headers
    pub body: Option<RequestBody>,
}

impl Request {
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

/// Represents an HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// One text message exchanged over a duplex connection.
///
/// The payload is opaque: nothing in the session parses or validates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(pub String);

impl Frame {
    pub fn new(text: impl Into<String>) -> Self {
        Frame(text.into())
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a message log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Sent,
    Received,
    Notice,
}

impl LogKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogKind::Sent => ">",
            LogKind::Received => "<",
            LogKind::Notice => "!",
        }
    }
}

/// A single line of the session scrollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: LogKind,
    pub text: String,
}

impl LogEntry {
    pub fn sent(text: impl Into<String>) -> Self {
        Self { kind: LogKind::Sent, text: text.into() }
    }

    pub fn received(text: impl Into<String>) -> Self {
        Self { kind: LogKind::Received, text: text.into() }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self { kind: LogKind::Notice, text: text.into() }
    }
}
