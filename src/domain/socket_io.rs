//! Socket.IO over the WebSocket transport.
//!
//! Every WebSocket text frame carries one Engine.IO packet. Socket.IO
//! packets ride inside Engine.IO `message` packets, so an event in the root
//! namespace reads `42["name",{...}]` and one in `/chat` reads
//! `42/chat,["name",{...}]`.

use crate::domain::value_objects::{KeyValuePairs, WsUrl, append_query};
use anyhow::{Result, anyhow};
use hyper::http::Uri;
use serde_json::{Value, json};
use std::time::Duration;

const ENGINE_IO_VERSION: &str = "4";
pub const ROOT_NAMESPACE: &str = "/";
const ENDPOINT_PATH: &str = "/socket.io/";

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake data sent by the server
    Open(Value),
    Close,
    Ping,
    Pong,
    /// Namespace join request, or the server's acknowledgement of one
    Connect { namespace: String, payload: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, name: String, args: Vec<Value> },
    ConnectError { namespace: String, message: String },
    /// Anything this client does not act on, kept verbatim
    Other(String),
}

impl Packet {
    pub fn event(namespace: &str, name: &str, data: Option<Value>) -> Self {
        Packet::Event {
            namespace: namespace.to_string(),
            name: name.to_string(),
            args: data.into_iter().collect(),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(data) => format!("0{}", data),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Connect { namespace, payload } => format!(
                "40{}{}",
                namespace_prefix(namespace),
                payload.as_ref().map(Value::to_string).unwrap_or_default()
            ),
            Packet::Disconnect { namespace } => format!("41{}", namespace_prefix(namespace)),
            Packet::Event { namespace, name, args } => {
                let mut items = vec![Value::String(name.clone())];
                items.extend(args.iter().cloned());
                format!("42{}{}", namespace_prefix(namespace), Value::Array(items))
            }
            Packet::ConnectError { namespace, message } => format!(
                "44{}{}",
                namespace_prefix(namespace),
                json!({ "message": message })
            ),
            Packet::Other(raw) => raw.clone(),
        }
    }

    /// Never fails: unknown or malformed frames come back as [`Packet::Other`]
    pub fn decode(raw: &str) -> Self {
        let parsed = match raw.as_bytes().first() {
            Some(b'0') => serde_json::from_str(&raw[1..]).ok().map(Packet::Open),
            Some(b'1') => Some(Packet::Close),
            Some(b'2') => Some(Packet::Ping),
            Some(b'3') => Some(Packet::Pong),
            Some(b'4') => decode_message(&raw[1..]),
            _ => None,
        };
        parsed.unwrap_or_else(|| Packet::Other(raw.to_string()))
    }
}

fn decode_message(body: &str) -> Option<Packet> {
    let kind = *body.as_bytes().first().filter(|b| b.is_ascii_digit())?;
    let (namespace, rest) = split_namespace(&body[1..]);
    // acknowledgement ids are not used here
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        b'0' => Some(Packet::Connect { namespace, payload: serde_json::from_str(rest).ok() }),
        b'1' => Some(Packet::Disconnect { namespace }),
        b'2' => {
            let Value::Array(mut items) = serde_json::from_str(rest).ok()? else {
                return None;
            };
            if items.is_empty() {
                return None;
            }
            let Value::String(name) = items.remove(0) else {
                return None;
            };
            Some(Packet::Event { namespace, name, args: items })
        }
        b'4' => {
            let message = match serde_json::from_str::<Value>(rest) {
                Ok(Value::Object(fields)) => fields
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(rest)
                    .to_string(),
                Ok(Value::String(text)) => text,
                _ => rest.to_string(),
            };
            Some(Packet::ConnectError { namespace, message })
        }
        _ => None,
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (ROOT_NAMESPACE.to_string(), rest);
    }
    match rest.split_once(',') {
        Some((namespace, tail)) => (namespace.to_string(), tail),
        None => (rest.to_string(), ""),
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == ROOT_NAMESPACE {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

/// `""`, `"/"` and `"chat"` become `"/"`, `"/"` and `"/chat"`
pub fn normalize_namespace(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT_NAMESPACE.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// The handshake URL for `server`
///
/// `/socket.io/` is appended to the path unless already there, and the
/// query gains `EIO=4&transport=websocket`. `params` come last and replace
/// any earlier value for the same key.
pub fn endpoint(server: &WsUrl, params: &KeyValuePairs) -> Result<WsUrl> {
    let uri = server
        .as_str()
        .parse::<Uri>()
        .map_err(|e| anyhow!("Invalid URL: {}", e))?;
    let scheme = uri.scheme_str().unwrap_or("ws");
    let authority = uri
        .authority()
        .ok_or_else(|| anyhow!("Invalid URL '{}': missing host", server))?;

    let path = uri.path();
    let path = if path.ends_with(ENDPOINT_PATH) {
        path.to_string()
    } else {
        format!("{}{}", path.trim_end_matches('/'), ENDPOINT_PATH)
    };

    let mut pairs: Vec<(String, String)> = vec![
        ("EIO".to_string(), ENGINE_IO_VERSION.to_string()),
        ("transport".to_string(), "websocket".to_string()),
    ];
    for (key, value) in params.iter() {
        pairs.retain(|(existing, _)| existing != key);
        pairs.push((key.to_string(), value.to_string()));
    }

    let kept: Vec<&str> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|segment| {
            let key = segment.split('=').next().unwrap_or_default();
            !segment.is_empty() && !pairs.iter().any(|(k, _)| k == key)
        })
        .collect();
    let mut base = format!("{}://{}{}", scheme, authority, path);
    if !kept.is_empty() {
        base.push('?');
        base.push_str(&kept.join("&"));
    }
    WsUrl::new(&append_query(&base, &KeyValuePairs::from(pairs)))
}

/// What a one-shot Socket.IO command does once connected
#[derive(Debug, Clone, PartialEq)]
pub enum SocketIoAction {
    /// Join the namespace and leave again
    Connect,
    Emit { event: String, data: Option<Value> },
    /// Collect `event` payloads until `duration` passes or the server leaves
    Listen { event: String, duration: Duration },
}

/// Outcome of a one-shot Socket.IO command
#[derive(Debug, Clone, PartialEq)]
pub struct SocketIoReport {
    pub event: String,
    pub connected: bool,
    pub data: Value,
}

/// Parses `500ms`, `5s`, `2m` or `1h`; a bare number is seconds
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| anyhow!("invalid duration '{}': expected e.g. 500ms, 5s or 1m", raw))?;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(amount.saturating_mul(3600))),
        other => Err(anyhow!("invalid duration unit '{}' in '{}'", other, raw)),
    }
}

/// `5s`, `1m30s` or `250ms`
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    match (secs / 60, secs % 60) {
        (0, s) => format!("{}s", s),
        (m, 0) => format!("{}m", m),
        (m, s) => format!("{}m{}s", m, s),
    }
}
