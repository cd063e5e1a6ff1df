use crate::application::builders::request_builder::RequestBuilder;
use crate::application::services::HttpRequestService;
use crate::domain::entities::Method;
use crate::domain::socket_io::{ROOT_NAMESPACE, SocketIoAction, parse_duration};
use crate::domain::value_objects::{KeyValuePairs, RequestBody, WsUrl};
use crate::infrastructure::config::Config;
use crate::infrastructure::http_client::HyperHttpClient;
use crate::infrastructure::output::{print_response, print_socket_io_report};
use crate::infrastructure::socket_io::SocketIoClient;
use crate::infrastructure::websocket::WebSocketConnection;
use crate::presentation::tui;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// CLI configuration for Hulaki
#[derive(Parser, Debug)]
#[command(name = "hulaki", version)]
#[command(about = "Hulaki: HTTP and WebSocket requests from the terminal", long_about = None)]
pub struct Cli {
    /// TOML config file (defaults to $HULAKI_CONFIG when set)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send an HTTP GET request
    Get(HttpArgs),
    /// Send an HTTP POST request
    Post(HttpArgs),
    /// Send an HTTP PUT request
    Put(HttpArgs),
    /// Send an HTTP PATCH request
    Patch(HttpArgs),
    /// Send an HTTP DELETE request
    Delete(HttpArgs),
    /// Send an HTTP HEAD request and show the response headers
    Head(HttpArgs),
    /// Send an HTTP OPTIONS request
    Options(HttpArgs),
    /// Interactive WebSocket client
    #[command(after_help = "Examples:\n  \
        hulaki ws ws://example.com/socket\n  \
        hulaki ws ws://example.com/socket --params=type=user,status=active\n  \
        hulaki ws ws://example.com/socket \
        --headers=Authorization=BearerToken,Accept=application/json")]
    Ws(WsArgs),
    /// Connect to a Socket.IO server, emit an event or listen for one
    #[command(name = "socketio")]
    #[command(after_help = "Examples:\n  \
        hulaki socketio ws://localhost:3000\n  \
        hulaki socketio ws://localhost:3000 --emit=message --data='{\"text\":\"Hello World\"}'\n  \
        hulaki socketio ws://localhost:3000 --listen=notification --duration=10s\n  \
        hulaki socketio ws://localhost:3000 --namespace=/chat")]
    SocketIo(SocketIoArgs),
}

#[derive(Args, Debug)]
pub struct HttpArgs {
    pub url: String,

    /// Custom headers, formatted as key=value pairs separated by commas
    #[arg(long, default_value = "")]
    pub headers: String,

    /// Query parameters, formatted as key=value pairs separated by commas
    #[arg(short, long, default_value = "")]
    pub params: String,

    /// Request body: JSON, key=value pairs separated by commas, or - for stdin
    #[arg(short, long)]
    pub body: Option<String>,

    /// Display only the response body
    #[arg(short, long)]
    pub less: bool,
}

#[derive(Args, Debug)]
pub struct WsArgs {
    /// ws://, wss://, http:// or https:// URL
    pub url: String,

    /// Custom headers for the handshake, formatted as key=value pairs separated by commas
    #[arg(long, default_value = "")]
    pub headers: String,

    /// Query parameters, formatted as key=value pairs separated by commas
    #[arg(short, long, default_value = "")]
    pub params: String,
}

#[derive(Args, Debug)]
pub struct SocketIoArgs {
    /// ws://, wss://, http:// or https:// server URL
    pub url: String,

    /// Event name to emit to the server
    #[arg(long, conflicts_with = "listen")]
    pub emit: Option<String>,

    /// Event name to listen for from the server
    #[arg(long)]
    pub listen: Option<String>,

    /// How long to listen for events (e.g. 500ms, 10s, 1m)
    #[arg(long, default_value = "5s", value_parser = parse_listen_duration)]
    pub duration: Duration,

    /// Event data as JSON, or - for stdin
    #[arg(long)]
    pub data: Option<String>,

    /// Socket.IO namespace to join
    #[arg(long, default_value = ROOT_NAMESPACE)]
    pub namespace: String,

    /// Custom headers for the handshake, formatted as key=value pairs separated by commas
    #[arg(long, default_value = "")]
    pub headers: String,

    /// Query parameters, formatted as key=value pairs separated by commas
    #[arg(short, long, default_value = "")]
    pub params: String,

    /// Show only the response data
    #[arg(short, long)]
    pub less: bool,
}

impl SocketIoArgs {
    fn action(&self) -> Result<SocketIoAction> {
        if let Some(event) = &self.emit {
            return Ok(SocketIoAction::Emit { event: event.clone(), data: self.event_data()? });
        }
        if let Some(event) = &self.listen {
            return Ok(SocketIoAction::Listen { event: event.clone(), duration: self.duration });
        }
        Ok(SocketIoAction::Connect)
    }

    fn event_data(&self) -> Result<Option<serde_json::Value>> {
        let raw = match self.data.as_deref() {
            Some("-") => read_stdin()?,
            Some(raw) => raw.to_string(),
            None => return Ok(None),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| anyhow!("Invalid --data JSON: {}", e))
    }
}

fn parse_listen_duration(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

impl Command {
    /// Full-screen commands own the terminal while they run
    pub fn is_interactive(&self) -> bool {
        matches!(self, Command::Ws(_))
    }

    fn http(&self) -> Option<(Method, &HttpArgs)> {
        match self {
            Command::Get(args) => Some((Method::Get, args)),
            Command::Post(args) => Some((Method::Post, args)),
            Command::Put(args) => Some((Method::Put, args)),
            Command::Patch(args) => Some((Method::Patch, args)),
            Command::Delete(args) => Some((Method::Delete, args)),
            Command::Head(args) => Some((Method::Head, args)),
            Command::Options(args) => Some((Method::Options, args)),
            Command::Ws(_) | Command::SocketIo(_) => None,
        }
    }
}

impl Cli {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match (&self.command, self.command.http()) {
            (Command::Ws(args), _) => run_ws(args, config).await,
            (Command::SocketIo(args), _) => run_socket_io(args, config).await,
            (_, Some((method, args))) => run_http(method, args, config).await,
            (_, None) => Ok(()),
        }
    }
}

async fn run_http(method: Method, args: &HttpArgs, config: &Config) -> Result<()> {
    let headers = parse_pairs("--headers", &args.headers)?;
    let params = parse_pairs("--params", &args.params)?;
    let body = match args.body.as_deref() {
        Some("-") => Some(RequestBody::raw(read_stdin()?)),
        Some(raw) => RequestBody::parse(raw)?,
        None => None,
    };

    let request = RequestBuilder::new()
        .method(method)
        .url(&args.url)?
        .headers(&headers)
        .params(&params)
        .body(body)
        .build()?;

    let client = HyperHttpClient::new(config.http.request_timeout())?;
    let request_service = HttpRequestService::new(Box::new(client));
    let response = request_service.send_request(request).await?;

    print_response(&mut std::io::stdout().lock(), method, &response, args.less)
}

async fn run_ws(args: &WsArgs, config: &Config) -> Result<()> {
    let url = WsUrl::new(&args.url)?;
    let headers = parse_pairs("--headers", &args.headers)?;
    let params = parse_pairs("--params", &args.params)?;

    let connection = WebSocketConnection::open(
        &url,
        &headers,
        &params,
        &config.websocket.connection_settings(),
    )
    .await?;
    debug!(headers = ?connection.response_headers(), "handshake response");

    if let Some(notice) = tui::run(connection, &config.websocket).await? {
        eprintln!("{}", notice.red());
    }
    Ok(())
}

async fn run_socket_io(args: &SocketIoArgs, config: &Config) -> Result<()> {
    let url = WsUrl::new(&args.url)?;
    let headers = parse_pairs("--headers", &args.headers)?;
    let params = parse_pairs("--params", &args.params)?;
    let action = args.action()?;

    let mut client = SocketIoClient::connect(
        &url,
        &headers,
        &params,
        &args.namespace,
        &config.websocket.connection_settings(),
    )
    .await
    .context("CONNECTION_FAILED")?;
    let outcome = client.perform(&action).await;
    client.close().await;
    let stage = match action {
        SocketIoAction::Emit { .. } => "EMIT_FAILED",
        _ => "LISTEN_FAILED",
    };
    let report = outcome.context(stage)?;

    print_socket_io_report(&mut std::io::stdout().lock(), &report, args.less)
}

fn read_stdin() -> Result<String> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read stdin")?;
    Ok(raw)
}

fn parse_pairs(flag: &str, raw: &str) -> Result<KeyValuePairs> {
    KeyValuePairs::parse(raw).with_context(|| format!("Invalid {} value '{}'", flag, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_subcommands_carry_their_method() {
        let cli = Cli::try_parse_from([
            "hulaki",
            "patch",
            "http://example.com",
            "--headers",
            "A=1",
            "-p",
            "q=2",
            "-b",
            "k=v",
            "-l",
        ])
        .unwrap();
        let (method, args) = cli.command.http().unwrap();
        assert_eq!(method, Method::Patch);
        assert_eq!(args.headers, "A=1");
        assert_eq!(args.params, "q=2");
        assert_eq!(args.body.as_deref(), Some("k=v"));
        assert!(args.less);
        assert!(!cli.command.is_interactive());
    }

    #[test]
    fn ws_subcommand_is_interactive() {
        let cli = Cli::try_parse_from([
            "hulaki", "--verbose", "ws", "ws://localhost:9000", "--params=type=user,status=active",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.command.is_interactive());
        match cli.command {
            Command::Ws(args) => assert_eq!(args.params, "type=user,status=active"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn url_is_required() {
        assert!(Cli::try_parse_from(["hulaki", "get"]).is_err());
        assert!(Cli::try_parse_from(["hulaki", "ws"]).is_err());
        assert!(Cli::try_parse_from(["hulaki", "socketio"]).is_err());
    }

    fn socket_io_args(extra: &[&str]) -> SocketIoArgs {
        let mut argv = vec!["hulaki", "socketio", "ws://localhost:3000"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::SocketIo(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn socketio_flags_select_the_action() {
        let args = socket_io_args(&["--emit=message", r#"--data={"text":"hi"}"#, "-l"]);
        assert!(args.less);
        assert_eq!(args.namespace, "/");
        assert_eq!(
            args.action().unwrap(),
            SocketIoAction::Emit {
                event: "message".into(),
                data: Some(serde_json::json!({ "text": "hi" })),
            }
        );

        let args = socket_io_args(&["--listen=news", "--duration=250ms", "--namespace=chat"]);
        assert_eq!(args.namespace, "chat");
        assert_eq!(
            args.action().unwrap(),
            SocketIoAction::Listen { event: "news".into(), duration: Duration::from_millis(250) }
        );

        let args = socket_io_args(&[]);
        assert_eq!(args.duration, Duration::from_secs(5));
        assert_eq!(args.action().unwrap(), SocketIoAction::Connect);
    }

    #[test]
    fn socketio_rejects_bad_duration_and_data() {
        let argv = ["hulaki", "socketio", "ws://h", "--listen=x", "--duration=soon"];
        assert!(Cli::try_parse_from(argv).is_err());
        let argv = ["hulaki", "socketio", "ws://h", "--emit=a", "--listen=b"];
        assert!(Cli::try_parse_from(argv).is_err());

        let args = socket_io_args(&["--emit=message", "--data=invalid json {"]);
        let err = args.action().unwrap_err();
        assert!(err.to_string().contains("Invalid --data JSON"));
    }

    #[tokio::test]
    async fn malformed_pairs_fail_before_any_connection() {
        let args = WsArgs {
            url: "ws://127.0.0.1:1".to_string(),
            headers: "novalue".to_string(),
            params: String::new(),
        };
        let err = run_ws(&args, &Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid --headers value 'novalue'"));
    }

    #[tokio::test]
    async fn socketio_connection_failure_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let cli = Cli::try_parse_from(["hulaki", "socketio", url.as_str()]).unwrap();
        let Command::SocketIo(args) = cli.command else {
            panic!("expected the socketio command");
        };
        let err = run_socket_io(&args, &Config::default()).await.unwrap_err();
        assert!(format!("{:#}", err).starts_with("CONNECTION_FAILED: failed to connect to"));
    }
}
