use crate::domain::entities::{Method, Response};
use crate::domain::socket_io::SocketIoReport;
use anyhow::{Result, anyhow};
use colored::Colorize;
use serde_json::Value;
use std::io::Write;

/// Prints a response the way the HTTP commands show it
///
/// With `less`, only the body is written (for `HEAD`, only the header
/// lines, as there is no body).
pub fn print_response(
    out: &mut impl Write,
    method: Method,
    response: &Response,
    less: bool,
) -> Result<()> {
    if less {
        if method == Method::Head {
            write_headers(out, response)?;
        } else {
            writeln!(out, "{}", response.body)?;
        }
        return Ok(());
    }

    writeln!(out, "{}", status_line(response))?;
    writeln!(out, "\n{}", heading("HEADERS"))?;
    write_headers(out, response)?;
    if method != Method::Head {
        writeln!(out, "\n{}", heading("BODY"))?;
        print_response_body(out, &response.body)?;
    }
    Ok(())
}

/// Prints the outcome of a Socket.IO command; with `less`, only the data
pub fn print_socket_io_report(
    out: &mut impl Write,
    report: &SocketIoReport,
    less: bool,
) -> Result<()> {
    if !less {
        writeln!(out, "{}", heading("SOCKET.IO RESPONSE"))?;
        writeln!(out, "{}: {}", "Status".bright_green().bold(), "success".cyan())?;
        writeln!(out, "{}: {}", "Connected".bright_green().bold(), report.connected)?;
        writeln!(out, "{}: {}", "Event".bright_green().bold(), report.event)?;
        writeln!(out, "\n{}", heading("DATA"))?;
    }
    let pretty = serde_json::to_string_pretty(&report.data)
        .map_err(|e| anyhow!("Failed to format JSON: {}", e))?;
    writeln!(out, "{}", pretty.green())?;
    Ok(())
}

fn print_response_body(out: &mut impl Write, body: &str) -> Result<()> {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let pretty = serde_json::to_string_pretty(&json)
                .map_err(|e| anyhow!("Failed to format JSON: {}", e))?;
            writeln!(out, "{}", pretty.green())?;
        }
        Err(_) => writeln!(out, "{}", body.white())?,
    }
    Ok(())
}

fn write_headers(out: &mut impl Write, response: &Response) -> Result<()> {
    for (key, value) in &response.headers {
        writeln!(out, "{}: {}", key.bright_green().bold(), value)?;
    }
    Ok(())
}

fn status_line(response: &Response) -> String {
    let text = format!("Status: {}", response.status);
    if response.status.is_success() {
        text.cyan().to_string()
    } else {
        text.red().to_string()
    }
}

fn heading(title: &str) -> String {
    format!(" {} ", title).bold().on_magenta().to_string()
}
