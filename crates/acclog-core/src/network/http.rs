//! Just enough HTTP/1.1 for the logger's web interface
//!
//! One request per connection: the server reads the request head, answers
//! and closes. Only the request line is interpreted; headers are skipped.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};
use core::net::Ipv4Addr;

use serde::Serialize;
use thiserror_no_std::Error;

use crate::app_state::StatusSnapshot;
use crate::config::{MDNS_NAME, VERSION};
use crate::mma8451::{DataRate, Range};
use crate::sampler::SessionStats;
use crate::storage::{LogEntry, StorageError};

/// Longest request line accepted
pub const MAX_REQUEST_LINE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("malformed request")]
    Malformed,
    #[error("request line too long")]
    TooLong,
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl HttpError {
    pub fn status(self) -> Status {
        match self {
            Self::Malformed => Status::BadRequest,
            Self::TooLong => Status::UriTooLong,
            Self::MethodNotAllowed => Status::MethodNotAllowed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    SeeOther,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    Conflict,
    UriTooLong,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::SeeOther => 303,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::Conflict => 409,
            Self::UriTooLong => 414,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::SeeOther => "See Other",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::Conflict => "Conflict",
            Self::UriTooLong => "URI Too Long",
            Self::InternalServerError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// Length of the request head (through the blank line) once it is complete
pub fn head_length(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Length of the request line including its line break, once received
pub fn request_line_length(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|i| i + 1)
}

/// Parse the request line at the start of `buf`
pub fn parse_request(buf: &[u8]) -> Result<Request<'_>, HttpError> {
    let line_len = match request_line_length(buf) {
        Some(len) if len > MAX_REQUEST_LINE => return Err(HttpError::TooLong),
        Some(len) => len,
        None if buf.len() >= MAX_REQUEST_LINE => return Err(HttpError::TooLong),
        None => return Err(HttpError::Malformed),
    };

    let line = core::str::from_utf8(&buf[..line_len]).map_err(|_| HttpError::Malformed)?;
    let mut parts = line.trim_end().split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::Malformed);
    };

    if !version.starts_with("HTTP/1.") || !target.starts_with('/') {
        return Err(HttpError::Malformed);
    }

    let method = match method {
        "GET" => Method::Get,
        "HEAD" => Method::Head,
        "POST" => Method::Post,
        m if !m.is_empty() && m.bytes().all(|b| b.is_ascii_uppercase()) => {
            return Err(HttpError::MethodNotAllowed);
        }
        _ => return Err(HttpError::Malformed),
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    Ok(Request {
        method,
        path,
        query,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Index,
    Status,
    Files,
    Download(&'a str),
    Delete(&'a str),
    Start,
    Stop,
    Settings(&'a str),
    NotFound,
    MethodNotAllowed,
}

pub fn route<'a>(request: &Request<'a>) -> Route<'a> {
    let read_only = matches!(request.method, Method::Get | Method::Head);
    let query = request.query.unwrap_or("");

    let route = match request.path {
        "/" | "/index.html" => Route::Index,
        "/api/status" => Route::Status,
        "/api/files" => Route::Files,
        "/start" => Route::Start,
        "/stop" => Route::Stop,
        "/settings" => Route::Settings(query),
        "/delete" => match query_param(query, "file") {
            Some(name) => Route::Delete(name),
            None => Route::NotFound,
        },
        path => match path.strip_prefix("/files/") {
            Some(rest) => match rest.strip_suffix("/delete") {
                Some(name) if request.method == Method::Post => return Route::Delete(name),
                Some(_) => return Route::MethodNotAllowed,
                None if !rest.is_empty() && !rest.contains('/') => Route::Download(rest),
                None => Route::NotFound,
            },
            None => Route::NotFound,
        },
    };

    match route {
        Route::NotFound => Route::NotFound,
        _ if read_only => route,
        // Actions also accept POST from forms
        Route::Start | Route::Stop | Route::Settings(_) | Route::Delete(_) => route,
        _ => Route::MethodNotAllowed,
    }
}

/// Response status for a failed file operation
pub fn storage_error_status(error: &StorageError) -> Status {
    match error {
        StorageError::FileBusy => Status::Conflict,
        StorageError::InvalidName => Status::BadRequest,
        StorageError::NotMounted => Status::ServiceUnavailable,
        e if e.is_not_found() => Status::NotFound,
        _ => Status::InternalServerError,
    }
}

/// Value of `key` in an `a=1&b=2` query string
pub fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

pub fn write_response_head<W: Write>(
    w: &mut W,
    status: Status,
    content_type: &str,
    content_length: usize,
) -> fmt::Result {
    write!(
        w,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status.code(),
        status.reason(),
        content_type,
        content_length
    )
}

/// Redirect the browser back to `location`
pub fn write_redirect<W: Write>(w: &mut W, location: &str) -> fmt::Result {
    write!(
        w,
        "HTTP/1.1 303 See Other\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        location
    )
}

pub fn write_download_head<W: Write>(w: &mut W, name: &str, size: u32) -> fmt::Result {
    write!(
        w,
        "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Disposition: attachment; filename=\"{}\"\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        name, size
    )
}

/// Plain text body for errors
pub fn write_error<W: Write>(w: &mut W, status: Status, message: &str) -> fmt::Result {
    let body_len = message.len() + 1;
    write_response_head(w, status, "text/plain", body_len)?;
    writeln!(w, "{}", message)
}

fn write_html_str<W: Write>(w: &mut W, s: &str) -> fmt::Result {
    for c in s.chars() {
        match c {
            '<' => w.write_str("&lt;")?,
            '>' => w.write_str("&gt;")?,
            '&' => w.write_str("&amp;")?,
            '"' => w.write_str("&quot;")?,
            c => w.write_char(c)?,
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct NetworkJson<'a> {
    mode: &'a str,
    ip: Ipv4Addr,
    hostname: &'a str,
}

#[derive(Serialize)]
struct SettingsJson<'a> {
    interval_ms: u32,
    range_g: u8,
    rate_hz: &'a str,
    auto_start: bool,
}

/// Body of `GET /api/status`
#[derive(Serialize)]
struct StatusJson<'a> {
    version: &'a str,
    uptime_ms: u64,
    state: &'a str,
    network: Option<NetworkJson<'a>>,
    recording: bool,
    file: Option<&'a str>,
    settings: SettingsJson<'a>,
    stats: &'a SessionStats,
    sd_ready: bool,
    sensor_ready: bool,
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct FileJson<'a> {
    name: &'a str,
    size: u32,
}

/// Body of `GET /api/files`
#[derive(Serialize)]
struct FilesJson<'a> {
    files: Vec<FileJson<'a>>,
    total: usize,
}

pub fn status_json(status: &StatusSnapshot, uptime_ms: u64) -> serde_json::Result<String> {
    let settings = &status.settings;
    serde_json::to_string(&StatusJson {
        version: VERSION,
        uptime_ms,
        state: status.run_state.label(),
        network: status.network.map(|network| NetworkJson {
            mode: network.mode.label(),
            ip: network.address,
            hostname: MDNS_NAME,
        }),
        recording: status.recording,
        file: status.active_file.as_deref(),
        settings: SettingsJson {
            interval_ms: settings.sample_interval_ms,
            range_g: settings.range.g(),
            rate_hz: settings.data_rate.label(),
            auto_start: settings.auto_start,
        },
        stats: &status.stats,
        sd_ready: status.sd_ready,
        sensor_ready: status.sensor_ready,
        error: status.last_error.as_deref(),
    })
}

pub fn files_json(files: &[LogEntry], total: usize) -> serde_json::Result<String> {
    serde_json::to_string(&FilesJson {
        files: files
            .iter()
            .map(|file| FileJson {
                name: &file.name,
                size: file.size,
            })
            .collect(),
        total,
    })
}

pub fn write_index_html<W: Write>(
    w: &mut W,
    status: &StatusSnapshot,
    files: &[LogEntry],
    total: usize,
) -> fmt::Result {
    w.write_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width\"><title>")?;
    write_html_str(w, MDNS_NAME)?;
    w.write_str("</title><style>body{font-family:sans-serif;margin:1em}td,th{padding:2px 8px;text-align:left}</style></head><body>")?;
    w.write_str("<h1>Accelerometer logger</h1>")?;

    w.write_str("<p>State: ")?;
    w.write_str(status.run_state.label())?;
    if let Some(network) = status.network {
        write!(w, " &middot; {} {}", network.mode.label(), network.address)?;
    }
    w.write_str("</p>")?;

    if status.recording {
        w.write_str("<p>Recording to <b>")?;
        if let Some(name) = &status.active_file {
            write_html_str(w, name)?;
        }
        write!(
            w,
            "</b>: {} samples, {} dropped, {} overruns. <a href=\"/stop\">Stop</a></p>",
            status.stats.samples, status.stats.dropped, status.stats.overruns
        )?;
    } else {
        w.write_str("<p>Not recording. <a href=\"/start\">Start</a></p>")?;
    }
    if !status.sd_ready {
        w.write_str("<p><b>SD card not available</b></p>")?;
    }
    if !status.sensor_ready {
        w.write_str("<p><b>Accelerometer not available</b></p>")?;
    }

    let settings = &status.settings;
    write!(
        w,
        "<h2>Settings</h2><form action=\"/settings\">Interval (ms) <input name=\"interval_ms\" type=\"number\" min=\"1\" max=\"60000\" value=\"{}\"> Range <select name=\"range\">",
        settings.sample_interval_ms
    )?;
    for range in [Range::G2, Range::G4, Range::G8] {
        let selected = if range == settings.range { " selected" } else { "" };
        write!(w, "<option value=\"{0}\"{1}>&plusmn;{0} g</option>", range.g(), selected)?;
    }
    w.write_str("</select> Rate <select name=\"rate\">")?;
    for rate in DataRate::ALL {
        let selected = if rate == settings.data_rate { " selected" } else { "" };
        write!(w, "<option value=\"{0}\"{1}>{0} Hz</option>", rate.label(), selected)?;
    }
    w.write_str("</select> Auto start <select name=\"auto_start\">")?;
    for (value, on) in [("on", true), ("off", false)] {
        let selected = if on == settings.auto_start { " selected" } else { "" };
        write!(w, "<option{}>{}</option>", selected, value)?;
    }
    w.write_str("</select> <button>Apply</button></form>")?;

    write!(w, "<h2>Files ({})</h2><table><tr><th>Name</th><th>Bytes</th><th></th></tr>", total)?;
    for file in files {
        w.write_str("<tr><td><a href=\"/files/")?;
        write_html_str(w, &file.name)?;
        w.write_str("\">")?;
        write_html_str(w, &file.name)?;
        write!(w, "</a></td><td>{}</td><td><a href=\"/delete?file=", file.size)?;
        write_html_str(w, &file.name)?;
        w.write_str("\">delete</a></td></tr>")?;
    }
    w.write_str("</table></body></html>")
}
