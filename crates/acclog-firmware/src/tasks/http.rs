//! Web interface: status page, file downloads and recording control

use alloc::format;
use alloc::string::String;

use acclog_core::app_state::{CONTROL_CHANNEL, Control, STATUS};
use acclog_core::config::HTTP_PORT;
use acclog_core::network::http::{
    self, Method, Route, Status, head_length, parse_request, storage_error_status,
};
use acclog_core::storage::{LogEntry, MAX_LISTED_LOGS, StorageError};
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::Duration;
use embedded_io_async::Write;
use log::{debug, warn};

use super::now_ms;
use crate::app_state::StorageMutex;

const RX_BUFFER_SIZE: usize = 1024;
const TX_BUFFER_SIZE: usize = 2048;
const REQUEST_BUFFER_SIZE: usize = 1024;
/// File bytes read from the card per lock of the storage mutex
const DOWNLOAD_CHUNK: usize = 512;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// The peer went away or the socket timed out
#[derive(Debug)]
struct Disconnected;

/// Send a response that was rendered into memory
async fn send(socket: &mut TcpSocket<'_>, response: &str) -> Result<(), Disconnected> {
    socket
        .write_all(response.as_bytes())
        .await
        .map_err(|_| Disconnected)
}

async fn send_error(
    socket: &mut TcpSocket<'_>,
    status: Status,
    message: &str,
) -> Result<(), Disconnected> {
    let mut out = String::new();
    let _ = http::write_error(&mut out, status, message);
    send(socket, &out).await
}

async fn send_redirect(socket: &mut TcpSocket<'_>) -> Result<(), Disconnected> {
    let mut out = String::new();
    let _ = http::write_redirect(&mut out, "/");
    send(socket, &out).await
}

/// Send `body` with a 200 head, or just the head for HEAD requests
async fn send_body(
    socket: &mut TcpSocket<'_>,
    method: Method,
    content_type: &str,
    body: &str,
) -> Result<(), Disconnected> {
    let mut head = String::new();
    let _ = http::write_response_head(&mut head, Status::Ok, content_type, body.len());
    send(socket, &head).await?;
    if method != Method::Head {
        send(socket, body).await?;
    }
    Ok(())
}

async fn list_files(
    storage: &'static StorageMutex,
) -> Result<(heapless::Vec<LogEntry, MAX_LISTED_LOGS>, usize), StorageError> {
    let mut files = heapless::Vec::new();
    let total = storage.lock().await.list_logs(&mut files)?;
    Ok((files, total))
}

async fn download(
    socket: &mut TcpSocket<'_>,
    storage: &'static StorageMutex,
    method: Method,
    name: &str,
) -> Result<(), Disconnected> {
    let size = match storage.lock().await.log_size(name) {
        Ok(size) => size,
        Err(e) => return send_error(socket, storage_error_status(&e), "cannot open file").await,
    };

    let mut head = String::new();
    let _ = http::write_download_head(&mut head, name, size);
    send(socket, &head).await?;
    if method == Method::Head {
        return Ok(());
    }

    let mut chunk = [0u8; DOWNLOAD_CHUNK];
    let mut offset = 0u32;
    while offset < size {
        let read = storage.lock().await.read_log(name, offset, &mut chunk);
        let n = match read {
            Ok(0) => break,
            Ok(n) => n.min((size - offset) as usize),
            Err(e) => {
                // headers are already out, all we can do is cut the body short
                warn!("Download of {} failed at {}: {}", name, offset, e);
                return Err(Disconnected);
            }
        };
        socket
            .write_all(&chunk[..n])
            .await
            .map_err(|_| Disconnected)?;
        offset += n as u32;
    }
    debug!("Served {} ({} bytes)", name, offset);
    Ok(())
}

async fn apply_settings(
    socket: &mut TcpSocket<'_>,
    storage: &'static StorageMutex,
    query: &str,
) -> Result<(), Disconnected> {
    let mut settings = STATUS.snapshot().settings;
    match settings.apply_query(query) {
        Ok(false) => send_redirect(socket).await,
        Ok(true) => {
            if let Err(e) = storage.lock().await.save_settings(&settings) {
                warn!("Settings not saved: {}", e);
            }
            CONTROL_CHANNEL.send(Control::Apply(settings)).await;
            send_redirect(socket).await
        }
        Err(e) => send_error(socket, Status::BadRequest, &format!("{}", e)).await,
    }
}

async fn respond(
    socket: &mut TcpSocket<'_>,
    storage: &'static StorageMutex,
    request_head: &[u8],
) -> Result<(), Disconnected> {
    let request = match parse_request(request_head) {
        Ok(request) => request,
        Err(e) => return send_error(socket, e.status(), &format!("{}", e)).await,
    };
    debug!("{:?} {}", request.method, request.path);

    match http::route(&request) {
        Route::Index => {
            let status = STATUS.snapshot();
            let (files, total) = list_files(storage).await.unwrap_or_default();
            let mut body = String::new();
            let _ = http::write_index_html(&mut body, &status, &files, total);
            send_body(socket, request.method, "text/html; charset=utf-8", &body).await
        }
        Route::Status => match http::status_json(&STATUS.snapshot(), now_ms()) {
            Ok(body) => send_body(socket, request.method, "application/json", &body).await,
            Err(e) => send_error(socket, Status::InternalServerError, &format!("{}", e)).await,
        },
        Route::Files => match list_files(storage).await {
            Ok((files, total)) => match http::files_json(&files, total) {
                Ok(body) => send_body(socket, request.method, "application/json", &body).await,
                Err(e) => send_error(socket, Status::InternalServerError, &format!("{}", e)).await,
            },
            Err(e) => send_error(socket, storage_error_status(&e), "cannot list files").await,
        },
        Route::Download(name) => download(socket, storage, request.method, name).await,
        Route::Delete(name) => {
            let deleted = storage.lock().await.delete_log(name);
            match deleted {
                Ok(()) => send_redirect(socket).await,
                Err(e) => send_error(socket, storage_error_status(&e), "cannot delete file").await,
            }
        }
        Route::Start => {
            CONTROL_CHANNEL.send(Control::Start).await;
            send_redirect(socket).await
        }
        Route::Stop => {
            CONTROL_CHANNEL.send(Control::Stop).await;
            send_redirect(socket).await
        }
        Route::Settings(query) => apply_settings(socket, storage, query).await,
        Route::NotFound => send_error(socket, Status::NotFound, "not found").await,
        Route::MethodNotAllowed => {
            send_error(socket, Status::MethodNotAllowed, "method not allowed").await
        }
    }
}

/// Read until the request head is complete or the buffer is full
async fn read_head(socket: &mut TcpSocket<'_>, buf: &mut [u8]) -> Result<usize, Disconnected> {
    let mut len = 0;
    loop {
        let n = socket.read(&mut buf[len..]).await.map_err(|_| Disconnected)?;
        if n == 0 {
            return Err(Disconnected);
        }
        len += n;
        if head_length(&buf[..len]).is_some() || len == buf.len() {
            return Ok(len);
        }
    }
}

#[embassy_executor::task]
pub async fn http_task(stack: Stack<'static>, storage: &'static StorageMutex) {
    let mut rx_buffer = [0u8; RX_BUFFER_SIZE];
    let mut tx_buffer = [0u8; TX_BUFFER_SIZE];
    let mut request = [0u8; REQUEST_BUFFER_SIZE];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        if let Err(e) = socket.accept(HTTP_PORT).await {
            warn!("HTTP accept failed: {:?}", e);
            continue;
        }

        let result = match read_head(&mut socket, &mut request).await {
            Ok(len) => respond(&mut socket, storage, &request[..len]).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let _ = socket.flush().await;
                socket.close();
            }
            Err(Disconnected) => {
                debug!("HTTP client disconnected");
                socket.abort();
            }
        }
        let _ = socket.flush().await;
    }
}
