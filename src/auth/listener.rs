//! One-shot loopback listener for the OAuth authorization-code redirect.

use std::io;
use std::time::Duration;

use reqwest::Url;
use strum::Display;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::error::AuthError;
use super::pkce::constant_time_eq;

const SUCCESS_HTML: &str =
    "<html><body><h1>Authentication successful</h1><p>You may close this window.</p></body></html>";
const FAILURE_HTML: &str =
    "<html><body><h1>Authentication failed</h1><p>You may close this window and retry.</p></body></html>";
const NOT_FOUND_HTML: &str = "<html><body><h1>Not found</h1></body></html>";
const BAD_REQUEST_HTML: &str = "<html><body><h1>Bad request</h1></body></html>";

const MAX_REQUEST_HEAD: usize = 8192;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do when the preferred callback port is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BindPolicy {
    /// Retry on an OS-assigned port and advertise that port instead.
    #[default]
    FallbackToEphemeral,
    /// Fail with [`AuthError::ListenerBindFatal`]; for redirect URIs that are
    /// allow-listed with an exact port.
    Strict,
}

/// A successfully captured authorization response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackCapture {
    pub code: String,
    pub state: Option<String>,
}

/// Bound callback endpoint. Dropping it closes the socket and frees the port.
///
/// # Example
/// ```no_run
/// use mailbridge::auth::CallbackListener;
///
/// # async fn example() -> Result<(), mailbridge::auth::AuthError> {
/// let listener = CallbackListener::start("localhost", 3000, "/oauth2callback").await?;
/// println!("listening on port {}", listener.port());
/// let capture = listener.await_callback().await?;
/// println!("got a code of {} bytes", capture.code.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
    preferred_port: u16,
    path: String,
    expected_state: Option<String>,
}

impl CallbackListener {
    pub async fn start(host: &str, preferred_port: u16, path: &str) -> Result<Self, AuthError> {
        Self::start_with_policy(host, preferred_port, path, BindPolicy::default()).await
    }

    /// Bind `preferred_port`, falling back per `policy` on address-in-use.
    ///
    /// The returned listener's [`port`](Self::port) is the port actually bound.
    pub async fn start_with_policy(
        host: &str,
        preferred_port: u16,
        path: &str,
        policy: BindPolicy,
    ) -> Result<Self, AuthError> {
        let bind_host = bind_host(host);
        let listener = match TcpListener::bind((bind_host.as_str(), preferred_port)).await {
            Ok(listener) => listener,
            Err(err)
                if err.kind() == io::ErrorKind::AddrInUse
                    && preferred_port != 0
                    && policy == BindPolicy::FallbackToEphemeral =>
            {
                tracing::warn!(
                    preferred_port,
                    "callback port in use; falling back to an OS-assigned port"
                );
                TcpListener::bind((bind_host.as_str(), 0))
                    .await
                    .map_err(|e| bind_fatal(&bind_host, 0, e))?
            }
            Err(err) => return Err(bind_fatal(&bind_host, preferred_port, err)),
        };
        let port = listener
            .local_addr()
            .map_err(|e| bind_fatal(&bind_host, preferred_port, e))?
            .port();
        tracing::debug!(host = %bind_host, port, path, "callback listener bound");

        Ok(Self {
            listener,
            port,
            preferred_port,
            path: normalize_path(path),
            expected_state: None,
        })
    }

    /// Reject callbacks whose `state` differs from `state`.
    pub fn with_expected_state(mut self, state: Option<String>) -> Self {
        self.expected_state = state;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn preferred_port(&self) -> u16 {
        self.preferred_port
    }

    pub fn fell_back(&self) -> bool {
        self.preferred_port != 0 && self.port != self.preferred_port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the one request to [`path`](Self::path), answer it with a
    /// terminal page and stop listening.
    ///
    /// Requests to other paths get a 404 and are otherwise ignored. The
    /// response is fully written before the listener (and its port) is dropped.
    pub async fn await_callback(self) -> Result<CallbackCapture, AuthError> {
        let Self {
            listener,
            port,
            path,
            expected_state,
            ..
        } = self;
        let (tx, mut rx) = mpsc::channel::<(TcpStream, String)>(4);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) if matches!(
                            err.kind(),
                            io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                        ) => continue,
                        Err(err) => {
                            return Err(AuthError::Io(format!("callback accept failed: {err}")))
                        }
                    };
                    tracing::trace!(%peer, port, "callback connection accepted");
                    connections.spawn(route_connection(socket, path.clone(), tx.clone()));
                }
                Some((mut socket, target)) = rx.recv() => {
                    let outcome = parse_callback_target(&target, expected_state.as_deref());
                    let (status, body) = match &outcome {
                        Ok(_) => ("200 OK", SUCCESS_HTML),
                        Err(_) => ("400 Bad Request", FAILURE_HTML),
                    };
                    if let Err(err) = write_response(&mut socket, status, body).await {
                        tracing::warn!(error = %err, "failed to write callback response page");
                    }
                    match &outcome {
                        Ok(_) => tracing::info!(port, "authorization callback captured"),
                        Err(err) => tracing::warn!(port, error = %err, "authorization callback rejected"),
                    }
                    return outcome;
                }
            }
        }
    }
}

/// Read one request head; forward it if it targets `path`, otherwise answer 404.
async fn route_connection(
    mut socket: TcpStream,
    path: String,
    tx: mpsc::Sender<(TcpStream, String)>,
) {
    let target =
        match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut socket)).await {
            Ok(Ok(Some(target))) => target,
            Ok(Ok(None)) | Err(_) => return,
            Ok(Err(reason)) => {
                tracing::debug!(%reason, "malformed request on callback listener");
                let _ = write_response(&mut socket, "400 Bad Request", BAD_REQUEST_HTML).await;
                return;
            }
        };

    if request_path(&target).as_deref() == Some(path.as_str()) {
        let _ = tx.send((socket, target)).await;
    } else {
        tracing::debug!(target = %redact_query(&target), "ignoring request to unrelated path");
        let _ = write_response(&mut socket, "404 Not Found", NOT_FOUND_HTML).await;
    }
}

/// Returns `Ok(None)` when the peer closed without sending anything.
async fn read_request_target(socket: &mut TcpStream) -> Result<Option<String>, String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = socket
            .read(&mut chunk)
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        if read == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    let request_line = head.lines().next().ok_or("empty request")?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" {
        return Err(format!("unsupported method {method:?}"));
    }
    if target.is_empty() {
        return Err("missing request target".to_string());
    }
    Ok(Some(target.to_string()))
}

fn request_url(target: &str) -> Option<Url> {
    Url::parse("http://localhost/").ok()?.join(target).ok()
}

fn request_path(target: &str) -> Option<String> {
    request_url(target).map(|url| url.path().to_string())
}

fn redact_query(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}

/// Extract the authorization outcome from a callback request target.
pub fn parse_callback_target(
    target: &str,
    expected_state: Option<&str>,
) -> Result<CallbackCapture, AuthError> {
    let url = request_url(target).ok_or(AuthError::NoCodeProvided)?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    // State first: an uncorrelated `error` must not end the live flow as a denial.
    if let Some(expected) = expected_state {
        let matches = state
            .as_deref()
            .is_some_and(|s| constant_time_eq(s.as_bytes(), expected.as_bytes()));
        if !matches {
            return Err(AuthError::StateMismatch);
        }
    }
    if let Some(error) = error {
        return Err(AuthError::RemoteDenied {
            error,
            description: error_description,
        });
    }
    let code = code
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::NoCodeProvided)?;
    Ok(CallbackCapture { code, state })
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    socket.shutdown().await
}

fn bind_host(host: &str) -> String {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        "127.0.0.1".to_string()
    } else {
        host.to_string()
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn bind_fatal(host: &str, port: u16, err: io::Error) -> AuthError {
    AuthError::ListenerBindFatal {
        addr: format!("{host}:{port}"),
        message: err.to_string(),
    }
}
