//! Development server implementation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tableau_presets::Options;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::mount::{PublishedFiles, ServerMount};
use crate::websocket::{hmr_client_script, inject_client, HmrHub, HmrMessage};

const HMR_PATH: &str = "/__hmr";
const HMR_SCRIPT_PATH: &str = "/__hmr.js";
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Directories served as-is at the site root
    pub static_dirs: Vec<PathBuf>,

    /// Open browser on start
    pub open: bool,

    /// Serve over HTTPS with these certificates
    pub tls: Option<TlsConfig>,
}

/// PEM files for HTTPS serving.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,

    /// Intermediate certificates appended to the served chain
    pub ca: Vec<PathBuf>,
}

impl TlsConfig {
    fn check_files(&self) -> Result<(), ServerError> {
        for path in [&self.cert, &self.key].into_iter().chain(&self.ca) {
            if !path.is_file() {
                return Err(ServerError::Tls(format!(
                    "{} is not a file",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Read the certificate chain and key into a rustls server config.
    pub async fn load(&self) -> Result<RustlsConfig, ServerError> {
        let mut chain = read_pem(&self.cert).await?;
        for ca in &self.ca {
            if !chain.ends_with(b"\n") {
                chain.push(b'\n');
            }
            chain.extend(read_pem(ca).await?);
        }
        let key = read_pem(&self.key).await?;

        RustlsConfig::from_pem(chain, key).await.map_err(|e| {
            ServerError::Tls(format!(
                "Invalid certificate or key in {} / {}: {}",
                self.cert.display(),
                self.key.display(),
                e
            ))
        })
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, ServerError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| ServerError::Tls(format!("Failed to read {}: {}", path.display(), e)))
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port: 6006,
            host: "127.0.0.1".to_string(),
            static_dirs: Vec::new(),
            open: true,
            tls: None,
        }
    }
}

impl DevServerConfig {
    /// Server settings from the run options. The browser is not opened in
    /// CI, smoke tests or with `--no-open`.
    pub fn from_options(options: &Options) -> Self {
        let defaults = Self::default();
        let cli = &options.cli;

        Self {
            port: cli.port.unwrap_or(defaults.port),
            host: cli.host.clone().unwrap_or(defaults.host),
            static_dirs: cli.static_dirs.clone(),
            open: !(cli.no_open || cli.ci || cli.smoke_test),
            tls: cli.https.then(|| TlsConfig {
                cert: cli.ssl_cert.clone().unwrap_or_default(),
                key: cli.ssl_key.clone().unwrap_or_default(),
                ca: cli.ssl_ca.clone(),
            }),
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    Bind(SocketAddr, String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Server error: {0}")]
    Serve(String),
}

/// Shared server state.
#[derive(Clone)]
struct ServerState {
    files: PublishedFiles,
    hmr: HmrHub,
}

/// Development server.
pub struct DevServer {
    config: DevServerConfig,
    state: ServerState,
}

impl DevServer {
    pub fn new(config: DevServerConfig) -> Result<Self, ServerError> {
        if let Some(tls) = &config.tls {
            tls.check_files()?;
        }

        Ok(Self {
            config,
            state: ServerState {
                files: PublishedFiles::default(),
                hmr: HmrHub::new(),
            },
        })
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.config
    }

    /// The surface a builder publishes into.
    pub fn mount(&self) -> Arc<ServerMount> {
        Arc::new(ServerMount::new(
            self.state.files.clone(),
            self.state.hmr.clone(),
        ))
    }

    pub fn address(&self) -> Result<SocketAddr, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        addr.parse().map_err(|_| ServerError::InvalidAddress(addr))
    }

    /// Routes: the HMR socket and script, static dirs, then published files.
    pub fn router(&self) -> Router {
        let published = Router::new()
            .fallback(published_handler)
            .with_state(self.state.clone());

        let mut files = published;
        for dir in self.config.static_dirs.iter().rev() {
            files = Router::new().fallback_service(ServeDir::new(dir).fallback(files));
        }

        Router::new()
            .route(HMR_PATH, get(ws_handler))
            .route(HMR_SCRIPT_PATH, get(hmr_script_handler))
            .with_state(self.state.clone())
            .fallback_service(files)
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let addr = self.address()?;
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e.to_string()))?;

        let rustls = match &self.config.tls {
            Some(tls) => Some(tls.load().await?),
            None => None,
        };

        let scheme = if rustls.is_some() { "https" } else { "http" };
        let url = format!("{}://{}", scheme, addr);
        tracing::info!("Dev server running at {}", url);

        if self.config.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        match rustls {
            None => axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|e| ServerError::Serve(e.to_string()))?,
            Some(rustls) => {
                let listener = listener
                    .into_std()
                    .map_err(|e| ServerError::Bind(addr, e.to_string()))?;
                let handle = axum_server::Handle::new();
                let stopper = handle.clone();
                tokio::spawn(async move {
                    shutdown.cancelled().await;
                    stopper.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
                });

                axum_server::from_tcp_rustls(listener, rustls)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| ServerError::Serve(e.to_string()))?;
            }
        }

        tracing::debug!("Dev server stopped");
        Ok(())
    }
}

/// Serve a published file, injecting the HMR client into HTML.
async fn published_handler(State(state): State<ServerState>, uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() || path.ends_with('/') {
        format!("{}index.html", path)
    } else {
        path.to_string()
    };

    let Some(contents) = state.files.get(&path) else {
        if state.files.is_empty() {
            return (StatusCode::SERVICE_UNAVAILABLE, "Build in progress").into_response();
        }
        return (StatusCode::NOT_FOUND, format!("Not found: /{}", path)).into_response();
    };

    let content_type = content_type(&path);
    let body = if content_type.starts_with("text/html") {
        inject_client(&contents, HMR_SCRIPT_PATH)
    } else {
        contents.to_string()
    };

    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn content_type(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Handler for the HMR WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state.hmr))
}

/// Forward HMR messages to one client until either side goes away.
async fn handle_ws(mut socket: WebSocket, hmr: HmrHub) {
    let mut rx = hmr.subscribe();

    for msg in hmr.greeting() {
        if send(&mut socket, &msg).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(msg) => {
                    if send(&mut socket, &msg).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "HMR client lagged");
                    if send(&mut socket, &HmrMessage::Reload).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &HmrMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

/// Handler for the HMR client script.
async fn hmr_script_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        hmr_client_script(HMR_PATH),
    )
}
