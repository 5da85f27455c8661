//! Dev server bridge: live reload through a reverse proxy.
//!
//! Compile tasks hand every path they write to [`ReloadBridge::stream`]. In
//! production that is a no-op; otherwise the paths become a reload event that
//! is pushed to every browser connected to the proxy. The proxy forwards all
//! requests to the WordPress server named by `server.proxy` and injects the
//! reload client into HTML pages.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use axum::body::{to_bytes, Body};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use crate::config::{Config, ServerSettings};
use crate::error::BuildError;

pub const CLIENT_PATH: &str = "/__livereload/client.js";
pub const SOCKET_PATH: &str = "/__livereload/ws";

/// Largest request body forwarded upstream
const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

const CLIENT_SCRIPT: &str = r#"(function(){
  var NOTIFY = __NOTIFY__;
  var reconnectTimer = null;

  function toast(text){
    if (!NOTIFY || !document.body) return;
    var el = document.createElement('div');
    el.textContent = text;
    el.style.cssText = 'position:fixed;right:12px;top:12px;z-index:99999;padding:8px 12px;'
      + 'background:#23282d;color:#fff;font:13px sans-serif;border-radius:3px;opacity:.9';
    document.body.appendChild(el);
    setTimeout(function(){ el.remove(); }, 1500);
  }

  function refreshStyles(){
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    Array.prototype.forEach.call(links, function(link){
      var url = new URL(link.href, location.href);
      url.searchParams.set('livereload', Date.now());
      link.href = url.toString();
    });
  }

  function connect(){
    var proto = location.protocol === 'https:' ? 'wss://' : 'ws://';
    var ws = new WebSocket(proto + location.host + '__SOCKET__');

    ws.onmessage = function(event){
      var data;
      try { data = JSON.parse(event.data); } catch (_) { return; }
      if (data.cssOnly) {
        refreshStyles();
        toast('Injected ' + data.paths.join(', '));
      } else {
        toast('Reloading');
        location.reload();
      }
    };

    ws.onclose = function(){
      if (reconnectTimer) clearTimeout(reconnectTimer);
      reconnectTimer = setTimeout(connect, 600);
    };

    ws.onerror = function(){
      try { ws.close(); } catch (_) {}
    };
  }

  connect();
})();
"#;

/// Files changed by one task run, as sent to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadEvent {
    pub version: u64,
    /// File names of the written paths
    pub paths: Vec<String>,
    /// Every path is a stylesheet, so the page can swap styles in place
    pub css_only: bool,
}

impl ReloadEvent {
    pub fn from_paths(version: u64, written: &[PathBuf]) -> Self {
        let css_only = !written.is_empty() && written.iter().all(|path| is_stylesheet(path));
        let paths = written
            .iter()
            .map(|path| {
                path.file_name()
                    .unwrap_or(path.as_os_str())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        Self {
            version,
            paths,
            css_only,
        }
    }
}

fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("css"))
}

/// Running dev server; an inactive handle when no server was started
#[derive(Debug, Default)]
pub struct ServerHandle {
    addr: Option<SocketAddr>,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn inactive() -> Self {
        Self::default()
    }

    /// Address the server listens on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Block until the server exits
    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Graceful shutdown: stop accepting, finish in-flight requests
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.wait();
    }
}

/// Seam between compile tasks and the browser
pub trait ReloadBridge: Send + Sync {
    /// Notify connected clients about `written`; returns the paths unchanged
    fn stream(&self, written: Vec<PathBuf>) -> Vec<PathBuf>;

    /// Start the dev server
    fn serve(&self, settings: &ServerSettings) -> Result<ServerHandle, BuildError>;
}

/// Production bridge: nothing to notify, nothing to serve
#[derive(Debug, Default)]
pub struct NoopBridge;

impl ReloadBridge for NoopBridge {
    fn stream(&self, written: Vec<PathBuf>) -> Vec<PathBuf> {
        written
    }

    fn serve(&self, _settings: &ServerSettings) -> Result<ServerHandle, BuildError> {
        Ok(ServerHandle::inactive())
    }
}

/// Development bridge broadcasting reload events to the proxy's websocket clients
pub struct LiveReloadBridge {
    log_prefix: String,
    version: AtomicU64,
    reload_tx: broadcast::Sender<ReloadEvent>,
}

impl LiveReloadBridge {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            log_prefix: settings.log_prefix.clone(),
            version: AtomicU64::new(0),
            reload_tx: broadcast::channel(256).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.reload_tx.subscribe()
    }
}

impl ReloadBridge for LiveReloadBridge {
    fn stream(&self, written: Vec<PathBuf>) -> Vec<PathBuf> {
        if written.is_empty() {
            return written;
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let event = ReloadEvent::from_paths(version, &written);
        let clients = self.reload_tx.send(event.clone()).unwrap_or(0);
        tracing::debug!(
            "[{}] {} {} file(s) to {} client(s)",
            self.log_prefix,
            if event.css_only { "injected" } else { "reloaded" },
            event.paths.len(),
            clients
        );
        written
    }

    fn serve(&self, settings: &ServerSettings) -> Result<ServerHandle, BuildError> {
        let proxy = settings.proxy.as_deref().ok_or(BuildError::MissingProxy)?;
        let upstream = normalize_upstream(proxy);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|source| BuildError::ProxyClient {
                upstream: upstream.clone(),
                source,
            })?;

        let state = Arc::new(ProxyState {
            upstream: upstream.clone(),
            client,
            reload_tx: self.reload_tx.clone(),
            script: client_script(settings.notify),
        });

        let port = settings.port;
        let start_failed = |source| BuildError::ServerStart { port, source };
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::io::Result<SocketAddr>>(1);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let log_prefix = self.log_prefix.clone();

        let thread = thread::Builder::new()
            .name("live-reload".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let listener =
                        match tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await {
                            Ok(listener) => listener,
                            Err(e) => {
                                let _ = ready_tx.send(Err(e));
                                return;
                            }
                        };
                    let _ = ready_tx.send(listener.local_addr());

                    let shutdown = async {
                        let _ = stop_rx.await;
                    };
                    if let Err(e) = axum::serve(listener, router(state))
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        tracing::error!("[{log_prefix}] server failed: {e}");
                    }
                });
            })
            .map_err(start_failed)?;

        let addr = match ready_rx.recv() {
            Ok(Ok(addr)) => addr,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(start_failed(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(start_failed(std::io::Error::other("server thread exited")));
            }
        };

        let url = format!("http://localhost:{}", addr.port());
        tracing::info!("[{}] proxying {} at {}", self.log_prefix, upstream, url);

        if settings.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("[{}] could not open browser: {}", self.log_prefix, e);
            }
        }

        Ok(ServerHandle {
            addr: Some(addr),
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// No-op in production, live reload otherwise
pub fn select(config: &Config) -> Arc<dyn ReloadBridge> {
    if config.production() {
        Arc::new(NoopBridge)
    } else {
        Arc::new(LiveReloadBridge::new(&config.settings.server))
    }
}

/// `localhost:8000/` -> `http://localhost:8000`
pub fn normalize_upstream(proxy: &str) -> String {
    let trimmed = proxy.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Make redirects to the upstream origin stay on the proxy
pub fn rewrite_location(location: &str, upstream: &str) -> String {
    match location.strip_prefix(upstream) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') || rest.starts_with('?') => rest.to_string(),
        _ => location.to_string(),
    }
}

/// Insert the client script tag before the last `</body>`, or append it
pub fn inject_script(html: &str) -> String {
    let tag = format!("<script src=\"{CLIENT_PATH}\"></script>");
    if html.contains(&tag) {
        return html.to_string();
    }
    match html.rfind("</body>") {
        Some(index) => format!("{}{}{}", &html[..index], tag, &html[index..]),
        None => format!("{html}{tag}"),
    }
}

pub fn client_script(notify: bool) -> String {
    CLIENT_SCRIPT
        .replace("__NOTIFY__", if notify { "true" } else { "false" })
        .replace("__SOCKET__", SOCKET_PATH)
}

struct ProxyState {
    upstream: String,
    client: reqwest::Client,
    reload_tx: broadcast::Sender<ReloadEvent>,
    script: String,
}

fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route(CLIENT_PATH, get(serve_client))
        .route(SOCKET_PATH, get(reload_socket))
        .fallback(forward)
        .with_state(state)
}

async fn serve_client(State(state): State<Arc<ProxyState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        state.script.clone(),
    )
        .into_response()
}

async fn reload_socket(ws: WebSocketUpgrade, State(state): State<Arc<ProxyState>>) -> Response {
    let rx = state.reload_tx.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<ReloadEvent>) {
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            next = rx.recv() => {
                match next {
                    Ok(event) => {
                        let Ok(payload) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream, path);

    let body = match to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let mut headers = parts.headers;
    headers.remove(header::HOST);
    // Upstream bodies must arrive uncompressed so HTML can be rewritten
    headers.remove(header::ACCEPT_ENCODING);

    let upstream = state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;
    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %url, "upstream request failed: {e}");
            return (StatusCode::BAD_GATEWAY, format!("upstream unavailable: {e}")).into_response();
        }
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    };

    let body = if is_html(&upstream_headers) {
        match String::from_utf8(bytes.to_vec()) {
            Ok(html) => Body::from(inject_script(&html)),
            Err(_) => Body::from(bytes),
        }
    } else {
        Body::from(bytes)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in upstream_headers.iter() {
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING || name == header::CONNECTION {
            continue;
        }
        if name == header::LOCATION {
            if let Some(location) = value
                .to_str()
                .ok()
                .and_then(|v| HeaderValue::from_str(&rewrite_location(v, &state.upstream)).ok())
            {
                headers.append(name.clone(), location);
                continue;
            }
        }
        headers.append(name.clone(), value.clone());
    }
    response
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn settings(proxy: Option<String>) -> ServerSettings {
        ServerSettings {
            port: 0,
            open: false,
            notify: true,
            proxy,
            log_prefix: "Test".to_string(),
        }
    }

    /// Answer one request with an HTML page
    fn upstream_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=UTF-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(body.as_bytes());
            }
        });
        addr.to_string()
    }

    #[test]
    fn test_inject_script_before_body_end() {
        let out = inject_script("<html><body><p>hi</p></body></html>");
        assert_eq!(
            out,
            "<html><body><p>hi</p><script src=\"/__livereload/client.js\"></script></body></html>"
        );
        // injecting twice is a no-op
        assert_eq!(inject_script(&out), out);
    }

    #[test]
    fn test_inject_script_without_body_appends() {
        let out = inject_script("<p>fragment</p>");
        assert!(out.ends_with("<script src=\"/__livereload/client.js\"></script>"));
    }

    #[test]
    fn test_normalize_upstream() {
        assert_eq!(normalize_upstream("localhost:8000"), "http://localhost:8000");
        assert_eq!(normalize_upstream("http://blog.test/"), "http://blog.test");
        assert_eq!(normalize_upstream(" https://blog.test "), "https://blog.test");
    }

    #[test]
    fn test_rewrite_location() {
        let upstream = "http://localhost:8000";
        assert_eq!(rewrite_location("http://localhost:8000/wp-admin/", upstream), "/wp-admin/");
        assert_eq!(rewrite_location("http://localhost:8000", upstream), "/");
        assert_eq!(rewrite_location("http://localhost:8000?p=1", upstream), "?p=1");
        assert_eq!(rewrite_location("http://localhost:80001/", upstream), "http://localhost:80001/");
        assert_eq!(rewrite_location("https://wordpress.org/", upstream), "https://wordpress.org/");
    }

    #[test]
    fn test_reload_event_css_only() {
        let css = ReloadEvent::from_paths(1, &[PathBuf::from("public/wp-content/themes/blog/style.css")]);
        assert!(css.css_only);
        assert_eq!(css.paths, vec!["style.css".to_string()]);

        let mixed = ReloadEvent::from_paths(2, &[PathBuf::from("style.css"), PathBuf::from("core.js")]);
        assert!(!mixed.css_only);

        assert!(!ReloadEvent::from_paths(3, &[]).css_only);
    }

    #[test]
    fn test_reload_event_json_shape() {
        let event = ReloadEvent::from_paths(7, &[PathBuf::from("index.php")]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"version": 7, "paths": ["index.php"], "cssOnly": false}));
    }

    #[test]
    fn test_client_script_flags() {
        assert!(client_script(true).contains("var NOTIFY = true;"));
        assert!(client_script(false).contains("var NOTIFY = false;"));
        assert!(client_script(false).contains(SOCKET_PATH));
    }

    #[test]
    fn test_noop_bridge_passthrough() {
        let bridge = NoopBridge;
        let paths = vec![PathBuf::from("a.php")];
        assert_eq!(bridge.stream(paths.clone()), paths);
        let handle = bridge.serve(&settings(None)).unwrap();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_live_bridge_broadcasts_and_passes_through() {
        let bridge = LiveReloadBridge::new(&settings(None));
        let mut rx = bridge.subscribe();

        let paths = vec![PathBuf::from("style.css")];
        assert_eq!(bridge.stream(paths.clone()), paths);
        assert!(bridge.stream(Vec::new()).is_empty());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.version, 1);
        assert!(event.css_only);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_live_bridge_requires_proxy() {
        let bridge = LiveReloadBridge::new(&settings(None));
        assert!(matches!(bridge.serve(&settings(None)), Err(BuildError::MissingProxy)));
    }

    #[test]
    fn test_proxy_injects_client_into_html() {
        let upstream = upstream_once("<html><body>blog</body></html>");
        let config = settings(Some(upstream));
        let bridge = LiveReloadBridge::new(&config);
        let handle = bridge.serve(&config).unwrap();
        let port = handle.local_addr().unwrap().port();

        let client = reqwest::blocking::Client::builder().no_proxy().build().unwrap();
        let page = client
            .get(format!("http://127.0.0.1:{port}/"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        let script = client
            .get(format!("http://127.0.0.1:{port}{CLIENT_PATH}"))
            .send()
            .unwrap()
            .text()
            .unwrap();
        handle.stop();

        assert_eq!(
            page,
            "<html><body>blog<script src=\"/__livereload/client.js\"></script></body></html>"
        );
        assert!(script.contains("var NOTIFY = true;"));
    }
}
