//! Helpers for testing the streaming cache engine.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that
//!    all console output is captured by the test runner.
//!
//!  - When using [`AssetServer`], make sure that the server is held until
//!    all requests to it have been made. If the server is dropped, the
//!    ports remain open and all connections to it will time out. To avoid
//!    this, assign it to a variable: `let server = AssetServer::new();`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the lodestream
///    crates and mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("lodestream_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a
/// `tokio::test`. It automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Spawns a server for the given router on an ephemeral localhost port.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;
type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// An HTTP server for in-memory asset fixtures, counting every hit.
///
/// Assets inserted via [`insert`](Self::insert) are served under the
/// `/assets/` prefix; anything else there is a 404. The
/// `/respond_statuscode/{num}/...` route answers with an arbitrary status
/// for testing transport error mapping.
pub struct AssetServer {
    server: Server,
    hits: Hits,
    files: Files,
}

impl AssetServer {
    /// Spawns a fresh asset server without any fixtures.
    pub fn new() -> Self {
        let hits: Hits = Arc::new(Mutex::new(BTreeMap::new()));
        let files: Files = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri,
                  req: extract::Request,
                  next: Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let serve_asset = {
            let files = files.clone();
            move |extract::Path(path): extract::Path<String>| {
                let files = files.clone();
                async move {
                    match files.lock().unwrap().get(&path) {
                        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
                        None => StatusCode::NOT_FOUND.into_response(),
                    }
                }
            }
        };

        let router = Router::new()
            .route("/assets/*path", get(serve_asset))
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self {
            server,
            hits,
            files,
        }
    }

    /// Registers the payload served for `GET /assets/<path>`.
    pub fn insert(&self, path: impl Into<String>, payload: Vec<u8>) {
        self.files.lock().unwrap().insert(path.into(), payload);
    }

    /// The root URL assets are served under, ending with a `/`.
    pub fn assets_root(&self) -> Url {
        self.server.url("assets/")
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    /// Returns the total number of requests observed, and resets the count.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns all request counts by URI, and resets them.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }
}

impl Default for AssetServer {
    fn default() -> Self {
        Self::new()
    }
}
