use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Canned answer served for one path.
#[derive(Clone)]
pub struct Route {
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub delay: Duration,
    /// When set, the body is streamed in chunks of this size without a
    /// `Content-Length` header.
    pub chunk_size: Option<usize>,
}

impl Route {
    pub fn json(body: impl Into<String>) -> Self {
        Self::raw(body.into().into_bytes())
    }

    pub fn raw(body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            delay: Duration::ZERO,
            chunk_size: None,
        }
    }

    pub fn chunked(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

#[derive(Clone, Default)]
pub struct UpdateRoutes {
    routes: Arc<RwLock<HashMap<String, Route>>>,
    hits: Arc<AtomicUsize>,
}

impl UpdateRoutes {
    pub fn insert(&self, path: impl Into<String>, route: Route) {
        self.routes
            .write()
            .expect("routes poisoned")
            .insert(path.into(), route);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn lookup(&self, path: &str) -> Option<Route> {
        self.routes
            .read()
            .expect("routes poisoned")
            .get(path)
            .cloned()
    }
}

pub struct MockUpdateServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockUpdateServer {
    pub async fn start(routes: UpdateRoutes) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock update listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let routes = routes.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(routes.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock update server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            // Delayed routes may still be sleeping; do not wait on them forever.
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}

async fn serve_request(
    routes: UpdateRoutes,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    routes.hits.fetch_add(1, Ordering::SeqCst);

    if req.method() != Method::GET {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let Some(route) = routes.lookup(req.uri().path()) else {
        let mut response = Response::new(Body::from("not found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    };

    if !route.delay.is_zero() {
        sleep(route.delay).await;
    }

    let body = match route.chunk_size {
        Some(chunk_size) => streamed_body(route.body, chunk_size),
        None => Body::from(route.body),
    };
    let mut response = Response::new(body);
    *response.status_mut() = route.status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn streamed_body(bytes: Vec<u8>, chunk_size: usize) -> Body {
    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        for chunk in bytes.chunks(chunk_size) {
            // The client hangs up once it has seen enough.
            if sender.send_data(chunk.to_vec().into()).await.is_err() {
                return;
            }
        }
    });
    body
}
