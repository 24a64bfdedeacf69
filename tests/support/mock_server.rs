use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const LIST_PATH: &str = "/api/device_tokens/";
pub const REGISTER_PATH: &str = "/json/1.3/registerDevice";

/// One scripted answer of the registration endpoint.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Reject { status_code: i64, message: String },
    ServerError(u16),
    /// Holds the request open for the given time before answering OK.
    Stall(Duration),
}

impl Reply {
    pub fn reject(status_code: i64, message: &str) -> Self {
        Reply::Reject {
            status_code,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryPage {
    pub totals: Option<(u64, u64)>,
    pub items: Vec<(String, bool)>,
}

impl RegistryPage {
    pub fn new(totals: Option<(u64, u64)>, items: &[(&str, bool)]) -> Self {
        Self {
            totals,
            items: items
                .iter()
                .map(|(token, active)| (token.to_string(), *active))
                .collect(),
        }
    }
}

/// Shared state behind both mock endpoints.
#[derive(Clone, Default)]
pub struct MockServices {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    pages: Vec<RegistryPage>,
    failing_pages: HashMap<usize, u16>,
    scripts: HashMap<String, VecDeque<Reply>>,
    fallback: Option<Reply>,
    registry_requests: Vec<RegistryRequest>,
    registrations: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct RegistryRequest {
    pub path_and_query: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
}

impl MockServices {
    pub fn with_pages(pages: Vec<RegistryPage>) -> Self {
        let services = Self::default();
        services.lock().pages = pages;
        services
    }

    /// Registry of `count` records spread over pages of `page_size`, every
    /// third record inactive.
    pub fn generated(count: usize, page_size: usize) -> Self {
        let tokens: Vec<(String, bool)> = (0..count)
            .map(|index| (format!("token-{index:04}"), index % 3 != 2))
            .collect();
        let active = tokens.iter().filter(|(_, active)| *active).count() as u64;
        let mut pages: Vec<RegistryPage> = tokens
            .chunks(page_size.max(1))
            .map(|chunk| RegistryPage {
                totals: None,
                items: chunk.to_vec(),
            })
            .collect();
        if pages.is_empty() {
            pages.push(RegistryPage {
                totals: None,
                items: Vec::new(),
            });
        }
        pages[0].totals = Some((count as u64, active));
        Self::with_pages(pages)
    }

    /// Answers `replies` in order for `token`, then falls back to the default.
    pub fn script(&self, token: &str, replies: Vec<Reply>) {
        self.lock()
            .scripts
            .insert(token.to_string(), replies.into());
    }

    /// Reply used once a token's script is exhausted. Defaults to OK.
    pub fn set_fallback(&self, reply: Reply) {
        self.lock().fallback = Some(reply);
    }

    pub fn fail_page(&self, index: usize, status: u16) {
        self.lock().failing_pages.insert(index, status);
    }

    pub fn registry_requests(&self) -> Vec<RegistryRequest> {
        self.lock().registry_requests.clone()
    }

    pub fn registrations(&self) -> Vec<Value> {
        self.lock().registrations.clone()
    }

    pub fn registration_count(&self, token: &str) -> usize {
        self.lock()
            .registrations
            .iter()
            .filter(|body| body["request"]["push_token"] == token)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().expect("mock state poisoned")
    }

    fn page_body(&self, base_url: &str, index: usize) -> Option<Result<Value, u16>> {
        let state = self.lock();
        if let Some(status) = state.failing_pages.get(&index) {
            return Some(Err(*status));
        }
        let page = state.pages.get(index)?;
        let mut body = json!({
            "device_tokens": page.items.iter().map(|(token, active)| json!({
                "device_token": token,
                "active": active,
                "created": "2013-03-11 17:49:36",
                "alias": null,
                "tags": [],
            })).collect::<Vec<_>>(),
        });
        if let Some((total, active)) = page.totals {
            body["device_tokens_count"] = json!(total);
            body["active_device_tokens_count"] = json!(active);
        }
        if index + 1 < state.pages.len() {
            body["next_page"] = json!(format!("{base_url}{LIST_PATH}?page={}", index + 1));
        }
        Some(Ok(body))
    }

    fn next_reply(&self, token: &str) -> Reply {
        let mut state = self.lock();
        if let Some(reply) = state
            .scripts
            .get_mut(token)
            .and_then(|replies| replies.pop_front())
        {
            return reply;
        }
        state.fallback.clone().unwrap_or(Reply::Ok)
    }
}

pub struct MockServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub async fn start(services: MockServices) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let url = format!("http://{addr}");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let base_url = url.clone();
        let make_service = make_service_fn(move |_| {
            let services = services.clone();
            let base_url = base_url.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    serve_request(services.clone(), base_url.clone(), req)
                }))
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
                eprintln!("mock server stopped: {err}");
            }
        });

        Ok(Self {
            url,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn list_url(&self) -> String {
        format!("{}{LIST_PATH}", self.url)
    }

    pub fn register_url(&self) -> String {
        format!("{}{REGISTER_PATH}", self.url)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    services: MockServices,
    base_url: String,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    match (&method, path.as_str()) {
        (&Method::GET, LIST_PATH) => Ok(serve_page(&services, &base_url, &req)),
        (&Method::POST, REGISTER_PATH) => Ok(serve_registration(&services, req).await),
        _ => Ok(status_response(StatusCode::NOT_FOUND, "not found")),
    }
}

fn serve_page(services: &MockServices, base_url: &str, req: &Request<Body>) -> Response<Body> {
    let header = |name: hyper::header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    services.lock().registry_requests.push(RegistryRequest {
        path_and_query: req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_default(),
        authorization: header(hyper::header::AUTHORIZATION),
        accept: header(hyper::header::ACCEPT),
    });

    let index = req
        .uri()
        .query()
        .unwrap_or_default()
        .split('&')
        .find_map(|pair| pair.strip_prefix("page="))
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);

    match services.page_body(base_url, index) {
        Some(Ok(body)) => json_response(StatusCode::OK, &body),
        Some(Err(status)) => status_response(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "registry unavailable",
        ),
        None => status_response(StatusCode::NOT_FOUND, "no such page"),
    }
}

async fn serve_registration(services: &MockServices, req: Request<Body>) -> Response<Body> {
    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return status_response(StatusCode::BAD_REQUEST, &format!("unreadable body: {err}"))
        }
    };
    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            return status_response(StatusCode::BAD_REQUEST, &format!("invalid JSON: {err}"))
        }
    };

    let token = payload["request"]["push_token"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    services.lock().registrations.push(payload);

    match services.next_reply(&token) {
        Reply::Ok => json_response(StatusCode::OK, &ok_body()),
        Reply::Reject {
            status_code,
            message,
        } => json_response(
            StatusCode::OK,
            &json!({"status_code": status_code, "status_message": message, "response": null}),
        ),
        Reply::ServerError(status) => status_response(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "upstream failure",
        ),
        Reply::Stall(delay) => {
            tokio::time::sleep(delay).await;
            json_response(StatusCode::OK, &ok_body())
        }
    }
}

fn ok_body() -> Value {
    json!({"status_code": 200, "status_message": "OK", "response": null})
}

fn json_response(status: StatusCode, body: &Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response
}
