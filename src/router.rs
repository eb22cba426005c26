//! Request routing and the HTTP server.
//!
//! Routes map a method and a path pattern (`/foo/:id`) to an async handler.
//! Handlers return `Result`; any error is logged and answered by the 500
//! handler, an unknown path by the 404 handler. Post-middleware runs on every
//! response before it is sent.
//!
//! `Router::run` serves the table over HTTP with axum. Everything else here is
//! transport-agnostic so handlers can be exercised through `Router::dispatch`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Form;
use axum::body::Body;
use axum::extract::{FromRequest, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{error, info, warn};
use serde::Serialize;
use tokio::net::TcpListener;

pub use axum::http::Method;

use crate::app::AppState;
use crate::error::{Error, Result};
use crate::settings::Settings;

/// Outcome of a handler: status, body and extra headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Response {
    /// HTTP 200 with a plain body and no headers.
    pub fn ok(body: impl Into<String>) -> Self {
        Response {
            status_code: 200,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// HTTP 200 with an HTML content type.
    pub fn html(body: impl Into<String>) -> Self {
        Response::ok(body).with_header("Content-Type", "text/html; charset=utf-8")
    }

    /// Construct a plain-text 404 "not found" response.
    pub fn not_found() -> Self {
        Response::ok("404 Not Found").with_status(404)
    }

    /// Construct a plain-text 405 response for a path served under another method.
    pub fn method_not_allowed() -> Self {
        Response::ok("405 Method Not Allowed").with_status(405)
    }

    /// Construct a plain-text 500 response, used when no error page can be rendered.
    pub fn internal_error() -> Self {
        Response::ok("500 Internal Server Error").with_status(500)
    }

    /// JSON response from any serializable payload; a payload that fails
    /// to serialize becomes a 500.
    pub fn json<T: Serialize>(data: T, status_code: u16) -> Self {
        let response = match serde_json::to_string(&data) {
            Ok(body) => Response::ok(body).with_status(status_code),
            Err(err) => {
                error!("Failed to serialize JSON response: {}", err);
                Response::ok("{\"error\": \"Serialization failed\"}").with_status(500)
            }
        };
        response.with_header("Content-Type", "application/json; charset=utf-8")
    }

    /// Replace the status code.
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Set a header, replacing any previous value under the same key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

impl axum::response::IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = status;
        for (key, value) in self.headers {
            match (HeaderName::try_from(key.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => warn!("Dropping invalid response header {:?}", key),
            }
        }
        response
    }
}

/// Maps status codes to HTTP status text for log lines.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        404 => "Not Found",
        405 => "Method Not Allowed",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// An incoming request as seen by handlers.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Parameters extracted from the route pattern.
    pub params: HashMap<String, String>,
    /// Decoded `application/x-www-form-urlencoded` body fields.
    pub form: HashMap<String, String>,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Construct a request with no parameters, form fields or headers.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            params: HashMap::new(),
            form: HashMap::new(),
            headers: HashMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Request::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Request::new(Method::POST, path)
    }

    /// Attach decoded form fields.
    pub fn with_form(mut self, form: HashMap<String, String>) -> Self {
        self.form = form;
        self
    }

    /// Attach a header; the name is stored lowercase.
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// True when the `Accept` header asks for JSON.
    pub fn accepts_json(&self) -> bool {
        self.header("accept")
            .is_some_and(|accept| accept.contains("application/json"))
    }
}

/// Per-request metadata visible to post-middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub start_time: Instant,
}

/// What a handler produces; `Err` is answered by the 500 handler.
pub type HandlerResult = Result<Response, Error>;

/// Type alias for async handler functions for HTTP routes.
pub type Handler = Arc<dyn Fn(Request, AppState) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Renders an error page; must not fail.
pub type ErrorHandler = Arc<dyn Fn(&AppState) -> Response + Send + Sync>;

/// Runs after the handler and may rewrite the response.
pub type PostMiddleware = Arc<dyn Fn(&RequestContext, Response) -> Response + Send + Sync>;

/// Wraps an async fn as a `Handler`.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Request, AppState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |request: Request, state: AppState| f(request, state).boxed())
}

/// A registered route: method, path pattern and handler.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub path_pattern: String,
    pub handler: Handler,
}

/// The application router: routes, error handlers, post-middleware and the
/// state handed to every handler.
#[derive(Clone)]
pub struct Router {
    pub routes: Vec<Route>,
    pub post_middlewares: Vec<PostMiddleware>,
    pub not_found: ErrorHandler,
    pub internal_error: ErrorHandler,
    pub app_state: AppState,
}

impl Router {
    /// Create an empty router with plain-text 404/500 handlers.
    pub fn new(app_state: AppState) -> Self {
        Router {
            routes: Vec::new(),
            post_middlewares: Vec::new(),
            not_found: Arc::new(|_| Response::not_found()),
            internal_error: Arc::new(|_| Response::internal_error()),
            app_state,
        }
    }

    /// Register a handler for `method` on `path_pattern`. A `GET` route also
    /// answers `HEAD`.
    pub fn add_route(&mut self, method: Method, path_pattern: &str, handler: Handler) {
        self.routes.push(Route {
            method,
            path_pattern: path_pattern.to_string(),
            handler,
        });
    }

    /// Add a post-middleware to be run after each handler, in registration order.
    pub fn add_post_middleware(&mut self, middleware: PostMiddleware) {
        self.post_middlewares.push(middleware);
    }

    /// Replace the handler for unknown paths.
    pub fn set_not_found(&mut self, handler: ErrorHandler) {
        self.not_found = handler;
    }

    /// Replace the handler for failed requests.
    pub fn set_internal_error(&mut self, handler: ErrorHandler) {
        self.internal_error = handler;
    }

    /// Routes one request through the table, error handlers and post-middleware.
    /// `HEAD` is served by the matching `GET` route with the body dropped.
    pub async fn dispatch(&self, mut request: Request) -> Response {
        let head = request.method == Method::HEAD;
        let ctx = RequestContext {
            method: request.method.clone(),
            path: request.path.clone(),
            start_time: Instant::now(),
        };

        let mut path_matched = false;
        let mut found = None;
        for route in &self.routes {
            if let Some(params) = match_path(&route.path_pattern, &request.path) {
                path_matched = true;
                if route.method == request.method || (head && route.method == Method::GET) {
                    found = Some((route, params));
                    break;
                }
            }
        }

        let mut response = match found {
            Some((route, params)) => {
                request.params = params;
                match (route.handler)(request, self.app_state.clone()).await {
                    Ok(response) => response,
                    Err(err) => {
                        error!("{} {} failed: {}", ctx.method, ctx.path, err);
                        (self.internal_error)(&self.app_state)
                    }
                }
            }
            None if path_matched => Response::method_not_allowed(),
            None => (self.not_found)(&self.app_state),
        };

        for post_middleware in &self.post_middlewares {
            response = (post_middleware)(&ctx, response);
        }
        if head {
            response.body.clear();
        }
        response
    }

    /// Serves the router on `settings.addr()` until Ctrl-C.
    pub async fn run(self, settings: &Settings) -> Result<()> {
        let addr = settings.addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serves the router on an already bound listener until Ctrl-C.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("HTTP server running on http://{}", listener.local_addr()?);

        let app = axum::Router::new()
            .fallback(serve_request)
            .with_state(Arc::new(self));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("HTTP server stopped");
        Ok(())
    }
}

/// Adapts an axum request: copies headers and decodes urlencoded POST bodies.
/// A body that cannot be decoded is treated as an empty form.
async fn serve_request(State(router): State<Arc<Router>>, request: axum::extract::Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();

    let form = if method == Method::POST {
        match Form::<HashMap<String, String>>::from_request(request, &()).await {
            Ok(Form(fields)) => fields,
            Err(rejection) => {
                warn!("Ignoring unreadable form body on {}: {}", path, rejection);
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    let mut request = Request::new(method, path).with_form(form);
    request.headers = headers;
    router.dispatch(request).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Logs one line per request with status and latency.
pub fn access_log() -> PostMiddleware {
    Arc::new(|ctx: &RequestContext, response: Response| {
        info!(
            "{} {} -> {} {} ({:?})",
            ctx.method,
            ctx.path,
            response.status_code,
            status_text(response.status_code),
            ctx.start_time.elapsed()
        );
        response
    })
}

#[macro_export]
macro_rules! route {
    ($router:expr, $( $method:ident $path:expr => $handler:expr ),* $(,)?) => {
        $(
            $router.add_route(
                $crate::router::Method::$method,
                $path,
                $crate::router::handler($handler),
            );
        )*
    };
}

/// Matches a path pattern (e.g. `/foo/:id`) against a real path,
/// extracting parameters into a HashMap if matched, or None if not.
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();

    for (p, a) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            params.insert(name.to_string(), a.to_string());
        } else if p != a {
            return None;
        }
    }

    Some(params)
}
