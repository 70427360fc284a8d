//! HTTP request handler

use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::BodyExt;
use plughost_core::middleware::{HandlerFn, HandlerFuture};
use plughost_core::{responses, Body, Error, Middleware, Next, RequestContext, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Final handler for requests no middleware answered
///
/// `GET /` answers `Hello World!`; everything else is 404.
pub fn fallback_handler() -> HandlerFn {
    Box::new(|req: Request<Body>| -> HandlerFuture {
        Box::pin(async move {
            if req.method() == Method::GET && req.uri().path() == "/" {
                responses::ok().text("Hello World!")
            } else {
                Err(Error::RouteNotFound(format!(
                    "{} {}",
                    req.method(),
                    req.uri().path()
                )))
            }
        })
    })
}

/// HTTP request handler
#[derive(Clone)]
pub struct RequestHandler {
    middleware_chain: Arc<[Arc<dyn Middleware>]>,
    fallback: Arc<HandlerFn>,
    request_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("middleware_count", &self.middleware_chain.len())
            .field("request_count", &self.request_count())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RequestHandler {
    /// Create a handler running `middleware_chain` in order, then the fallback
    pub fn new(middleware_chain: Vec<Arc<dyn Middleware>>) -> Self {
        Self::with_fallback(middleware_chain, fallback_handler())
    }

    /// Create a handler with a custom final handler
    pub fn with_fallback(middleware_chain: Vec<Arc<dyn Middleware>>, fallback: HandlerFn) -> Self {
        Self {
            middleware_chain: middleware_chain.into(),
            fallback: Arc::new(fallback),
            request_count: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests handled so far
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Requests currently being handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Handle a request, turning pipeline errors into error responses
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> std::result::Result<Response<Body>, http::Error>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let result = {
            let _in_flight = InFlight::enter(&self.in_flight);
            self.dispatch(req, remote_addr).await
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                if matches!(e, Error::RouteNotFound(_)) {
                    debug!(error = %e, "No handler for request");
                } else {
                    error!(error = %e, "Request handler error");
                }
                error_response(&e)
            }
        }
    }

    async fn dispatch<B>(
        &self,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| Error::InvalidRequest(format!("Failed to read request body: {e}")))?
            .to_bytes();

        let mut req = Request::from_parts(parts, Body::new(body));
        let ctx = match remote_addr {
            Some(addr) => RequestContext::with_remote_addr(addr),
            None => RequestContext::new(),
        };
        let request_id = ctx.request_id.clone();
        req.extensions_mut().insert(ctx);

        debug!(
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
            "Handling request"
        );

        Next::with_shared_handler(
            Arc::clone(&self.middleware_chain),
            Arc::clone(&self.fallback),
        )
        .run(req)
        .await
    }
}

/// Counts one request as in flight until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn error_response(err: &Error) -> std::result::Result<Response<Body>, http::Error> {
    match responses::from_error(err) {
        Ok(response) => Ok(response),
        Err(Error::HttpError(e)) => Err(e),
        Err(other) => Response::builder()
            .status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::new(Bytes::from(format!("Error: {other}")))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::default())
            .unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_fallback_root() {
        let handler = RequestHandler::new(Vec::new());
        let response = handler.handle(request(Method::GET, "/"), None).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Hello World!");
        assert_eq!(handler.request_count(), 1);
        assert_eq!(handler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fallback_not_found() {
        let handler = RequestHandler::new(Vec::new());
        let response = handler
            .handle(request(Method::POST, "/"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handler
            .handle(request(Method::GET, "/missing"), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.starts_with("Error: Route not found"));
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait::async_trait]
    impl Middleware for Failing {
        async fn call(&self, _req: Request<Body>, _next: Next) -> Result<Response<Body>> {
            Err(Error::plugin("broken", "boom"))
        }
    }

    #[tokio::test]
    async fn test_middleware_error_becomes_500() {
        let handler = RequestHandler::new(vec![Arc::new(Failing)]);
        let response = handler.handle(request(Method::GET, "/"), None).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            "Error: Plugin error in 'broken': boom"
        );
    }

    #[tokio::test]
    async fn test_dropped_request_leaves_no_in_flight() {
        let handler = RequestHandler::with_fallback(
            Vec::new(),
            Box::new(|_req: Request<Body>| -> HandlerFuture {
                Box::pin(std::future::pending())
            }),
        );

        let mut pending = Box::pin(handler.handle(request(Method::GET, "/"), None));
        tokio::select! {
            biased;
            _ = &mut pending => unreachable!("fallback never completes"),
            _ = tokio::task::yield_now() => {}
        }
        assert_eq!(handler.in_flight(), 1);

        drop(pending);
        assert_eq!(handler.in_flight(), 0);
        assert_eq!(handler.request_count(), 1);
    }

    #[tokio::test]
    async fn test_request_context_attached() {
        let handler = RequestHandler::with_fallback(
            Vec::new(),
            Box::new(|req: Request<Body>| -> HandlerFuture {
                Box::pin(async move {
                    let ctx = req.extensions().get::<RequestContext>().cloned();
                    let addr = ctx.and_then(|ctx| ctx.remote_addr);
                    responses::ok().text(format!("{addr:?}"))
                })
            }),
        );

        let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let response = handler
            .handle(request(Method::GET, "/"), Some(addr))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "Some(10.0.0.1:4000)");
    }
}
