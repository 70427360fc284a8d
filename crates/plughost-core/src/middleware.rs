//! Middleware trait and the continuation chain

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Body type alias
pub type Body = Full<Bytes>;

/// Middleware trait for request/response processing
#[async_trait]
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Process a request
    ///
    /// # Arguments
    ///
    /// * `req` - The incoming HTTP request
    /// * `next` - The rest of the pipeline. Running it consumes it, so a
    ///   middleware can invoke its continuation at most once.
    ///
    /// # Returns
    ///
    /// Returns the HTTP response or an error
    async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>>;
}

/// Boxed future returned by the final handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response<Body>>> + Send>>;

/// Type alias for the final handler function
pub type HandlerFn = Box<dyn Fn(Request<Body>) -> HandlerFuture + Send + Sync>;

/// Represents the next middleware/handler in the chain
///
/// `Next` is deliberately not `Clone`: [`Next::run`] takes `self`.
pub struct Next {
    middleware_stack: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    final_handler: Option<Arc<HandlerFn>>,
}

impl Next {
    /// Create a new Next from a middleware stack
    pub fn new(middleware_stack: Arc<[Arc<dyn Middleware>]>) -> Self {
        Self {
            middleware_stack,
            index: 0,
            final_handler: None,
        }
    }

    /// Create a new Next with a final handler
    pub fn with_handler(middleware_stack: Arc<[Arc<dyn Middleware>]>, handler: HandlerFn) -> Self {
        Self::with_shared_handler(middleware_stack, Arc::new(handler))
    }

    /// Create a new Next with a final handler shared across requests
    pub fn with_shared_handler(
        middleware_stack: Arc<[Arc<dyn Middleware>]>,
        handler: Arc<HandlerFn>,
    ) -> Self {
        Self {
            middleware_stack,
            index: 0,
            final_handler: Some(handler),
        }
    }

    /// Create a Next that only runs the given handler
    pub fn handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<Body>>> + Send + 'static,
    {
        Self::with_handler(
            Arc::new([]),
            Box::new(move |req| -> HandlerFuture { Box::pin(handler(req)) }),
        )
    }

    /// Run the next middleware or final handler
    pub async fn run(self, req: Request<Body>) -> Result<Response<Body>> {
        if let Some(middleware) = self.middleware_stack.get(self.index) {
            let next = Self {
                middleware_stack: Arc::clone(&self.middleware_stack),
                index: self.index + 1,
                final_handler: self.final_handler.clone(),
            };
            middleware.call(req, next).await
        } else if let Some(handler) = self.final_handler {
            handler(req).await
        } else {
            Err(Error::Internal(
                "Middleware chain completed without handler".to_string(),
            ))
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field(
                "remaining",
                &self.middleware_stack.len().saturating_sub(self.index),
            )
            .field("has_handler", &self.final_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TaggingMiddleware {
        tag: &'static str,
    }

    #[async_trait]
    impl Middleware for TaggingMiddleware {
        async fn call(&self, req: Request<Body>, next: Next) -> Result<Response<Body>> {
            let mut response = next.run(req).await?;
            response
                .headers_mut()
                .append("x-chain", http::HeaderValue::from_static(self.tag));
            Ok(response)
        }
    }

    #[tokio::test]
    async fn test_chain_without_handler_errors() {
        let middleware = Arc::new(TaggingMiddleware { tag: "first" }) as Arc<dyn Middleware>;
        let stack: Arc<[Arc<dyn Middleware>]> = Arc::new([middleware]);
        let next = Next::new(stack);

        let req = Request::builder()
            .uri("/test")
            .body(Body::from("test"))
            .unwrap();

        let result = next.run(req).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_then_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let stack: Arc<[Arc<dyn Middleware>]> = Arc::new([
            Arc::new(TaggingMiddleware { tag: "outer" }) as Arc<dyn Middleware>,
            Arc::new(TaggingMiddleware { tag: "inner" }) as Arc<dyn Middleware>,
        ]);

        let counter = Arc::clone(&hits);
        let next = Next::with_handler(
            stack,
            Box::new(move |_req| -> HandlerFuture {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {
                    Ok::<_, Error>(
                        Response::builder()
                            .status(StatusCode::OK)
                            .body(Body::from("done"))?,
                    )
                })
            }),
        );

        let req = Request::builder().uri("/").body(Body::default()).unwrap();
        let response = next.run(req).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let tags: Vec<_> = response
            .headers()
            .get_all("x-chain")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(tags, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn test_handler_shortcut() {
        let next = Next::handler(|_req| async {
            Ok::<_, Error>(
                Response::builder()
                    .status(StatusCode::ACCEPTED)
                    .body(Body::default())?,
            )
        });

        let req = Request::builder().uri("/").body(Body::default()).unwrap();
        let response = next.run(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
