//! End-to-end tests of the per-request plugin pipeline

use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use plughost_core::{responses, Body, Error, Middleware, Next};
use plughost_plugin_api::prelude::*;
use plughost_plugin_api::{entry, EntryRegistrar, ModuleDeclaration};
use plughost_runtime::{
    ChannelObserver, PluginHost, PluginMiddleware, PluginSource, StaticLoader, UnloadOutcome,
    DEFAULT_MAX_ATTEMPTS,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

const ROOT: &str = "/srv/plugins";

#[derive(Default)]
struct Failing;

#[async_trait]
impl Endpoint for Failing {
    async fn execute(&self, _ctx: &mut EndpointContext) -> Result<(), PluginError> {
        Err(PluginError::execution("database offline"))
    }
}

impl EndpointType for Failing {
    const ROUTE: Option<RouteSpec> = Some(RouteSpec::new("GET", "/fail"));
}

#[derive(Default)]
struct PartialThenFail;

#[async_trait]
impl Endpoint for PartialThenFail {
    async fn execute(&self, ctx: &mut EndpointContext) -> Result<(), PluginError> {
        ctx.response().write_str("partial");
        Err(PluginError::execution("gave up halfway"))
    }
}

impl EndpointType for PartialThenFail {
    const ROUTE: Option<RouteSpec> = Some(RouteSpec::new("GET", "/partial"));
}

#[derive(Default)]
struct Leaky;

#[async_trait]
impl Endpoint for Leaky {
    async fn execute(&self, ctx: &mut EndpointContext) -> Result<(), PluginError> {
        ctx.scope().spawn(std::future::pending::<()>());
        ctx.response().write_str("leaked");
        Ok(())
    }
}

impl EndpointType for Leaky {
    const ROUTE: Option<RouteSpec> = Some(RouteSpec::new("GET", "/leak"));
}

#[derive(Default)]
struct Silent;

#[async_trait]
impl Endpoint for Silent {
    async fn execute(&self, ctx: &mut EndpointContext) -> Result<(), PluginError> {
        ctx.response().set_status(StatusCode::ACCEPTED)?;
        Ok(())
    }
}

impl EndpointType for Silent {
    const ROUTE: Option<RouteSpec> = Some(RouteSpec::new("POST", "/silent"));
}

#[derive(Default)]
struct Panicking;

#[async_trait]
impl Endpoint for Panicking {
    async fn execute(&self, _ctx: &mut EndpointContext) -> Result<(), PluginError> {
        panic!("index out of range");
    }
}

impl EndpointType for Panicking {
    const ROUTE: Option<RouteSpec> = Some(RouteSpec::new("GET", "/panic"));
}

#[derive(Default)]
struct Unrouted;

#[async_trait]
impl Endpoint for Unrouted {
    async fn execute(&self, ctx: &mut EndpointContext) -> Result<(), PluginError> {
        ctx.response().write_str("must never run");
        Ok(())
    }
}

impl EndpointType for Unrouted {}

fn register_behaviours(registrar: &mut dyn EntryRegistrar) {
    registrar.register("behaviours::Failing", entry::<Failing>());
    registrar.register("behaviours::PartialThenFail", entry::<PartialThenFail>());
    registrar.register("behaviours::Leaky", entry::<Leaky>());
    registrar.register("behaviours::Silent", entry::<Silent>());
    registrar.register("behaviours::Panicking", entry::<Panicking>());
    registrar.register("behaviours::Unrouted", entry::<Unrouted>());
}

struct Harness {
    host: Arc<PluginHost>,
    outcomes: UnboundedReceiver<UnloadOutcome>,
    continued: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let loader = StaticLoader::new();
        loader.register(
            format!("{ROOT}/test_endpoint"),
            test_endpoint::plughost_module_declaration,
        );
        loader.register(
            format!("{ROOT}/behaviours"),
            ModuleDeclaration::new(register_behaviours),
        );
        let (observer, outcomes) = ChannelObserver::new();
        let host = PluginHost::builder()
            .root(ROOT)
            .loader(Arc::new(loader))
            .observer(Arc::new(observer))
            .build()
            .unwrap();

        Self {
            host: Arc::new(host),
            outcomes,
            continued: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn middleware(&self, module: &str, entry_type: &str) -> PluginMiddleware {
        PluginMiddleware::new(
            Arc::clone(&self.host),
            PluginSource::new(entry_type, module, entry_type),
        )
    }

    fn next(&self) -> Next {
        let continued = Arc::clone(&self.continued);
        Next::handler(move |req: Request<Body>| {
            let continued = Arc::clone(&continued);
            async move {
                continued.fetch_add(1, Ordering::SeqCst);
                if req.method() == Method::GET && req.uri().path() == "/" {
                    responses::ok().text("Hello World!")
                } else {
                    responses::not_found(req.uri().path())
                }
            }
        })
    }

    fn continued(&self) -> usize {
        self.continued.load(Ordering::SeqCst)
    }
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::default())
        .unwrap()
}

async fn body_of(response: http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_matching_request_served_by_plugin() {
    let mut harness = Harness::new();
    let middleware = harness.middleware("test_endpoint", test_endpoint::AN_ENDPOINT);

    let response = middleware
        .call(request(Method::GET, "/plug/test"), harness.next())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(body_of(response).await, r#"{"Message":"yo! Gotchabc!"}"#);
    assert_eq!(harness.continued(), 0);

    let outcome = harness.outcomes.recv().await.unwrap();
    assert!(outcome.reclaimed);
    assert_eq!(outcome.attempts_used, 0);
    assert_eq!(outcome.plugin, test_endpoint::AN_ENDPOINT);
}

#[tokio::test]
async fn test_route_match_ignores_case_and_query() {
    let harness = Harness::new();
    let middleware = harness.middleware("test_endpoint", test_endpoint::AN_ENDPOINT);

    let response = middleware
        .call(request(Method::GET, "/PLUG/Test?verbose=1"), harness.next())
        .await
        .unwrap();

    assert_eq!(body_of(response).await, r#"{"Message":"yo! Gotchabc!"}"#);
    assert_eq!(harness.continued(), 0);
}

#[tokio::test]
async fn test_non_matching_request_falls_through() {
    let mut harness = Harness::new();
    let middleware = harness.middleware("test_endpoint", test_endpoint::AN_ENDPOINT);

    let response = middleware
        .call(request(Method::GET, "/"), harness.next())
        .await
        .unwrap();
    assert_eq!(body_of(response).await, "Hello World!");

    let response = middleware
        .call(request(Method::POST, "/plug/test"), harness.next())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(harness.continued(), 2);
    assert!(harness.outcomes.recv().await.unwrap().reclaimed);
    assert!(harness.outcomes.recv().await.unwrap().reclaimed);
}

#[tokio::test]
async fn test_unrouted_entry_never_dispatched() {
    let harness = Harness::new();
    let middleware = harness.middleware("behaviours", "behaviours::Unrouted");

    let response = middleware
        .call(request(Method::GET, "/"), harness.next())
        .await
        .unwrap();

    assert_eq!(body_of(response).await, "Hello World!");
    assert_eq!(harness.continued(), 1);
}

#[tokio::test]
async fn test_endpoint_error_without_response_is_500() {
    let mut harness = Harness::new();
    let middleware = harness.middleware("behaviours", "behaviours::Failing");

    let err = middleware
        .call(request(Method::GET, "/fail"), harness.next())
        .await
        .unwrap_err();

    match &err {
        Error::Plugin { plugin, message } => {
            assert_eq!(plugin, "behaviours::Failing");
            assert!(message.contains("database offline"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.continued(), 0);

    // Unloaded despite the failure.
    assert!(harness.outcomes.recv().await.unwrap().reclaimed);
    assert_eq!(harness.host.stats().unloaded, 1);
}

#[tokio::test]
async fn test_endpoint_panic_is_500_and_still_unloads() {
    let mut harness = Harness::new();
    let middleware = harness.middleware("behaviours", "behaviours::Panicking");

    let err = middleware
        .call(request(Method::GET, "/panic"), harness.next())
        .await
        .unwrap_err();

    match &err {
        Error::Plugin { plugin, message } => {
            assert_eq!(plugin, "behaviours::Panicking");
            assert!(message.contains("index out of range"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.continued(), 0);
    assert!(harness.outcomes.recv().await.unwrap().reclaimed);
}

#[tokio::test]
async fn test_started_response_survives_endpoint_error() {
    let harness = Harness::new();
    let middleware = harness.middleware("behaviours", "behaviours::PartialThenFail");

    let response = middleware
        .call(request(Method::GET, "/partial"), harness.next())
        .await
        .unwrap();

    assert_eq!(body_of(response).await, "partial");
    assert_eq!(harness.continued(), 0);
}

#[tokio::test]
async fn test_unstarted_response_continues_pipeline() {
    let harness = Harness::new();
    let middleware = harness.middleware("behaviours", "behaviours::Silent");

    let response = middleware
        .call(request(Method::POST, "/silent"), harness.next())
        .await
        .unwrap();

    // The status the endpoint set was never sent.
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(harness.continued(), 1);
}

#[tokio::test]
async fn test_missing_entry_type_reports_type_resolution() {
    let harness = Harness::new();
    let middleware = harness.middleware("test_endpoint", "test_endpoint::Nope");

    let err = middleware
        .call(request(Method::GET, "/plug/test"), harness.next())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("test_endpoint::Nope"));
    assert_eq!(harness.continued(), 0);

    let stats = harness.host.stats();
    assert_eq!(stats.loaded, 1);
    assert_eq!(stats.unloaded, 1);
}

#[tokio::test]
async fn test_missing_module_is_load_error() {
    let harness = Harness::new();
    let middleware = harness.middleware("nowhere", test_endpoint::AN_ENDPOINT);

    let err = middleware
        .call(request(Method::GET, "/plug/test"), harness.next())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Module not found"));
    assert_eq!(harness.host.stats().loaded, 0);
}

#[tokio::test]
async fn test_leaked_task_reported_after_bounded_attempts() {
    let mut harness = Harness::new();
    let middleware = harness.middleware("behaviours", "behaviours::Leaky");

    let response = middleware
        .call(request(Method::GET, "/leak"), harness.next())
        .await
        .unwrap();
    assert_eq!(body_of(response).await, "leaked");

    let outcome = harness.outcomes.recv().await.unwrap();
    assert!(!outcome.reclaimed);
    assert_eq!(outcome.attempts_used, DEFAULT_MAX_ATTEMPTS);
    assert_eq!(outcome.plugin, "behaviours::Leaky");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_get_distinct_boundaries() {
    let mut harness = Harness::new();
    let middleware = Arc::new(harness.middleware("test_endpoint", test_endpoint::AN_ENDPOINT));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let middleware = Arc::clone(&middleware);
        let next = harness.next();
        tasks.push(tokio::spawn(async move {
            middleware
                .call(request(Method::GET, "/plug/test"), next)
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let mut ids = std::collections::HashSet::new();
    for _ in 0..16 {
        let outcome = harness.outcomes.recv().await.unwrap();
        assert!(outcome.reclaimed);
        ids.insert(outcome.context_id);
    }
    assert_eq!(ids.len(), 16);

    let stats = harness.host.stats();
    assert_eq!(stats.loaded, 16);
    assert_eq!(stats.unloaded, 16);
}
