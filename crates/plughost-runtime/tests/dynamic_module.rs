//! The test-endpoint module loaded as a real shared library
//!
//! Uses the `test-endpoint` cdylib from the workspace target directory,
//! building it into a private target directory when it is missing.

use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use plughost_core::{responses, Body, Middleware, Next};
use plughost_runtime::{
    ChannelObserver, PluginHost, PluginMiddleware, PluginSource, UnloadOutcome,
};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::UnboundedReceiver;

fn find_module(dir: &Path) -> Option<PathBuf> {
    let name = format!("{DLL_PREFIX}test_endpoint{DLL_SUFFIX}");
    let exact = [dir.join(&name), dir.join("deps").join(&name)]
        .into_iter()
        .find(|candidate| candidate.is_file());

    exact.or_else(|| {
        let hashed = format!("{DLL_PREFIX}test_endpoint-");
        std::fs::read_dir(dir.join("deps"))
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .find(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&hashed) && n.ends_with(DLL_SUFFIX))
            })
    })
}

fn build_module(profile: &Path) -> PathBuf {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let target_dir = profile.join("dynamic-module");

    let status = Command::new(env!("CARGO"))
        .arg("build")
        .arg("--manifest-path")
        .arg(workspace.join("Cargo.toml"))
        .args(["-p", "test-endpoint", "--target-dir"])
        .arg(&target_dir)
        .status()
        .unwrap();
    assert!(status.success(), "building test-endpoint failed: {status}");

    find_module(&target_dir.join("debug")).unwrap()
}

/// The built module, from `target/<profile>` or a fresh build
fn module_path() -> &'static Path {
    static MODULE: OnceLock<PathBuf> = OnceLock::new();
    MODULE.get_or_init(|| {
        let exe = std::env::current_exe().unwrap();
        let profile = exe.parent().and_then(Path::parent).unwrap();
        find_module(profile).unwrap_or_else(|| build_module(profile))
    })
}

fn host() -> (Arc<PluginHost>, PluginSource, UnboundedReceiver<UnloadOutcome>) {
    let module = module_path();
    let root = module.parent().unwrap();
    let file_name = module.file_name().unwrap().to_str().unwrap();

    let (observer, outcomes) = ChannelObserver::new();
    let host = PluginHost::builder()
        .root(root)
        .observer(Arc::new(observer))
        .build()
        .unwrap();
    let source = PluginSource::new("test", file_name, test_endpoint::AN_ENDPOINT);

    (Arc::new(host), source, outcomes)
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::default())
        .unwrap()
}

#[tokio::test]
async fn test_clean_unload_closes_the_library() {
    let (host, source, _outcomes) = host();
    let descriptor = host.resolver().resolve(&source).unwrap();
    assert_eq!(descriptor.module_path, module_path());

    let processed = host
        .process(&source, request(Method::GET, "/plug/test"))
        .await
        .unwrap();
    let route = processed.route.clone().unwrap();
    let response = processed.response.unwrap();

    let outcome = host.verify_in_background(processed.unload).await.unwrap();
    assert!(outcome.reclaimed);
    assert_eq!(outcome.libraries_closed, 1);

    let stats = host.stats();
    assert_eq!(stats.loaded, 1);
    assert_eq!(stats.unloaded, 1);
    assert_eq!(stats.pending_libraries, 0);

    // Everything handed back outlives the closed library.
    assert_eq!(route.method, "get");
    assert_eq!(route.path, "/plug/test");
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(response.body(), br#"{"Message":"yo! Gotchabc!"}"#);
}

#[tokio::test]
async fn test_repeated_requests_leave_no_open_libraries() {
    let (host, source, _outcomes) = host();

    for _ in 0..20 {
        let processed = host
            .process(&source, request(Method::GET, "/plug/test"))
            .await
            .unwrap();
        assert!(processed.response_started());

        let outcome = host.verify_in_background(processed.unload).await.unwrap();
        assert!(outcome.reclaimed);
    }

    let stats = host.stats();
    assert_eq!(stats.loaded, 20);
    assert_eq!(stats.unloaded, 20);
    assert_eq!(stats.pending_libraries, 0);
    assert_eq!(host.shutdown(), 0);
}

#[tokio::test]
async fn test_unmatched_request_still_closes_the_library() {
    let (host, source, _outcomes) = host();

    let processed = host
        .process(&source, request(Method::POST, "/plug/test"))
        .await
        .unwrap();
    assert!(!processed.dispatched());

    let outcome = host.verify_in_background(processed.unload).await.unwrap();
    assert!(outcome.reclaimed);
    assert_eq!(host.stats().pending_libraries, 0);
}

#[tokio::test]
async fn test_middleware_response_outlives_the_library() {
    let (host, source, mut outcomes) = host();
    let middleware = PluginMiddleware::new(Arc::clone(&host), source);
    let next = Next::handler(|req: Request<Body>| async move {
        responses::not_found(req.uri().path())
    });

    let response = middleware
        .call(request(Method::GET, "/plug/test"), next)
        .await
        .unwrap();

    let outcome = outcomes.recv().await.unwrap();
    assert!(outcome.reclaimed);
    host.shutdown();
    assert_eq!(host.stats().pending_libraries, 0);

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"Message":"yo! Gotchabc!"}"#);
}
