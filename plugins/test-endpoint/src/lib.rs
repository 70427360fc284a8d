//! # Test Endpoint Module
//!
//! Sample plughost module. `AnEndpoint` serves `GET /plug/test` and answers
//! with a small JSON document.
//!
//! Build with `cargo build -p test-endpoint` and point a route at
//! `target/debug/{dll_prefix}test_endpoint{dll_suffix}` with entry type
//! `test_endpoint::AnEndpoint`.

use plughost_plugin_api::prelude::*;
use serde::Serialize;

/// Fully qualified entry type name of [`AnEndpoint`]
pub const AN_ENDPOINT: &str = "test_endpoint::AnEndpoint";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Greeting<'a> {
    message: &'a str,
}

/// Endpoint answering `GET /plug/test`
#[derive(Debug, Default)]
pub struct AnEndpoint;

#[async_trait]
impl Endpoint for AnEndpoint {
    async fn execute(&self, ctx: &mut EndpointContext) -> Result<(), PluginError> {
        ctx.response().write_json(&Greeting {
            message: "yo! Gotchabc!",
        })
    }
}

impl EndpointType for AnEndpoint {
    const ROUTE: Option<RouteSpec> = Some(RouteSpec::new("get", "/plug/test"));
}

plughost_plugin_api::export_module! {
    AN_ENDPOINT => AnEndpoint,
}
