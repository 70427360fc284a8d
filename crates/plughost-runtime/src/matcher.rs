//! Route matching against entry type metadata

use crate::isolation::EntryTypeHandle;
use plughost_plugin_api::RouteSpec;

/// Matches requests against the route an entry type declares
///
/// Method and path both compare case-insensitively and must match exactly.
/// The query string is not part of the path. Entry types without a route
/// never match.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteMatcher;

impl RouteMatcher {
    /// Create a new matcher
    pub fn new() -> Self {
        Self
    }

    /// Route of `entry` if it serves `method` and `path`
    pub fn matches(
        &self,
        entry: &EntryTypeHandle<'_>,
        method: &str,
        path: &str,
    ) -> Option<RouteSpec> {
        entry
            .route()
            .filter(|route| route_matches(route, method, path))
    }
}

/// Whether `route` serves `method` and `path`
pub fn route_matches(route: &RouteSpec, method: &str, path: &str) -> bool {
    eq_ignore_case(&route.method, method) && eq_ignore_case(&route.path, path)
}

/// Unicode-aware case-insensitive comparison
fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
        || a.chars()
            .flat_map(char::to_lowercase)
            .eq(b.chars().flat_map(char::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::IsolationManager;
    use crate::loader::StaticLoader;
    use crate::resolver::PluginDescriptor;
    use plughost_plugin_api::testing::TokioSpawner;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_case_insensitive_exact_match() {
        let route = RouteSpec::new("get", "/plug/test");
        assert!(route_matches(&route, "GET", "/plug/test"));
        assert!(route_matches(&route, "get", "/PLUG/Test"));
    }

    #[test]
    fn test_no_prefix_or_method_mismatch() {
        let route = RouteSpec::new("get", "/plug/test");
        assert!(!route_matches(&route, "POST", "/plug/test"));
        assert!(!route_matches(&route, "GET", "/plug/test/"));
        assert!(!route_matches(&route, "GET", "/plug"));
        assert!(!route_matches(&route, "GET", "/plug/testing"));
    }

    #[test]
    fn test_non_ascii_paths() {
        let route = RouteSpec::owned("GET", "/Straße/ÄRGER");
        assert!(route_matches(&route, "get", "/straße/ärger"));
    }

    #[tokio::test]
    async fn test_matches_loaded_entry() {
        let loader = StaticLoader::new();
        loader.register("/m", test_endpoint::plughost_module_declaration);
        let manager = IsolationManager::new(Arc::new(loader), Arc::new(TokioSpawner));
        let context = manager
            .load(&PluginDescriptor {
                plugin: "plug".to_string(),
                module_path: PathBuf::from("/m"),
                entry_type_name: test_endpoint::AN_ENDPOINT.to_string(),
            })
            .await
            .unwrap();
        let entry = context.entry().unwrap();
        let matcher = RouteMatcher::new();

        assert_eq!(
            matcher.matches(&entry, "GET", "/plug/test"),
            Some(RouteSpec::new("get", "/plug/test"))
        );
        assert_eq!(matcher.matches(&entry, "GET", "/other"), None);
    }
}
