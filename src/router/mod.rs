//! Two-stage HTTP router: lazy registration followed by one-shot compilation.
//!
//! Routes are collected into a [`RouterBuilder`] while the service is being
//! assembled; nothing is matched until `Service::start()` calls
//! [`RouterBuilder::compile`], which parses every dynamic pattern once and
//! produces an immutable [`Router`]. The compiled form gives O(1) static
//! lookups on `METHOD:path` keys and a registration-ordered linear scan of
//! same-method dynamic routes.
//!
//! # Matching contract
//!
//! 1. The request path is normalized (trailing slash stripped except root,
//!    doubled slashes collapsed).
//! 2. An exact static hit wins immediately.
//! 3. Dynamic routes with the same method are tried in registration order;
//!    a route matches when segment counts are equal and every literal
//!    segment is equal. The first match wins.
//! 4. An unmatched `OPTIONS` request is answered with an empty 200 for CORS
//!    pre-flight compatibility; anything else is a 404.

mod builder;
mod pattern;
mod policy;

pub use builder::{GroupBuilder, RouterBuilder};
pub use pattern::{Pattern, Segment, normalize_path, split_segments};
pub use policy::{CachePolicy, RoutePolicy};

use {
    crate::server::BoxHandler,
    http::Method,
    std::collections::HashMap,
    std::sync::Arc,
};

/// A compiled route: handler, policy and the parsed pattern metadata.
pub struct RouteInfo {
    /// The HTTP method the route was registered for.
    pub method: Method,
    /// The normalized pattern text, e.g. `/users/{id}`.
    pub pattern: String,
    /// Parameter names in positional order; empty for static routes.
    pub param_names: Vec<String>,
    /// The terminal request handler.
    pub handler: BoxHandler,
    /// The per-route policy consulted by the pipeline.
    pub policy: Arc<RoutePolicy>,
}

impl std::fmt::Debug for RouteInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteInfo")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("param_names", &self.param_names)
            .finish()
    }
}

/// Outcome of a router lookup.
pub enum RouteMatch {
    /// A route matched; `params` holds the captured path parameters.
    Found {
        route: Arc<RouteInfo>,
        params: HashMap<String, String>,
    },
    /// No route matched an `OPTIONS` request; answer with an empty 200.
    PreflightOk,
    /// No route matched; answer with a 404.
    NotFound,
}

pub(crate) struct DynamicRoute {
    pub(crate) pattern: Pattern,
    pub(crate) info: Arc<RouteInfo>,
}

/// The compiled, immutable route matcher.
///
/// Built once by [`RouterBuilder::compile`]; the static map is read without
/// any lock on the hot path because the structure never changes after
/// compilation.
pub struct Router {
    static_routes: HashMap<String, Arc<RouteInfo>>,
    dynamic_routes: HashMap<Method, Vec<DynamicRoute>>,
    route_count: usize,
}

impl Router {
    pub(crate) fn new(
        static_routes: HashMap<String, Arc<RouteInfo>>,
        dynamic_routes: HashMap<Method, Vec<DynamicRoute>>,
    ) -> Self {
        let route_count = static_routes.len()
            + dynamic_routes.values().map(Vec::len).sum::<usize>();
        Self {
            static_routes,
            dynamic_routes,
            route_count,
        }
    }

    /// Returns the total number of compiled routes.
    pub fn len(&self) -> usize {
        self.route_count
    }

    /// Returns `true` when no routes were compiled.
    pub fn is_empty(&self) -> bool {
        self.route_count == 0
    }

    /// Looks up the route for `(method, path)` per the matching contract.
    pub fn matches(&self, method: &Method, path: &str) -> RouteMatch {
        let normalized = normalize_path(path);

        if let Some(route) = self.static_routes.get(&static_key(method, &normalized)) {
            return RouteMatch::Found {
                route: Arc::clone(route),
                params: HashMap::new(),
            };
        }

        if let Some(candidates) = self.dynamic_routes.get(method) {
            let segments = split_segments(&normalized);
            for candidate in candidates {
                if let Some(captures) = candidate.pattern.match_segments(&segments) {
                    let params = candidate
                        .info
                        .param_names
                        .iter()
                        .cloned()
                        .zip(captures)
                        .collect();
                    return RouteMatch::Found {
                        route: Arc::clone(&candidate.info),
                        params,
                    };
                }
            }
        }

        if method == Method::OPTIONS {
            return RouteMatch::PreflightOk;
        }

        RouteMatch::NotFound
    }

    /// Iterates over every compiled route, static first.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<RouteInfo>> {
        self.static_routes
            .values()
            .chain(self.dynamic_routes.values().flatten().map(|d| &d.info))
    }

    /// Finds a route by its normalized pattern, used by the CLI dispatch
    /// surface to address handlers by name.
    pub fn find_by_pattern(&self, pattern: &str) -> Option<Arc<RouteInfo>> {
        let normalized = normalize_path(pattern);
        self.routes()
            .find(|route| route.pattern == normalized)
            .cloned()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("static", &self.static_routes.len())
            .field(
                "dynamic",
                &self.dynamic_routes.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

pub(crate) fn static_key(method: &Method, normalized_path: &str) -> String {
    format!("{method}:{normalized_path}")
}
