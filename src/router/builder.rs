//! Fluent route registration: pending routes, groups and compilation.

use {
    super::{DynamicRoute, Pattern, RouteInfo, Router, RoutePolicy, static_key},
    crate::server::BoxHandler,
    http::Method,
    std::collections::HashMap,
    std::sync::Arc,
};

struct PendingRoute {
    method: Method,
    pattern: String,
    handler: BoxHandler,
    policy: RoutePolicy,
}

/// Accumulates route registrations until `Service::start()` compiles them.
///
/// Registration is infallible by design: pattern errors surface during
/// compilation, where each failing route is logged and skipped so one bad
/// registration never takes down its siblings.
///
/// ```rust
/// use svckit::{RouterBuilder, RoutePolicy};
/// use svckit::server::{RequestContext, text_response};
/// use http::{Method, StatusCode};
/// use std::sync::Arc;
///
/// let router = RouterBuilder::new()
///     .route(Method::GET, "/ping", Arc::new(|_ctx: RequestContext| async move {
///         Ok(text_response(StatusCode::OK, "pong"))
///     }))
///     .group("/api/v1", RoutePolicy::without_middlewares(["auth"]))
///     .route(Method::GET, "/status", Arc::new(|_ctx: RequestContext| async move {
///         Ok(text_response(StatusCode::OK, "up"))
///     }))
///     .done()
///     .compile();
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct RouterBuilder {
    pending: Vec<PendingRoute>,
}

impl RouterBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route with the default (empty) policy.
    #[must_use]
    pub fn route(self, method: Method, pattern: &str, handler: BoxHandler) -> Self {
        self.route_with_policy(method, pattern, handler, RoutePolicy::default())
    }

    /// Registers a route with an explicit policy.
    #[must_use]
    pub fn route_with_policy(
        mut self,
        method: Method,
        pattern: &str,
        handler: BoxHandler,
        policy: RoutePolicy,
    ) -> Self {
        self.pending.push(PendingRoute {
            method,
            pattern: pattern.to_string(),
            handler,
            policy,
        });
        self
    }

    /// Opens a route group with a shared path prefix and default policy.
    #[must_use]
    pub fn group(self, prefix: &str, policy: RoutePolicy) -> GroupBuilder {
        GroupBuilder {
            parent: self,
            prefix: prefix.trim_end_matches('/').to_string(),
            policy,
        }
    }

    /// Returns the number of pending registrations.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Compiles every pending registration into an immutable [`Router`].
    ///
    /// Called once from `Service::start()`. Routes whose pattern fails to
    /// parse are logged and skipped; a later registration of the same
    /// static key silently replaces the earlier one, matching the usual
    /// map-insert semantics.
    pub fn compile(self) -> Router {
        let mut static_routes: HashMap<String, Arc<RouteInfo>> = HashMap::new();
        let mut dynamic_routes: HashMap<Method, Vec<DynamicRoute>> = HashMap::new();

        for pending in self.pending {
            let pattern = match Pattern::parse(&pending.pattern) {
                Ok(pattern) => pattern,
                Err(err) => {
                    tracing::error!(
                        method = %pending.method,
                        pattern = %pending.pattern,
                        error = %err,
                        "skipping route with invalid pattern"
                    );
                    continue;
                }
            };

            let info = Arc::new(RouteInfo {
                method: pending.method.clone(),
                pattern: pattern.raw().to_string(),
                param_names: pattern.param_names().to_vec(),
                handler: pending.handler,
                policy: Arc::new(pending.policy),
            });

            if pattern.is_dynamic() {
                dynamic_routes
                    .entry(pending.method)
                    .or_default()
                    .push(DynamicRoute { pattern, info });
            } else {
                static_routes.insert(static_key(&info.method, pattern.raw()), info);
            }
        }

        let router = Router::new(static_routes, dynamic_routes);
        tracing::info!(routes = router.len(), "router compiled");
        router
    }
}

/// A route group accumulating a prefix and a default policy.
///
/// Routes registered through the group inherit the group policy; per-route
/// additions are concatenated and per-route disables take precedence (see
/// [`RoutePolicy::merged_onto`]).
pub struct GroupBuilder {
    parent: RouterBuilder,
    prefix: String,
    policy: RoutePolicy,
}

impl GroupBuilder {
    /// Registers a route under the group prefix with the group policy.
    #[must_use]
    pub fn route(self, method: Method, pattern: &str, handler: BoxHandler) -> Self {
        self.route_with_policy(method, pattern, handler, RoutePolicy::default())
    }

    /// Registers a route under the group prefix, merging the given policy
    /// onto the group default.
    #[must_use]
    pub fn route_with_policy(
        mut self,
        method: Method,
        pattern: &str,
        handler: BoxHandler,
        policy: RoutePolicy,
    ) -> Self {
        let full_pattern = format!("{}/{}", self.prefix, pattern.trim_start_matches('/'));
        let merged = policy.merged_onto(&self.policy);
        self.parent = self
            .parent
            .route_with_policy(method, &full_pattern, handler, merged);
        self
    }

    /// Closes the group, returning the underlying builder.
    #[must_use]
    pub fn done(self) -> RouterBuilder {
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{RequestContext, Response, text_response};
    use http::StatusCode;
    use std::time::Duration;

    fn ok_handler() -> BoxHandler {
        Arc::new(|_ctx: RequestContext| async move {
            Ok::<Response, crate::Error>(text_response(StatusCode::OK, "ok"))
        })
    }

    #[test]
    fn test_invalid_pattern_is_skipped_not_fatal() {
        let router = RouterBuilder::new()
            .route(Method::GET, "/good", ok_handler())
            .route(Method::GET, "/bad/{}", ok_handler())
            .route(Method::GET, "/also-good", ok_handler())
            .compile();
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn test_group_prefixes_patterns() {
        let router = RouterBuilder::new()
            .group("/api/v1", RoutePolicy::default())
            .route(Method::GET, "/users/{id}", ok_handler())
            .route(Method::GET, "status", ok_handler())
            .done()
            .compile();

        assert!(router.find_by_pattern("/api/v1/users/{id}").is_some());
        assert!(router.find_by_pattern("/api/v1/status").is_some());
    }

    #[test]
    fn test_group_policy_inherited_and_merged() {
        let group_policy = RoutePolicy {
            middlewares: vec!["auth".into()],
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let route_policy = RoutePolicy {
            middlewares: vec!["metrics".into()],
            disabled_middlewares: vec!["auth".into()],
            ..Default::default()
        };

        let router = RouterBuilder::new()
            .group("/admin", group_policy)
            .route_with_policy(Method::POST, "/reload", ok_handler(), route_policy)
            .done()
            .compile();

        let route = router.find_by_pattern("/admin/reload").unwrap();
        assert_eq!(route.policy.middlewares, vec!["auth", "metrics"]);
        assert_eq!(route.policy.disabled_middlewares, vec!["auth"]);
        assert_eq!(route.policy.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_later_static_registration_replaces_earlier() {
        let router = RouterBuilder::new()
            .route(Method::GET, "/dup", ok_handler())
            .route(Method::GET, "/dup", ok_handler())
            .compile();
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_pending_len() {
        let builder = RouterBuilder::new()
            .route(Method::GET, "/a", ok_handler())
            .route(Method::GET, "/b", ok_handler());
        assert_eq!(builder.pending_len(), 2);
    }
}
