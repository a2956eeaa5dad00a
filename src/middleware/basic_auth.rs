//! HTTP Basic authentication middleware.

use {
    super::{Middleware, Next},
    crate::Result,
    crate::server::{RequestContext, Response, basic_auth_challenge},
    crate::utils::Sensitive,
    async_trait::async_trait,
    base64::Engine,
    base64::engine::general_purpose::STANDARD as BASE64,
    std::collections::HashMap,
};

/// Validates `Authorization: Basic` credentials against a static user map.
///
/// Requests without valid credentials receive the challenge response: a 401
/// with `WWW-Authenticate: Basic realm="…"` and a JSON body describing the
/// challenge type. Auth failures are never logged as errors; they are the
/// expected outcome for unauthenticated callers.
pub struct BasicAuthMiddleware {
    realm: String,
    users: HashMap<String, Sensitive<String>>,
    weight: i32,
}

impl BasicAuthMiddleware {
    /// Creates the middleware for a realm and credential map.
    pub fn new(realm: impl Into<String>, users: HashMap<String, Sensitive<String>>) -> Self {
        Self {
            realm: realm.into(),
            users,
            weight: -10,
        }
    }

    /// Overrides the default weight.
    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    fn credentials_from(&self, ctx: &RequestContext) -> Option<(String, String)> {
        let header = ctx.headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = header.strip_prefix("Basic ")?;
        let decoded = BASE64.decode(encoded).ok()?;
        let pair = String::from_utf8(decoded).ok()?;
        let (user, password) = pair.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }

    fn is_authorized(&self, ctx: &RequestContext) -> bool {
        match self.credentials_from(ctx) {
            Some((user, password)) => self
                .users
                .get(&user)
                .is_some_and(|expected| expected.0 == password),
            None => false,
        }
    }
}

#[async_trait]
impl Middleware for BasicAuthMiddleware {
    fn name(&self) -> &str {
        "basic-auth"
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    async fn handle(&self, ctx: RequestContext, next: Next<'_>) -> Result<Response> {
        if self.is_authorized(&ctx) {
            next.run(ctx).await
        } else {
            tracing::debug!(path = %ctx.path, "basic auth challenge issued");
            Ok(basic_auth_challenge(&self.realm))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareManager;
    use crate::router::RoutePolicy;
    use crate::server::{BoxHandler, text_response};
    use http::{HeaderMap, HeaderValue, Method, StatusCode};
    use std::sync::Arc;

    fn auth_manager() -> MiddlewareManager {
        let manager = MiddlewareManager::new();
        let mut users = HashMap::new();
        users.insert("admin".to_string(), Sensitive::from("hunter2"));
        manager
            .register(Arc::new(BasicAuthMiddleware::new("svckit", users)))
            .unwrap();
        manager
    }

    fn ok_handler() -> BoxHandler {
        Arc::new(|_ctx: RequestContext| async move {
            Ok(text_response(StatusCode::OK, "secret"))
        })
    }

    fn auth_header(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode(format!("{user}:{password}"));
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_missing_credentials_get_challenge() {
        let manager = auth_manager();
        let ctx = RequestContext::new(Method::GET, "/admin");
        let response = manager.execute(ctx, &ok_handler()).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(
            response
                .headers()
                .get(http::header::WWW_AUTHENTICATE)
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let manager = auth_manager();
        let ctx = RequestContext::new(Method::GET, "/admin")
            .with_headers(auth_header("admin", "wrong"));
        let response = manager.execute(ctx, &ok_handler()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_credentials_pass_through() {
        let manager = auth_manager();
        let ctx = RequestContext::new(Method::GET, "/admin")
            .with_headers(auth_header("admin", "hunter2"));
        let response = manager.execute(ctx, &ok_handler()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.body()[..], b"secret");
    }

    #[tokio::test]
    async fn test_route_can_disable_auth() {
        let manager = auth_manager();
        let policy = Arc::new(RoutePolicy::without_middlewares(["basic-auth"]));
        let ctx = RequestContext::new(Method::GET, "/public").with_policy(policy);
        let response = manager.execute(ctx, &ok_handler()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
