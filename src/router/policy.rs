//! Per-route policy consulted by the request pipeline.

use {serde::Deserialize, std::collections::BTreeMap, std::time::Duration};

/// Caching directives for a single route.
///
/// When present and enabled, the pipeline consults the cache engine before
/// invoking the handler and stores successful JSON responses afterwards.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CachePolicy {
    /// Whether responses for this route are cached.
    #[serde(default)]
    pub enabled: bool,

    /// Optional key template. When None, the normalized request path is the
    /// key base; parameters are appended through the metadata map.
    #[serde(default)]
    pub key_template: Option<String>,

    /// Entry TTL. Zero or absent falls back to the engine default.
    #[serde(default, with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Dependency keys composed into the cache key; invalidating any of
    /// them removes the cached responses of this route.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// The per-route configuration consulted by the pipeline.
///
/// A route inherits its group's policy; per-route `middlewares` are
/// concatenated onto the group's and per-route `disabled_middlewares` take
/// precedence over any allow-list entry.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RoutePolicy {
    /// Response caching directives.
    #[serde(default)]
    pub cache: Option<CachePolicy>,

    /// Allow-list of middleware names. Empty means the full global chain.
    #[serde(default)]
    pub middlewares: Vec<String>,

    /// Deny-list of middleware names, applied after the allow-list.
    #[serde(default)]
    pub disabled_middlewares: Vec<String>,

    /// Per-request deadline. Overrides the server-wide default.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// OpenAPI metadata, carried opaquely for documentation tooling.
    #[serde(default)]
    pub doc: BTreeMap<String, serde_json::Value>,
}

impl RoutePolicy {
    /// Returns a policy with caching enabled for the given dependencies.
    pub fn cached(ttl: Duration, dependencies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cache: Some(CachePolicy {
                enabled: true,
                key_template: None,
                ttl: Some(ttl),
                dependencies: dependencies.into_iter().map(Into::into).collect(),
            }),
            ..Self::default()
        }
    }

    /// Returns a policy that disables the named middlewares.
    pub fn without_middlewares(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            disabled_middlewares: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Merges this policy on top of a group default.
    ///
    /// Middleware additions concatenate (group first), disables concatenate,
    /// and scalar fields on the route win over the group's.
    pub fn merged_onto(self, group: &RoutePolicy) -> RoutePolicy {
        let mut middlewares = group.middlewares.clone();
        for name in self.middlewares {
            if !middlewares.contains(&name) {
                middlewares.push(name);
            }
        }

        let mut disabled = group.disabled_middlewares.clone();
        for name in self.disabled_middlewares {
            if !disabled.contains(&name) {
                disabled.push(name);
            }
        }

        RoutePolicy {
            cache: self.cache.or_else(|| group.cache.clone()),
            middlewares,
            disabled_middlewares: disabled,
            timeout: self.timeout.or(group.timeout),
            doc: if self.doc.is_empty() {
                group.doc.clone()
            } else {
                self.doc
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_empty() {
        let policy = RoutePolicy::default();
        assert!(policy.cache.is_none());
        assert!(policy.middlewares.is_empty());
        assert!(policy.disabled_middlewares.is_empty());
        assert!(policy.timeout.is_none());
    }

    #[test]
    fn test_cached_constructor() {
        let policy = RoutePolicy::cached(Duration::from_secs(60), ["users"]);
        let cache = policy.cache.unwrap();
        assert!(cache.enabled);
        assert_eq!(cache.ttl, Some(Duration::from_secs(60)));
        assert_eq!(cache.dependencies, vec!["users".to_string()]);
    }

    #[test]
    fn test_merged_onto_concatenates_middlewares() {
        let group = RoutePolicy {
            middlewares: vec!["auth".into(), "log".into()],
            ..Default::default()
        };
        let route = RoutePolicy {
            middlewares: vec!["metrics".into(), "log".into()],
            ..Default::default()
        };
        let merged = route.merged_onto(&group);
        assert_eq!(merged.middlewares, vec!["auth", "log", "metrics"]);
    }

    #[test]
    fn test_merged_onto_disables_take_precedence() {
        let group = RoutePolicy {
            middlewares: vec!["auth".into()],
            ..Default::default()
        };
        let route = RoutePolicy::without_middlewares(["auth"]);
        let merged = route.merged_onto(&group);
        assert_eq!(merged.middlewares, vec!["auth"]);
        assert_eq!(merged.disabled_middlewares, vec!["auth"]);
    }

    #[test]
    fn test_merged_onto_scalar_fields() {
        let group = RoutePolicy::default().with_timeout(Duration::from_secs(5));
        let route = RoutePolicy::default();
        assert_eq!(
            route.merged_onto(&group).timeout,
            Some(Duration::from_secs(5))
        );

        let route = RoutePolicy::default().with_timeout(Duration::from_secs(1));
        assert_eq!(
            route.merged_onto(&group).timeout,
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_policy_parses_from_toml() {
        let policy: RoutePolicy = toml::from_str(
            r#"
timeout = "2s"
disabled_middlewares = ["auth"]

[cache]
enabled = true
ttl = "10m"
dependencies = ["orders", "customers"]
"#,
        )
        .unwrap();
        assert_eq!(policy.timeout, Some(Duration::from_secs(2)));
        assert_eq!(policy.disabled_middlewares, vec!["auth"]);
        let cache = policy.cache.unwrap();
        assert!(cache.enabled);
        assert_eq!(cache.dependencies.len(), 2);
    }
}
