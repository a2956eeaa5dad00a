use serde::Deserialize;

///
/// Configuration for the document store.
///
/// The store addresses named collections through the backend resolved from
/// the store registry; the in-memory backend is the default and needs no
/// further settings.
///
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Whether the document store starts with the service. Defaults to true.
    #[serde(default = "DatabaseConfig::default_enabled")]
    pub enabled: bool,

    /// Backend name resolved through the store registry.
    /// The default `backend` is "memory".
    #[serde(default = "DatabaseConfig::default_backend")]
    pub backend: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            backend: Self::default_backend(),
        }
    }
}

impl DatabaseConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_backend() -> String {
        "memory".into()
    }
}
