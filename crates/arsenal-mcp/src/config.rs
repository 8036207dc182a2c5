use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use arsenal_backend::PostgrestConfig;
use arsenal_embed::{
    EmbeddingProviderConfig, OpenAiCompatibleConfig, VertexConfig, VertexCredentials,
};
use arsenal_rerank::{CohereRerankConfig, JinaRerankConfig, RerankProviderConfig};

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_SESSION_TTL_MS: u64 = 600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub match_function: String,
    pub match_threshold: f64,
    /// Candidate multiplier, applied only when a reranker is configured.
    pub overfetch_factor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            match_function: "match_arsenal".to_string(),
            match_threshold: 0.5,
            overfetch_factor: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableNames {
    pub arsenal: String,
    pub leads: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            arsenal: "arsenal_vendas".to_string(),
            leads: "leads".to_string(),
        }
    }
}

/// Which tables the generic tools may touch.
#[derive(Debug, Clone)]
pub struct TableAccess {
    /// `None` leaves every table reachable by the service key open.
    pub allowlist: Option<BTreeSet<String>>,
    pub allow_writes: bool,
}

impl Default for TableAccess {
    fn default() -> Self {
        Self {
            allowlist: None,
            allow_writes: true,
        }
    }
}

impl TableAccess {
    pub fn permits(&self, table: &str) -> bool {
        self.allowlist
            .as_ref()
            .is_none_or(|allowed| allowed.contains(table))
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub backend: PostgrestConfig,
    pub embedding: Option<EmbeddingProviderConfig>,
    pub rerank: Option<RerankProviderConfig>,
    pub search: SearchConfig,
    pub tables: TableNames,
    pub access: TableAccess,
    pub maintenance_tools: bool,
    pub session_ttl: Duration,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Values are trimmed
    /// and empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let url = env.get("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let key = env
            .first(&["SUPABASE_SERVICE_KEY", "SUPABASE_SERVICE_ROLE_KEY", "SUPABASE_KEY"])
            .ok_or(ConfigError::Missing("SUPABASE_SERVICE_KEY"))?;
        let timeout = Duration::from_millis(env.parse("UPSTREAM_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?);
        if timeout.is_zero() {
            return Err(invalid("UPSTREAM_TIMEOUT_MS", "must be greater than zero"));
        }

        let mut backend = PostgrestConfig::new(url, key);
        backend.timeout = timeout;

        let transport = match env.get("ARSENAL_BRIDGE_TRANSPORT").as_deref() {
            None | Some("http") => Transport::Http,
            Some("stdio") => Transport::Stdio,
            Some(other) => {
                return Err(invalid(
                    "ARSENAL_BRIDGE_TRANSPORT",
                    format!("expected stdio or http, got {other}"),
                ));
            }
        };

        let match_threshold: f64 = env.parse("SEARCH_MATCH_THRESHOLD", 0.5)?;
        if !(0.0..=1.0).contains(&match_threshold) {
            return Err(invalid("SEARCH_MATCH_THRESHOLD", "must be within 0..=1"));
        }
        let overfetch_factor: usize = env.parse("SEARCH_OVERFETCH_FACTOR", 5)?;
        if !(1..=20).contains(&overfetch_factor) {
            return Err(invalid("SEARCH_OVERFETCH_FACTOR", "must be within 1..=20"));
        }

        let allowlist = env.get("TABLE_ALLOWLIST").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .collect::<BTreeSet<_>>()
        });

        Ok(Self {
            transport,
            host: env.get("ARSENAL_BRIDGE_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("PORT", DEFAULT_PORT)?,
            backend,
            embedding: embedding_config(&env, timeout)?,
            rerank: rerank_config(&env, timeout)?,
            search: SearchConfig {
                match_function: env
                    .get("SEARCH_MATCH_FUNCTION")
                    .unwrap_or_else(|| "match_arsenal".to_string()),
                match_threshold,
                overfetch_factor,
            },
            tables: TableNames {
                arsenal: env
                    .get("ARSENAL_TABLE")
                    .unwrap_or_else(|| "arsenal_vendas".to_string()),
                leads: env.get("LEADS_TABLE").unwrap_or_else(|| "leads".to_string()),
            },
            access: TableAccess {
                allowlist,
                allow_writes: env.flag("ALLOW_GENERIC_WRITES", true)?,
            },
            maintenance_tools: env.flag("ENABLE_MAINTENANCE_TOOLS", false)?,
            session_ttl: Duration::from_millis(
                env.parse("SESSION_TTL_MS", DEFAULT_SESSION_TTL_MS)?,
            ),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn embedding_config<F>(
    env: &Env<F>,
    timeout: Duration,
) -> Result<Option<EmbeddingProviderConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env.get("EMBED_PROVIDER").as_deref() {
        Some("none") => Ok(None),
        None | Some("vertex") => {
            let Some(project) = env.get("GOOGLE_CLOUD_PROJECT") else {
                return Ok(None);
            };
            let credentials = if let Some(token) = env.get("GOOGLE_ACCESS_TOKEN") {
                VertexCredentials::StaticToken(token)
            } else if let Some(json) = env.get("GOOGLE_CREDENTIALS_JSON") {
                VertexCredentials::ServiceAccountJson(json)
            } else if let Some(path) = env.get("GOOGLE_APPLICATION_CREDENTIALS") {
                VertexCredentials::ServiceAccountFile(PathBuf::from(path))
            } else {
                VertexCredentials::GcloudCli
            };

            let mut cfg = VertexConfig::new(project, credentials);
            if let Some(location) = env.get("GOOGLE_CLOUD_LOCATION") {
                cfg.location = location;
            }
            if let Some(model) = env.get("VERTEX_EMBED_MODEL") {
                cfg.model = model;
            }
            cfg.timeout = timeout;
            Ok(Some(EmbeddingProviderConfig::Vertex(cfg)))
        }
        Some("openai-compatible") => {
            let api_key = env.get("EMBED_API_KEY").ok_or(ConfigError::Missing("EMBED_API_KEY"))?;
            let model = env
                .get("EMBED_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string());
            let mut cfg = OpenAiCompatibleConfig::new(api_key, model);
            if let Some(base_url) = env.get("EMBED_BASE_URL") {
                cfg.base_url = base_url;
            }
            cfg.timeout = timeout;
            Ok(Some(EmbeddingProviderConfig::OpenAiCompatible(cfg)))
        }
        Some(other) => Err(invalid(
            "EMBED_PROVIDER",
            format!("expected vertex, openai-compatible or none, got {other}"),
        )),
    }
}

fn rerank_config<F>(
    env: &Env<F>,
    timeout: Duration,
) -> Result<Option<RerankProviderConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let cfg = match env.get("RERANK_PROVIDER").as_deref() {
        Some("none") => return Ok(None),
        None | Some("cohere") => {
            let Some(key) = env.first(&["RERANK_API_KEY", "COHERE_API_KEY"]) else {
                return Ok(None);
            };
            let mut cfg = CohereRerankConfig::new(key);
            if let Some(model) = env.get("RERANK_MODEL") {
                cfg.model = model;
            }
            if let Some(endpoint) = env.get("RERANK_ENDPOINT") {
                cfg.endpoint = endpoint;
            }
            cfg.timeout = timeout;
            RerankProviderConfig::Cohere(cfg)
        }
        Some("jina") => {
            let Some(key) = env.first(&["RERANK_API_KEY", "JINA_API_KEY"]) else {
                return Ok(None);
            };
            let mut cfg = JinaRerankConfig::new(key);
            if let Some(model) = env.get("RERANK_MODEL") {
                cfg.model = model;
            }
            if let Some(endpoint) = env.get("RERANK_ENDPOINT") {
                cfg.endpoint = endpoint;
            }
            cfg.timeout = timeout;
            RerankProviderConfig::Jina(cfg)
        }
        Some(other) => {
            return Err(invalid(
                "RERANK_PROVIDER",
                format!("expected cohere, jina or none, got {other}"),
            ));
        }
    };
    Ok(Some(cfg))
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn first(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.get(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| invalid(name, format!("{raw:?}: {e}"))),
        }
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(invalid(name, format!("expected a boolean, got {other}"))),
        }
    }
}
