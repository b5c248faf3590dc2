use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 120;
const DEFAULT_OUTBOUND_BUFFER: usize = 32;
const DEFAULT_SESSION_TTL_SECS: u64 = 7200;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub common: core_config::Config,
    pub upstream: UpstreamConfig,
    pub relay: RelaySettings,
    pub store: StoreConfig,
    pub templates: HashMap<String, PromptTemplate>,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Full URL of the streaming messages endpoint.
    pub url: String,
    pub api_key: String,
    pub model: String,
    /// Sent as the `anthropic-version` header.
    pub api_version: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Deadline for one relay, from request receipt to terminal event.
    pub timeout: Duration,
    /// Frames buffered per connection between the relay and the socket writer.
    pub outbound_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_RELAY_TIMEOUT_SECS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// MongoDB for identities and quota, Redis for connection sessions.
    External {
        mongodb_uri: String,
        mongodb_database: String,
        redis_url: String,
        session_ttl_secs: u64,
    },
    /// Process-local stores; state is lost on restart.
    Memory { identities: Vec<SeedIdentity> },
}

/// Credential, identity and starting quota for the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedIdentity {
    pub credential: String,
    pub identity: String,
    pub remaining: i64,
}

/// System and user-message templates for one request type.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    pub system: String,
    pub content: String,
}

impl RelayConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let upstream = UpstreamConfig {
            url: get_env("ANTHROPIC_URL", None, is_prod)?,
            api_key: get_env("ANTHROPIC_KEY", None, is_prod)?,
            model: get_env("ANTHROPIC_MODEL", Some(DEFAULT_MODEL), is_prod)?,
            api_version: get_env("ANTHROPIC_VERSION", Some(DEFAULT_API_VERSION), is_prod)?,
            max_tokens: get_parsed("ANTHROPIC_MAX_TOKENS", DEFAULT_MAX_TOKENS, is_prod)?,
        };

        let relay = RelaySettings {
            timeout: Duration::from_secs(get_parsed(
                "RELAY_TIMEOUT_SECS",
                DEFAULT_RELAY_TIMEOUT_SECS,
                is_prod,
            )?),
            outbound_buffer: get_parsed("RELAY_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER, is_prod)?,
        };

        let backend = get_env("STORE_BACKEND", Some("external"), is_prod)?;
        let store = match backend.as_str() {
            "memory" => StoreConfig::Memory {
                identities: parse_identities(&get_env("MEMORY_IDENTITIES", Some(""), false)?)?,
            },
            "external" => StoreConfig::External {
                mongodb_uri: get_env("MONGODB_URI", None, is_prod)?,
                mongodb_database: get_env("MONGODB_DATABASE", Some("relay_db"), is_prod)?,
                redis_url: get_env("REDIS_URL", None, is_prod)?,
                session_ttl_secs: get_parsed(
                    "SESSION_TTL_SECS",
                    DEFAULT_SESSION_TTL_SECS,
                    is_prod,
                )?,
            },
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORE_BACKEND must be 'external' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let templates_path = get_env("PROMPT_TEMPLATES_PATH", Some("templates"), is_prod)?;
        let templates = load_templates(&templates_path)?;

        Ok(RelayConfig {
            common: common_config,
            upstream,
            relay,
            store,
            templates,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
        })
    }
}

/// Read the request-type → template table. The format follows the file
/// extension (TOML, YAML or JSON).
pub fn load_templates(path: &str) -> Result<HashMap<String, PromptTemplate>, AppError> {
    let source = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()?;

    let templates: HashMap<String, PromptTemplate> = source.try_deserialize()?;
    if templates.is_empty() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "no prompt templates defined in {}",
            path
        )));
    }

    Ok(templates)
}

/// `credential:identity:quota` entries, comma separated.
fn parse_identities(raw: &str) -> Result<Vec<SeedIdentity>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(credential), Some(identity), Some(remaining)) => Ok(SeedIdentity {
                    credential: credential.to_string(),
                    identity: identity.to_string(),
                    remaining: remaining.parse().map_err(|e| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "MEMORY_IDENTITIES entry '{}' has an invalid quota: {}",
                            entry,
                            e
                        ))
                    })?,
                }),
                _ => Err(AppError::ConfigError(anyhow::anyhow!(
                    "MEMORY_IDENTITIES entry '{}' must be credential:identity:quota",
                    entry
                ))),
            }
        })
        .collect()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: T, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr + ToString,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(&default.to_string()), is_prod)?
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn get_env_falls_back_to_default_outside_prod() {
        let value = get_env("RELAY_TEST_UNSET_VARIABLE", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn get_env_requires_value_in_prod() {
        let err = get_env("RELAY_TEST_UNSET_VARIABLE", Some("fallback"), true).unwrap_err();
        assert!(err.to_string().contains("required in production"));
    }

    #[test]
    fn get_parsed_rejects_garbage() {
        std::env::set_var("RELAY_TEST_BAD_NUMBER", "ten");
        let err = get_parsed::<u64>("RELAY_TEST_BAD_NUMBER", 5, false).unwrap_err();
        assert!(err.to_string().contains("RELAY_TEST_BAD_NUMBER"));
    }

    #[test]
    fn memory_identities_parse() {
        let seeds = parse_identities("key-1:u1:3, key-2:u2:0").unwrap();
        assert_eq!(
            seeds,
            vec![
                SeedIdentity {
                    credential: "key-1".to_string(),
                    identity: "u1".to_string(),
                    remaining: 3,
                },
                SeedIdentity {
                    credential: "key-2".to_string(),
                    identity: "u2".to_string(),
                    remaining: 0,
                },
            ]
        );
        assert!(parse_identities("").unwrap().is_empty());
        assert!(parse_identities("key-1:u1").is_err());
        assert!(parse_identities("key-1:u1:lots").is_err());
    }

    #[test]
    fn templates_load_from_toml() {
        let dir = std::env::temp_dir().join(format!("relay-templates-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("templates.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[greeting]\nsystem = \"You are terse.\"\ncontent = \"Hello {{{{ name }}}}\""
        )
        .unwrap();

        let templates = load_templates(path.to_str().unwrap()).unwrap();
        let greeting = &templates["greeting"];
        assert_eq!(greeting.system, "You are terse.");
        assert_eq!(greeting.content, "Hello {{ name }}");
    }
}
