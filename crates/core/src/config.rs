use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::normalize_identity;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
    /// Document type key to ordered approver identities.
    pub flows: BTreeMap<String, Vec<String>>,
    /// Approver identity (or its local part) to display name.
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowConfig {
    pub max_attempts: u32,
    pub read_backoff_ms: u64,
    pub chain_source: ChainSourceKind,
}

impl WorkflowConfig {
    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Where approver chains are read from at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSourceKind {
    Config,
    Database,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub chain_source: Option<ChainSourceKind>,
    pub max_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://routeslip.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig {
                max_attempts: 3,
                read_backoff_ms: 50,
                chain_source: ChainSourceKind::Config,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            flows: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for ChainSourceKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "config" => Ok(Self::Config),
            "database" | "db" => Ok(Self::Database),
            other => Err(ConfigError::Validation(format!(
                "unsupported chain source `{other}` (expected config|database)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("routeslip.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(max_attempts) = workflow.max_attempts {
                self.workflow.max_attempts = max_attempts;
            }
            if let Some(read_backoff_ms) = workflow.read_backoff_ms {
                self.workflow.read_backoff_ms = read_backoff_ms;
            }
            if let Some(chain_source) = workflow.chain_source {
                self.workflow.chain_source = chain_source;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(flows) = patch.flows {
            self.flows = flows;
        }
        if let Some(labels) = patch.labels {
            self.labels.extend(labels);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ROUTESLIP_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ROUTESLIP_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("ROUTESLIP_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ROUTESLIP_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ROUTESLIP_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ROUTESLIP_WORKFLOW_MAX_ATTEMPTS") {
            self.workflow.max_attempts = parse_u32("ROUTESLIP_WORKFLOW_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("ROUTESLIP_WORKFLOW_READ_BACKOFF_MS") {
            self.workflow.read_backoff_ms =
                parse_u64("ROUTESLIP_WORKFLOW_READ_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("ROUTESLIP_WORKFLOW_CHAIN_SOURCE") {
            self.workflow.chain_source = value.parse()?;
        }

        let log_level =
            read_env("ROUTESLIP_LOGGING_LEVEL").or_else(|| read_env("ROUTESLIP_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ROUTESLIP_LOGGING_FORMAT").or_else(|| read_env("ROUTESLIP_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(chain_source) = overrides.chain_source {
            self.workflow.chain_source = chain_source;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.workflow.max_attempts = max_attempts;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        validate_flows(&self.flows)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("routeslip.toml"), PathBuf::from("config/routeslip.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.max_attempts == 0 || workflow.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "workflow.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if workflow.read_backoff_ms > 10_000 {
        return Err(ConfigError::Validation(
            "workflow.read_backoff_ms must be at most 10000".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_flows(flows: &BTreeMap<String, Vec<String>>) -> Result<(), ConfigError> {
    for (document_type, chain) in flows {
        if document_type.trim().is_empty() {
            return Err(ConfigError::Validation(
                "flows keys must name a document type".to_string(),
            ));
        }

        let members: Vec<String> = chain
            .iter()
            .map(|member| normalize_identity(member))
            .filter(|member| !member.is_empty())
            .collect();
        if members.is_empty() {
            return Err(ConfigError::Validation(format!(
                "flows.\"{document_type}\" must list at least one approver"
            )));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = members.iter().find(|member| !seen.insert(member.as_str())) {
            return Err(ConfigError::Validation(format!(
                "flows.\"{document_type}\" lists approver `{duplicate}` more than once"
            )));
        }
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
    flows: Option<BTreeMap<String, Vec<String>>>,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    max_attempts: Option<u32>,
    read_backoff_ms: Option<u64>,
    chain_source: Option<ChainSourceKind>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ChainSourceKind, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_reads_flows_labels_and_interpolates_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ROUTESLIP_HOD", "DTSHod@dts.com");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("routeslip.toml");
            fs::write(
                &path,
                r#"
[workflow]
max_attempts = 5

[flows]
"Bonafide Certificate" = ["faculty@dts.com", "${TEST_ROUTESLIP_HOD}"]

[labels]
dtshod = "HOD"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.workflow.max_attempts == 5, "max attempts should come from file")?;
            ensure(config.workflow.read_backoff_ms == 50, "backoff should keep its default")?;
            ensure(
                config.flows.get("Bonafide Certificate")
                    == Some(&vec!["faculty@dts.com".to_string(), "DTSHod@dts.com".to_string()]),
                "flow chain should be interpolated from environment",
            )?;
            ensure(
                config.labels.get("dtshod").map(String::as_str) == Some("HOD"),
                "labels should load from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_ROUTESLIP_HOD"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROUTESLIP_LOG_LEVEL", "warn");
        env::set_var("ROUTESLIP_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["ROUTESLIP_LOG_LEVEL", "ROUTESLIP_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROUTESLIP_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("ROUTESLIP_WORKFLOW_CHAIN_SOURCE", "database");
        env::set_var("ROUTESLIP_WORKFLOW_READ_BACKOFF_MS", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("routeslip.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[workflow]
read_backoff_ms = 200

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.workflow.read_backoff_ms == 5,
                "env backoff should win over file and defaults",
            )?;
            ensure(
                config.workflow.chain_source == ChainSourceKind::Database,
                "env chain source should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "ROUTESLIP_DATABASE_URL",
            "ROUTESLIP_WORKFLOW_CHAIN_SOURCE",
            "ROUTESLIP_WORKFLOW_READ_BACKOFF_MS",
        ]);
        result
    }

    #[test]
    fn validation_rejects_duplicate_flow_members() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("routeslip.toml");
        fs::write(
            &path,
            r#"
[flows]
"Library Clearance" = ["librarian@dts.com", " LIBRARIAN@dts.com"]
"#,
        )
        .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message)
                if message.contains("Library Clearance") && message.contains("librarian@dts.com")
        );
        ensure(has_message, "validation failure should name the flow and the duplicate member")
    }

    #[test]
    fn invalid_env_numbers_fail_fast() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROUTESLIP_WORKFLOW_MAX_ATTEMPTS", "many");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "ROUTESLIP_WORKFLOW_MAX_ATTEMPTS"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["ROUTESLIP_WORKFLOW_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(ref path)) if path == &missing),
            "missing required file should be reported with its path",
        )
    }
}
