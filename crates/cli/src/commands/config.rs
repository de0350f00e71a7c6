use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use routeslip_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str], overridden: bool| {
        field_source(
            key_path,
            env_keys,
            overridden,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        )
    };
    let overrides = &options.overrides;

    let mut lines = vec![
        "effective config (source precedence: flag > env > file > default):".to_string()
    ];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", &["ROUTESLIP_DATABASE_URL"], overrides.database_url.is_some()),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", &["ROUTESLIP_DATABASE_MAX_CONNECTIONS"], false),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", &["ROUTESLIP_DATABASE_TIMEOUT_SECS"], false),
    ));

    lines.push(render_line(
        "workflow.max_attempts",
        &config.workflow.max_attempts.to_string(),
        source(
            "workflow.max_attempts",
            &["ROUTESLIP_WORKFLOW_MAX_ATTEMPTS"],
            overrides.max_attempts.is_some(),
        ),
    ));
    lines.push(render_line(
        "workflow.read_backoff_ms",
        &config.workflow.read_backoff_ms.to_string(),
        source("workflow.read_backoff_ms", &["ROUTESLIP_WORKFLOW_READ_BACKOFF_MS"], false),
    ));
    lines.push(render_line(
        "workflow.chain_source",
        &format!("{:?}", config.workflow.chain_source),
        source(
            "workflow.chain_source",
            &["ROUTESLIP_WORKFLOW_CHAIN_SOURCE"],
            overrides.chain_source.is_some(),
        ),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source(
            "logging.level",
            &["ROUTESLIP_LOGGING_LEVEL", "ROUTESLIP_LOG_LEVEL"],
            overrides.log_level.is_some(),
        ),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source(
            "logging.format",
            &["ROUTESLIP_LOGGING_FORMAT", "ROUTESLIP_LOG_FORMAT"],
            overrides.log_format.is_some(),
        ),
    ));

    for (document_type, chain) in &config.flows {
        lines.push(render_line(
            &format!("flows.{document_type}"),
            &chain.join(" -> "),
            source("flows", &[], false),
        ));
    }
    for (approver, label) in &config.labels {
        lines.push(render_line(&format!("labels.{approver}"), label, source("labels", &[], false)));
    }

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("routeslip.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/routeslip.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    overridden: bool,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if overridden {
        return "flag".to_string();
    }

    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_file_document() {
        let doc: Value = "[workflow]\nmax_attempts = 4\n".parse().expect("toml");

        assert!(contains_path(&doc, "workflow.max_attempts"));
        assert!(!contains_path(&doc, "workflow.read_backoff_ms"));
    }

    #[test]
    fn flag_overrides_win_attribution() {
        let doc: Value = "[database]\nurl = \"sqlite://a.db\"\n".parse().expect("toml");

        assert_eq!(field_source("database.url", &[], true, Some(&doc), None), "flag");
        assert_eq!(
            field_source("database.url", &[], false, Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(field_source("database.timeout_secs", &[], false, Some(&doc), None), "default");
    }
}
