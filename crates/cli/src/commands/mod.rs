pub mod act;
pub mod config;
pub mod flows;
pub mod inbox;
pub mod migrate;
pub mod status;
pub mod submit;

use std::future::Future;

use serde::Serialize;
use serde_json::Value;

use routeslip_core::config::{AppConfig, LoadOptions};
use routeslip_core::errors::{ApprovalError, InterfaceError};

use crate::runtime::Session;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn success_with<T: Serialize>(
        command: &str,
        message: impl Into<String>,
        data: &T,
    ) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 6);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: Some(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Exit codes: 7 for caller mistakes, 8 for transient store trouble,
    /// 9 for workflow setup problems.
    pub fn rejected(command: &str, error: ApprovalError) -> Self {
        let exit_code = match InterfaceError::from(error.clone()) {
            InterfaceError::BadRequest { .. } => 7,
            InterfaceError::ServiceUnavailable { .. } => 8,
            InterfaceError::Internal { .. } => 9,
        };
        Self::failure(command, error.error_class(), error.to_string(), exit_code)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(
    command: &str,
    options: &LoadOptions,
) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options.clone()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Completed workflow operation: a one-line summary plus the payload data.
pub(crate) struct Completed<T> {
    pub message: String,
    pub data: T,
}

impl<T> Completed<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self { message: message.into(), data }
    }
}

/// Loads config, opens a session against the configured store, and runs
/// `operation` to completion on a current-thread runtime.
pub(crate) fn execute<T, F, Fut>(
    command: &str,
    options: &LoadOptions,
    operation: F,
) -> CommandResult
where
    T: Serialize,
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<Completed<T>, ApprovalError>>,
{
    let config = match load_config(command, options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let session = match Session::open(config).await {
            Ok(session) => session,
            Err(error) => {
                return CommandResult::failure(
                    command,
                    error.error_class(),
                    error.to_string(),
                    error.exit_code(),
                );
            }
        };
        let pool = session.pool.clone();
        let result = operation(session).await;
        pool.close().await;

        match result {
            Ok(completed) => {
                CommandResult::success_with(command, completed.message, &completed.data)
            }
            Err(error) => CommandResult::rejected(command, error),
        }
    })
}
