use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    HookUnknownPoint,
    HookUnknownKind,
    HookListenerFailed,
    HookContextStackCorruption,

    JobNotFound,
    JobFailed,
    ServiceNotRunning,
    DeploymentNotReady,
    BackendCommandFailed,

    UpgradeStepFailed,
    UpgradeUnknownRelease,

    PluginInvalidManifest,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::HookUnknownPoint => "hook.unknown_point",
            ErrorCode::HookUnknownKind => "hook.unknown_kind",
            ErrorCode::HookListenerFailed => "hook.listener_failed",
            ErrorCode::HookContextStackCorruption => "hook.context_stack_corruption",

            ErrorCode::JobNotFound => "job.not_found",
            ErrorCode::JobFailed => "job.failed",
            ErrorCode::ServiceNotRunning => "service.not_running",
            ErrorCode::DeploymentNotReady => "deployment.not_ready",
            ErrorCode::BackendCommandFailed => "backend.command_failed",

            ErrorCode::UpgradeStepFailed => "upgrade.step_failed",
            ErrorCode::UpgradeUnknownRelease => "upgrade.unknown_release",

            ErrorCode::PluginInvalidManifest => "plugin.invalid_manifest",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookKindMismatchDetails {
    pub point: String,
    pub declared: String,
    pub requested: String,
}

/// One failed listener inside an aggregated notification error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerFailure {
    pub index: usize,
    pub priority: i32,
    pub code: String,
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCommandDetails {
    pub backend: String,
    pub command: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailedDetails {
    pub backend: String,
    pub job: String,
    pub exit_code: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentNotReadyDetails {
    pub namespace: String,
    pub service: String,
    pub waited_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStepFailedDetails {
    pub from: String,
    pub to: String,
    pub step: String,
    pub current_release: String,
    pub cause: UpgradeCause,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeCause {
    pub code: String,
    pub message: String,
    pub details: Value,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            serde_json::json!({ "args": args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let details = to_details(ConfigMissingKeyDetails {
            key: key.into(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = serde_json::json!({
            "path": path.into(),
            "error": err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn hook_unknown_point(point: impl Into<String>) -> Self {
        let point = point.into();
        Self::new(
            ErrorCode::HookUnknownPoint,
            format!("Hook point '{}' was never declared", point),
            serde_json::json!({ "point": point }),
        )
    }

    pub fn hook_unknown_kind(
        point: impl Into<String>,
        declared: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        let point = point.into();
        let declared = declared.into();
        let requested = requested.into();
        Self::new(
            ErrorCode::HookUnknownKind,
            format!(
                "Hook point '{}' is declared as {}, not {}",
                point, declared, requested
            ),
            to_details(HookKindMismatchDetails {
                point,
                declared,
                requested,
            }),
        )
    }

    pub fn hook_listener_failed(point: impl Into<String>, failures: Vec<ListenerFailure>) -> Self {
        let point = point.into();
        Self::new(
            ErrorCode::HookListenerFailed,
            format!(
                "{} listener(s) failed while notifying '{}'",
                failures.len(),
                point
            ),
            serde_json::json!({
                "point": point,
                "failures": failures,
            }),
        )
    }

    pub fn context_stack_corruption(
        expected: impl Into<String>,
        found: Option<String>,
    ) -> Self {
        let expected = expected.into();
        let message = match &found {
            Some(top) => format!(
                "Cannot exit context '{}': innermost context is '{}'",
                expected, top
            ),
            None => format!("Cannot exit context '{}': no context is entered", expected),
        };
        Self::new(
            ErrorCode::HookContextStackCorruption,
            message,
            serde_json::json!({ "expected": expected, "found": found }),
        )
    }

    pub fn context_not_active(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::HookContextStackCorruption,
            format!("Context '{}' is not entered", name),
            serde_json::json!({ "expected": name, "found": null }),
        )
    }

    pub fn job_not_found(job: impl Into<String>, available: Vec<String>) -> Self {
        let job = job.into();
        Self::new(
            ErrorCode::JobNotFound,
            format!("Job '{}' is not defined", job),
            serde_json::json!({ "id": job, "available": available }),
        )
        .with_hint("Run 'berth <local|dev|k8s> jobs' to see declared jobs")
    }

    pub fn job_failed(backend: impl Into<String>, job: impl Into<String>, exit_code: i32) -> Self {
        let job = job.into();
        Self::new(
            ErrorCode::JobFailed,
            format!("Job '{}' exited with code {}", job, exit_code),
            to_details(JobFailedDetails {
                backend: backend.into(),
                job,
                exit_code,
            }),
        )
    }

    pub fn service_not_running(backend: impl Into<String>, service: impl Into<String>) -> Self {
        let backend = backend.into();
        let service = service.into();
        Self::new(
            ErrorCode::ServiceNotRunning,
            format!("Service '{}' is not running", service),
            serde_json::json!({ "backend": backend, "service": service }),
        )
        .with_hint(format!("Start it first: berth {} start --detach", backend))
    }

    pub fn deployment_not_ready(
        namespace: impl Into<String>,
        service: impl Into<String>,
        waited_seconds: u64,
    ) -> Self {
        let service = service.into();
        let mut err = Self::new(
            ErrorCode::DeploymentNotReady,
            format!(
                "Deployment '{}' was not ready after {}s",
                service, waited_seconds
            ),
            to_details(DeploymentNotReadyDetails {
                namespace: namespace.into(),
                service,
                waited_seconds,
            }),
        );
        err.retryable = Some(true);
        err
    }

    pub fn backend_command_failed(details: BackendCommandDetails) -> Self {
        let message = format!(
            "{} command failed with exit code {}",
            details.backend, details.exit_code
        );
        Self::new(ErrorCode::BackendCommandFailed, message, to_details(details))
    }

    pub fn upgrade_step_failed(details: UpgradeStepFailedDetails) -> Self {
        let message = format!(
            "Upgrade step '{}' failed during {} -> {}: {}",
            details.step, details.from, details.to, details.cause.message
        );
        let resume = details.current_release.clone();
        Self::new(ErrorCode::UpgradeStepFailed, message, to_details(details)).with_hint(
            format!(
                "Fix the cause and re-run the upgrade; it resumes from '{}'",
                resume
            ),
        )
    }

    pub fn upgrade_unknown_release(release: impl Into<String>, known: Vec<String>) -> Self {
        let release = release.into();
        Self::new(
            ErrorCode::UpgradeUnknownRelease,
            format!("Unknown release '{}'", release),
            serde_json::json!({ "id": release, "known": known }),
        )
    }

    pub fn plugin_invalid_manifest(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::PluginInvalidManifest,
            format!("Invalid plugin manifest: {}", problem),
            serde_json::json!({ "path": path.into(), "problem": problem }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": error.into(),
            "context": context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Flatten into the shape used inside aggregate error details.
    pub fn to_cause(&self) -> UpgradeCause {
        UpgradeCause {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_stack_corruption_names_both_contexts() {
        let err = Error::context_stack_corruption("plugins", Some("app".to_string()));
        assert_eq!(err.code.as_str(), "hook.context_stack_corruption");
        assert!(err.message.contains("plugins"));
        assert!(err.message.contains("app"));
    }

    #[test]
    fn deployment_not_ready_is_retryable() {
        let err = Error::deployment_not_ready("openedx", "lms", 600);
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.details["waitedSeconds"], 600);
    }

    #[test]
    fn service_not_running_hints_at_start() {
        let err = Error::service_not_running("local", "lms");
        assert_eq!(err.hints.len(), 1);
        assert!(err.hints[0].message.contains("berth local start"));
    }
}
