use portdeck_domain::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// CLI-facing result of one engine operation: a coarse status driving the
/// exit code, a human-readable message, the typed failure kind when an
/// engine error caused it, and free-form details for JSON consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            error_kind: None,
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            error_kind: None,
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            error_kind: None,
            details,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

impl CommandStatus {
    /// Process exit code: 0 success, 1 for the user's mistake, 2 for the
    /// engine's.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}

/// Machine-matchable discriminant of an [`EngineError`], mirrored into JSON
/// output so drivers never parse message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    SourceUnreachable,
    CatalogMalformed,
    PortNotFound,
    RuntimeUnavailable,
    DownloadFailed,
    ChecksumMismatch,
    ExtractFailed,
    Filesystem,
}

impl From<&EngineError> for ErrorKind {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::SourceUnreachable { .. } => ErrorKind::SourceUnreachable,
            EngineError::CatalogMalformed { .. } => ErrorKind::CatalogMalformed,
            EngineError::PortNotFound(_) => ErrorKind::PortNotFound,
            EngineError::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            EngineError::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            EngineError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            EngineError::ExtractFailed { .. } => ErrorKind::ExtractFailed,
            EngineError::Filesystem(_) => ErrorKind::Filesystem,
        }
    }
}

/// Maps an engine failure onto a user-visible outcome. Asking for something
/// that does not exist is the user's mistake; everything else is the
/// engine's.
#[must_use]
pub fn outcome_from_error(err: &anyhow::Error) -> ExecutionOutcome {
    let message = format!("{err:#}");
    let Some(engine_err) = err.downcast_ref::<EngineError>() else {
        return ExecutionOutcome::failure(message, Value::Null);
    };
    let status = if matches!(engine_err, EngineError::PortNotFound(_)) {
        CommandStatus::UserError
    } else {
        CommandStatus::Failure
    };
    ExecutionOutcome {
        status,
        message,
        error_kind: Some(ErrorKind::from(engine_err)),
        details: Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_not_found_is_a_user_error() {
        let err = anyhow::Error::new(EngineError::PortNotFound("demo.zip".into()));
        let outcome = outcome_from_error(&err);
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.error_kind, Some(ErrorKind::PortNotFound));
        assert_eq!(outcome.status.exit_code(), 1);
    }

    #[test]
    fn engine_failures_keep_their_kind() {
        let err = anyhow::Error::new(EngineError::RuntimeUnavailable("godot".into()));
        let outcome = outcome_from_error(&err);
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.error_kind, Some(ErrorKind::RuntimeUnavailable));
        assert_eq!(outcome.status.exit_code(), 2);
    }

    #[test]
    fn serialized_form_uses_kebab_case() {
        let err = anyhow::Error::new(EngineError::ChecksumMismatch {
            name: "demo.zip".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        });
        let json = serde_json::to_value(outcome_from_error(&err)).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error_kind"], "checksum-mismatch");
    }

    #[test]
    fn success_carries_no_error_kind() {
        let json = serde_json::to_value(ExecutionOutcome::success("done", Value::Null)).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("error_kind").is_none());
    }
}
