//! Error taxonomy for stackctl
//!
//! Nothing below the request boundary returns these as `Err`. Command and
//! backend failures are folded into `ActionResult::error`, migration failures
//! into a stage-tagged `MigrationOutcome`. The `Display` strings here are
//! what ends up in those `error` fields.

use std::io;

/// Errors surfaced by the core
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// External tool missing or not executable
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Tool ran but exited non-zero
    #[error("{program} exited with code {code}")]
    CommandFailed { program: String, code: i32 },

    /// Tool exceeded the configured deadline
    #[error("timeout")]
    Timeout,

    /// Snapshot creation failed on a real facility
    #[error("Failed to create system restore point: {0}")]
    SnapshotFailed(String),

    /// No snapshot facility and the caller did not acknowledge
    #[error("No snapshot facility available; pass allow_unguarded to switch without a restore point")]
    Unguarded,

    /// Post-migration verification failed
    #[error("System became unhealthy after migration.")]
    HealthCheckFailed(Vec<String>),

    /// Unrecognized request action
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Request lacked a required parameter
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// Request could not be decoded
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_bare() {
        assert_eq!(CoreError::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_launch_message_names_program() {
        let err = CoreError::Launch {
            program: "flatpak".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        let msg = err.to_string();
        assert!(msg.contains("flatpak"));
        assert!(msg.contains("No such file"));
    }

    #[test]
    fn test_command_failed_message() {
        let err = CoreError::CommandFailed {
            program: "snapper".into(),
            code: 1,
        };
        assert_eq!(err.to_string(), "snapper exited with code 1");
    }
}
