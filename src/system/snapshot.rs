//! Snapshot facility detection and restore points
//!
//! Detects:
//! - Timeshift
//! - Snapper
//! - Plain btrfs subvolume snapshots
//!
//! The first facility that answers a trivial invocation wins. Without any,
//! snapshots are synthesized and marked `tool: none`; callers decide whether
//! that is acceptable.

use super::exec::{CommandRunner, CommandSpec};
use crate::error::CoreError;
use crate::types::{ActionResult, Snapshot, SnapshotResult, SnapshotTool};
use chrono::Local;
use std::sync::Arc;

/// Directory btrfs snapshots are written to
const BTRFS_SNAPSHOT_DIR: &str = "/.snapshots";

pub struct SnapshotGuard {
    runner: Arc<dyn CommandRunner>,
    tool: SnapshotTool,
}

impl SnapshotGuard {
    /// Probe candidate facilities in priority order
    pub fn detect(runner: Arc<dyn CommandRunner>) -> Self {
        let tool = SnapshotTool::candidates()
            .iter()
            .copied()
            .find(|tool| runner.run(&probe_command(*tool)).success)
            .unwrap_or(SnapshotTool::None);

        if tool.is_real() {
            tracing::info!(tool = tool.as_str(), "snapshot facility detected");
        } else {
            tracing::warn!("no snapshot facility detected, migrations are unguarded");
        }

        Self { runner, tool }
    }

    pub fn with_tool(runner: Arc<dyn CommandRunner>, tool: SnapshotTool) -> Self {
        Self { runner, tool }
    }

    pub fn tool(&self) -> SnapshotTool {
        self.tool
    }

    /// Take a restore point labelled with `comment`
    pub fn create(&self, comment: &str) -> SnapshotResult {
        let created_at = Local::now();
        let snapshot = Snapshot {
            description: describe(comment, &created_at),
            tool: self.tool,
            created_at,
        };

        let Some(spec) = create_command(self.tool, &snapshot.description) else {
            tracing::warn!(description = %snapshot.description, "no snapshot facility, skipping restore point");
            return SnapshotResult {
                success: true,
                snapshot: Snapshot {
                    description: format!("unguarded-{}", created_at.format("%Y%m%d%H%M%S")),
                    ..snapshot
                },
                error: None,
            };
        };

        let result = self.runner.run(&spec);
        if result.success {
            tracing::info!(tool = self.tool.as_str(), description = %snapshot.description, "snapshot created");
            SnapshotResult {
                success: true,
                snapshot,
                error: None,
            }
        } else {
            let error = failure_message(&spec, &result);
            tracing::error!(tool = self.tool.as_str(), %error, "snapshot failed");
            SnapshotResult {
                success: false,
                snapshot,
                error: Some(error),
            }
        }
    }

    /// Roll the system back to snapshot `id`
    ///
    /// Without a facility this reports success without doing anything.
    pub fn restore(&self, id: &str) -> ActionResult {
        let spec = match self.tool {
            SnapshotTool::Timeshift => CommandSpec::new("timeshift")
                .args(["--restore", "--snapshot", id, "--scripted", "--yes"])
                .mutation(),
            SnapshotTool::Snapper => CommandSpec::new("snapper").args(["rollback", id]).mutation(),
            SnapshotTool::Btrfs => {
                return ActionResult::failed(
                    format!("btrfs restore {}", id),
                    "btrfs snapshots must be restored manually from the bootloader or a rescue system",
                );
            }
            SnapshotTool::None => {
                tracing::warn!(%id, "no snapshot facility, restore is a no-op");
                return ActionResult::synthesized(
                    format!("restore {}", id),
                    "No snapshot facility available; nothing was restored",
                );
            }
        };
        self.runner.run(&spec)
    }

    /// Facility-native listing is not supported
    pub fn list(&self) -> Vec<Snapshot> {
        Vec::new()
    }
}

fn probe_command(tool: SnapshotTool) -> CommandSpec {
    let spec = CommandSpec::new(tool.as_str());
    match tool {
        SnapshotTool::Btrfs => spec.arg("version"),
        _ => spec.arg("--version"),
    }
}

fn create_command(tool: SnapshotTool, description: &str) -> Option<CommandSpec> {
    let spec = match tool {
        SnapshotTool::Timeshift => CommandSpec::new("timeshift").args([
            "--create",
            "--comments",
            description,
            "--tags",
            "O",
        ]),
        SnapshotTool::Snapper => {
            CommandSpec::new("snapper").args(["create", "--description", description])
        }
        SnapshotTool::Btrfs => CommandSpec::new("btrfs").args([
            "subvolume".to_string(),
            "snapshot".to_string(),
            "/".to_string(),
            format!("{}/{}", BTRFS_SNAPSHOT_DIR, description),
        ]),
        SnapshotTool::None => return None,
    };
    Some(spec.mutation())
}

/// Timestamped, path-safe snapshot description
fn describe(comment: &str, at: &chrono::DateTime<Local>) -> String {
    let comment: String = comment
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("stackctl_{}_{}", comment, at.format("%Y-%m-%d_%H-%M-%S"))
}

fn failure_message(spec: &CommandSpec, result: &ActionResult) -> String {
    if let Some(err) = &result.error {
        return err.clone();
    }
    let output = result.output.trim();
    if output.is_empty() {
        CoreError::CommandFailed {
            program: spec.program.clone(),
            code: result.exit_code.unwrap_or(-1),
        }
        .to_string()
    } else {
        output.to_string()
    }
}
