//! Core data types for stackctl
//!
//! This module defines all shared data structures used throughout the application.

use crate::error::CoreError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifiers with this prefix stay in the system ecosystem even when dotted
pub const SYSTEM_BASE_PREFIX: &str = "debian-base";

/// Package ecosystem (APT/dpkg or Flatpak)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    System,
    Sandboxed,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::System => "system",
            Ecosystem::Sandboxed => "sandboxed",
        }
    }
}

/// A package identifier tagged with the ecosystem that owns it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub ecosystem: Ecosystem,
    pub id: String,
}

impl PackageRef {
    /// Infer the ecosystem from the identifier shape
    ///
    /// Reverse-domain ids (`org.mozilla.firefox`) are Flatpak apps, everything
    /// else (including dotted `debian-base*` names) is a system package.
    pub fn parse(id: &str) -> Self {
        let id = id.trim();
        let ecosystem = if id.contains('.') && !id.starts_with(SYSTEM_BASE_PREFIX) {
            Ecosystem::Sandboxed
        } else {
            Ecosystem::System
        };
        Self {
            ecosystem,
            id: id.to_string(),
        }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self {
            ecosystem: Ecosystem::System,
            id: id.into(),
        }
    }

    pub fn sandboxed(id: impl Into<String>) -> Self {
        Self {
            ecosystem: Ecosystem::Sandboxed,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// What kind of catalog entry a listing row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Profile,
    Stack,
    App,
    Package,
}

/// A system profile (mutually exclusive package bundle)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(flatten)]
    pub package: PackageRef,
    pub name: String,
    pub description: String,
    pub icon: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// A single row from a package listing or search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageSummary {
    #[serde(flatten)]
    pub package: PackageRef,
    pub name: String,
    pub description: String,
    pub version: String,
    pub repo: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub installed: bool,
}

/// Key/value metadata reported by a backend for one package
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackageInfo {
    pub fields: BTreeMap<String, String>,
}

impl PackageInfo {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.get(key).unwrap_or(fallback)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Result of one external command invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub command: String,
}

impl ActionResult {
    /// The command ran to completion with the given status
    pub fn completed(command: impl Into<String>, exit_code: i32, output: String) -> Self {
        Self {
            success: exit_code == 0,
            output,
            exit_code: Some(exit_code),
            error: None,
            command: command.into(),
        }
    }

    /// The command never produced an exit status
    pub fn failed(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            exit_code: None,
            error: Some(error.into()),
            command: command.into(),
        }
    }

    /// The command was killed at its deadline
    pub fn timed_out(&self) -> bool {
        self.exit_code.is_none()
            && self.error.as_deref() == Some(CoreError::Timeout.to_string().as_str())
    }

    /// Successful result that did not run anything
    pub fn synthesized(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: Some(0),
            error: None,
            command: command.into(),
        }
    }
}

/// Snapshot facility present on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTool {
    Timeshift,
    Snapper,
    Btrfs,
    None,
}

impl SnapshotTool {
    /// Probe order, highest priority first
    pub fn candidates() -> &'static [SnapshotTool] {
        &[SnapshotTool::Timeshift, SnapshotTool::Snapper, SnapshotTool::Btrfs]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotTool::Timeshift => "timeshift",
            SnapshotTool::Snapper => "snapper",
            SnapshotTool::Btrfs => "btrfs",
            SnapshotTool::None => "none",
        }
    }

    pub fn is_real(&self) -> bool {
        *self != SnapshotTool::None
    }
}

/// A restore point taken before a risky operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub description: String,
    pub tool: SnapshotTool,
    pub created_at: DateTime<Local>,
}

/// Outcome of `SnapshotGuard::create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub success: bool,
    pub snapshot: Snapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Risk level of a profile switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    High,
    Critical,
}

/// What a profile switch would change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationImpact {
    pub to_remove: Vec<String>,
    pub to_install: Vec<String>,
    pub risk: Risk,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Stage at which a profile switch stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Snapshot,
    Migrate,
    PostHealth,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Snapshot => "snapshot",
            Stage::Migrate => "migrate",
            Stage::PostHealth => "post-health",
        }
    }
}

/// Terminal record of a profile switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub success: bool,
    pub steps: Vec<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(default)]
    pub unguarded: bool,
}

impl MigrationOutcome {
    pub fn completed(steps: Vec<ActionResult>, snapshot: Snapshot) -> Self {
        Self {
            success: true,
            unguarded: !snapshot.tool.is_real(),
            steps,
            stage: None,
            error: None,
            details: None,
            snapshot: Some(snapshot),
        }
    }

    pub fn failed(stage: Stage, steps: Vec<ActionResult>) -> Self {
        Self {
            success: false,
            steps,
            stage: Some(stage),
            error: None,
            details: None,
            snapshot: None,
            unguarded: false,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.unguarded = !snapshot.tool.is_real();
        self.snapshot = Some(snapshot);
        self
    }

    /// Guarantee a non-empty `error` on failure, derived from the stage
    pub fn ensure_error(mut self) -> Self {
        if !self.success && self.error.as_deref().map_or(true, str::is_empty) {
            let stage = self.stage.map_or("unknown", |s| s.as_str());
            self.error = Some(format!("Profile switch failed at stage: {}", stage));
        }
        self
    }
}

/// Verdict of a health check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub errors: Vec<String>,
}

impl HealthReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            healthy: errors.is_empty(),
            errors,
        }
    }
}
