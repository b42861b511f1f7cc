//! Flatpak backend (sandboxed apps)
//!
//! Flatpak prints tab-separated columns for `list` and `search`, and
//! `key: value` lines for `info`. Rows with missing trailing columns are kept
//! with empty values.

use super::backend::PackageBackend;
use super::exec::{CommandRunner, CommandSpec};
use crate::types::{ActionResult, Ecosystem, EntryKind, PackageInfo, PackageRef, PackageSummary};
use std::collections::HashSet;
use std::sync::Arc;

pub struct FlatpakBackend {
    runner: Arc<dyn CommandRunner>,
    remote: String,
    available: bool,
}

impl FlatpakBackend {
    /// Probe for the flatpak binary once
    pub fn new(runner: Arc<dyn CommandRunner>, remote: impl Into<String>) -> Self {
        let available = runner.run(&CommandSpec::new("flatpak").arg("--version")).success;
        if !available {
            tracing::warn!("flatpak not found, sandboxed apps disabled");
        }
        Self {
            runner,
            remote: remote.into(),
            available,
        }
    }

    fn query(&self, spec: CommandSpec) -> Option<String> {
        if !self.available {
            return None;
        }
        let result = self.runner.run(&spec);
        result.success.then_some(result.output)
    }

    fn installed_ids(&self) -> HashSet<String> {
        self.list(None).into_iter().map(|p| p.package.id).collect()
    }
}

impl PackageBackend for FlatpakBackend {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Sandboxed
    }

    fn info(&self, id: &str) -> Option<PackageInfo> {
        let output = self.query(CommandSpec::new("flatpak").args(["info", id]))?;
        let mut info = parse_info(&output);
        info.fields.insert("id".into(), id.to_string());
        Some(info)
    }

    fn is_installed(&self, id: &str) -> bool {
        self.query(CommandSpec::new("flatpak").args(["info", id]))
            .is_some()
    }

    fn list(&self, filter: Option<&str>) -> Vec<PackageSummary> {
        let spec = CommandSpec::new("flatpak").args([
            "list",
            "--app",
            "--columns=application,name,version,origin",
        ]);
        let mut apps = self
            .query(spec)
            .map(|out| parse_list(&out))
            .unwrap_or_default();
        if let Some(filter) = filter {
            let filter = filter.to_lowercase();
            apps.retain(|a| a.package.id.to_lowercase().contains(&filter));
        }
        apps
    }

    fn search(&self, query: &str) -> Vec<PackageSummary> {
        let spec = CommandSpec::new("flatpak").args([
            "search",
            "--columns=application,name,description,version,remotes",
            query,
        ]);
        let Some(output) = self.query(spec) else {
            return Vec::new();
        };
        let installed = self.installed_ids();
        let mut apps = parse_search(&output);
        for app in &mut apps {
            app.installed = installed.contains(&app.package.id);
        }
        apps
    }

    fn install(&self, id: &str) -> ActionResult {
        self.runner.run(
            &CommandSpec::new("flatpak")
                .args(["install", "-y", self.remote.as_str(), id])
                .mutation(),
        )
    }

    fn remove(&self, id: &str) -> ActionResult {
        self.runner.run(
            &CommandSpec::new("flatpak")
                .args(["uninstall", "-y", id])
                .mutation(),
        )
    }

    fn updates(&self) -> Vec<String> {
        if !self.available {
            return Vec::new();
        }
        let refreshed = self.refresh();
        if !refreshed.success {
            tracing::debug!("flatpak appstream refresh failed, counting cached updates");
        }
        self.query(CommandSpec::new("flatpak").args(["remote-ls", "--updates", "--columns=application"]))
            .map(|out| {
                out.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn refresh(&self) -> ActionResult {
        if !self.available {
            return ActionResult::synthesized(
                "flatpak update --appstream",
                "flatpak not installed, nothing to refresh",
            );
        }
        self.runner.run(
            &CommandSpec::new("flatpak")
                .args(["update", "--appstream"])
                .mutation(),
        )
    }
}

/// Column `idx` of a tab-separated row, empty when missing
fn column<'a>(parts: &[&'a str], idx: usize) -> &'a str {
    parts.get(idx).map_or("", |s| s.trim())
}

/// Tab-separated rows with at least an id and one more column
///
/// Untabbed lines are banners such as "No matches found".
fn parse_rows(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .map(|line| line.split('\t').collect::<Vec<_>>())
        .filter(|parts| parts.len() >= 2 && !column(parts, 0).is_empty())
}

/// Parse `flatpak list --columns=application,name,version,origin`
fn parse_list(output: &str) -> Vec<PackageSummary> {
    parse_rows(output)
        .map(|parts| PackageSummary {
            package: PackageRef::sandboxed(column(&parts, 0)),
            name: column(&parts, 1).to_string(),
            description: String::new(),
            version: column(&parts, 2).to_string(),
            repo: column(&parts, 3).to_string(),
            kind: EntryKind::App,
            installed: true,
        })
        .collect()
}

/// Parse `flatpak search --columns=application,name,description,version,remotes`
fn parse_search(output: &str) -> Vec<PackageSummary> {
    parse_rows(output)
        .map(|parts| PackageSummary {
            package: PackageRef::sandboxed(column(&parts, 0)),
            name: column(&parts, 1).to_string(),
            description: column(&parts, 2).to_string(),
            version: column(&parts, 3).to_string(),
            repo: column(&parts, 4).to_string(),
            kind: EntryKind::App,
            installed: false,
        })
        .collect()
}

/// Parse `flatpak info` key/value lines
fn parse_info(output: &str) -> PackageInfo {
    let mut info = PackageInfo::default();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                info.fields.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    info
}
