//! APT/dpkg backend (system packages)
//!
//! Parses Debian control-file output from `apt-cache show` and the plain
//! listings of `apt-cache pkgnames`, `apt-cache search` and `apt list`.

use super::backend::PackageBackend;
use super::exec::{CommandRunner, CommandSpec};
use crate::types::{ActionResult, Ecosystem, EntryKind, PackageInfo, PackageRef, PackageSummary};
use std::sync::Arc;

pub struct AptBackend {
    runner: Arc<dyn CommandRunner>,
}

impl AptBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run a query, returning its output only on success
    fn query(&self, spec: CommandSpec) -> Option<String> {
        let result = self.runner.run(&spec);
        if result.success {
            Some(result.output)
        } else {
            tracing::debug!(
                command = %result.command,
                error = result.error.as_deref().unwrap_or(""),
                "apt query failed"
            );
            None
        }
    }
}

impl PackageBackend for AptBackend {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::System
    }

    fn info(&self, id: &str) -> Option<PackageInfo> {
        let output = self.query(CommandSpec::new("apt-cache").args(["show", id]))?;
        let info = parse_control_block(&output);
        (!info.is_empty()).then_some(info)
    }

    fn is_installed(&self, id: &str) -> bool {
        let spec = CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", id]);
        // dpkg-query exits 1 for unknown packages; the status text decides
        let result = self.runner.run(&spec);
        result.output.contains("install ok installed")
    }

    fn list(&self, filter: Option<&str>) -> Vec<PackageSummary> {
        let mut spec = CommandSpec::new("apt-cache").arg("pkgnames");
        if let Some(prefix) = filter {
            spec = spec.arg(prefix);
        }
        self.query(spec)
            .map(|out| {
                out.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|name| summary(name, ""))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn search(&self, query: &str) -> Vec<PackageSummary> {
        self.query(CommandSpec::new("apt-cache").args(["search", "--names-only", query]))
            .map(|out| parse_search(&out))
            .unwrap_or_default()
    }

    fn install(&self, id: &str) -> ActionResult {
        self.runner.run(
            &CommandSpec::new("apt-get")
                .args(["install", "-y", id])
                .mutation(),
        )
    }

    fn remove(&self, id: &str) -> ActionResult {
        self.runner.run(
            &CommandSpec::new("apt-get")
                .args(["remove", "-y", id])
                .mutation(),
        )
    }

    fn updates(&self) -> Vec<String> {
        self.query(CommandSpec::new("apt").args(["list", "--upgradable"]))
            .map(|out| parse_upgradable(&out))
            .unwrap_or_default()
    }

    fn refresh(&self) -> ActionResult {
        self.runner
            .run(&CommandSpec::new("apt-get").arg("update").mutation())
    }
}

fn summary(name: &str, description: &str) -> PackageSummary {
    PackageSummary {
        package: PackageRef::system(name),
        name: name.to_string(),
        description: description.to_string(),
        version: String::new(),
        repo: String::new(),
        kind: EntryKind::Package,
        installed: false,
    }
}

/// Parse the first stanza of Debian control-file output
///
/// Continuation lines (leading space) are appended to the previous field.
pub fn parse_control_block(output: &str) -> PackageInfo {
    let mut info = PackageInfo::default();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            // apt-cache show prints one stanza per available version
            if !info.is_empty() {
                break;
            }
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(key) = &current {
                if let Some(value) = info.fields.get_mut(key) {
                    value.push('\n');
                    value.push_str(line.trim());
                }
            }
        } else if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            info.fields.insert(key.clone(), value.trim().to_string());
            current = Some(key);
        }
    }

    info
}

/// Parse `apt-cache search` output ("name - description")
fn parse_search(output: &str) -> Vec<PackageSummary> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (name, desc) = line.split_once(" - ").unwrap_or((line, ""));
            Some(summary(name.trim(), desc.trim()))
        })
        .collect()
}

/// Parse `apt list --upgradable`, skipping the "Listing..." banner
fn parse_upgradable(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| !l.starts_with("Listing"))
        .filter_map(|l| l.split_once('/').map(|(name, _)| name.trim().to_string()))
        .filter(|name| !name.is_empty())
        .collect()
}
