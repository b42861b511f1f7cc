//! GPU detection for hardware-specific stack suggestions

use super::exec::{CommandRunner, CommandSpec};
use crate::types::{EntryKind, PackageRef, PackageSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Intel,
    Amd,
}

/// Detect GPU vendors from `lspci`
pub fn detect_gpus(runner: &dyn CommandRunner) -> Vec<GpuVendor> {
    let result = runner.run(&CommandSpec::new("lspci"));
    if !result.success {
        tracing::debug!("lspci unavailable, no hardware suggestions");
        return Vec::new();
    }
    parse_lspci(&result.output)
}

fn parse_lspci(output: &str) -> Vec<GpuVendor> {
    let mut vendors = Vec::new();
    for line in output.lines().map(str::to_lowercase) {
        let is_display = ["vga", "3d controller", "display controller"]
            .iter()
            .any(|class| line.contains(class));
        if !is_display {
            continue;
        }
        let vendor = if line.contains("nvidia") {
            GpuVendor::Nvidia
        } else if line.contains("intel") {
            GpuVendor::Intel
        } else if line.contains("advanced micro devices") || line.contains("amd/ati") {
            GpuVendor::Amd
        } else {
            continue;
        };
        if !vendors.contains(&vendor) {
            vendors.push(vendor);
        }
    }
    vendors
}

/// Driver stacks worth suggesting for the detected GPUs
pub fn suggested_stacks(vendors: &[GpuVendor]) -> Vec<PackageSummary> {
    vendors
        .iter()
        .filter_map(|vendor| {
            let (id, name, description) = match vendor {
                GpuVendor::Nvidia => (
                    "driver-nvidia",
                    "NVIDIA Proprietary Drivers",
                    "Optimized drivers for your NVIDIA GPU.",
                ),
                GpuVendor::Intel => (
                    "driver-intel",
                    "Intel Media SDK",
                    "Hardware acceleration for Intel graphics.",
                ),
                GpuVendor::Amd => return None,
            };
            Some(PackageSummary {
                package: PackageRef::system(id),
                name: name.to_string(),
                description: description.to_string(),
                version: String::new(),
                repo: String::new(),
                kind: EntryKind::Stack,
                installed: false,
            })
        })
        .collect()
}
