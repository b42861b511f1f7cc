//! Profile catalog
//!
//! A small fixed set of mutually exclusive profiles plus bundles discovered
//! by package-name prefix. Install state is queried on every call and never
//! cached.

use crate::system::PackageRouter;
use crate::types::{Ecosystem, EntryKind, PackageRef, PackageSummary, Profile};

/// Fixed profile enumeration, in active-profile tie-break order
const PROFILES: &[ProfileDef] = &[
    ProfileDef {
        id: "ctxos-desktop",
        name: "Desktop Environment",
        description: "A full-featured desktop environment with productivity tools.",
        icon: "desktop-symbolic",
    },
    ProfileDef {
        id: "ctxos-server",
        name: "Server Base",
        description: "Minimal server environment with core networking and security tools.",
        icon: "server-symbolic",
    },
    ProfileDef {
        id: "ctxos-dev",
        name: "Development Stack",
        description: "Compilers, debuggers, and essential development libraries.",
        icon: "builder-symbolic",
    },
];

struct ProfileDef {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    icon: &'static str,
}

/// Broad role of a profile, used for migration risk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileClass {
    Desktop,
    Server,
    Other,
}

impl ProfileClass {
    pub fn of(id: &str) -> Self {
        if id.contains("desktop") {
            ProfileClass::Desktop
        } else if id.contains("server") {
            ProfileClass::Server
        } else {
            ProfileClass::Other
        }
    }
}

/// The active profile: first installed entry in catalog order
pub fn active(profiles: &[Profile]) -> Option<&Profile> {
    profiles.iter().find(|p| p.installed)
}

pub struct ProfileCatalog {
    packages: PackageRouter,
    bundle_prefix: String,
}

impl ProfileCatalog {
    pub fn new(packages: PackageRouter, bundle_prefix: impl Into<String>) -> Self {
        Self {
            packages,
            bundle_prefix: bundle_prefix.into(),
        }
    }

    /// Whether `id` names one of the fixed profiles
    pub fn is_profile(id: &str) -> bool {
        PROFILES.iter().any(|p| p.id == id)
    }

    /// All fixed profiles with live install state
    pub fn list_profiles(&self) -> Vec<Profile> {
        PROFILES.iter().map(|def| self.refresh(def)).collect()
    }

    fn refresh(&self, def: &ProfileDef) -> Profile {
        let package = PackageRef::system(def.id);
        let installed = self.packages.is_installed(&package);
        let info = self.packages.info(&package);

        let mut profile = Profile {
            package,
            name: def.name.to_string(),
            description: def.description.to_string(),
            icon: def.icon.to_string(),
            kind: EntryKind::Profile,
            installed,
            version: None,
            size: None,
        };

        if let Some(info) = info {
            profile.version = Some(info.get_or("Version", "N/A").to_string());
            profile.size = Some(info.get_or("Installed-Size", "N/A").to_string());
            if profile.description.is_empty() {
                if let Some(desc) = info.get("Description") {
                    profile.description = desc.to_string();
                }
            }
        }

        profile
    }

    /// Bundle packages following the naming convention, minus fixed profiles
    pub fn discover_bundles(&self) -> Vec<PackageSummary> {
        let system = self.packages.backend(Ecosystem::System);
        system
            .list(Some(&self.bundle_prefix))
            .into_iter()
            .map(|row| row.package.id)
            .filter(|id| id.starts_with(&self.bundle_prefix) && !Self::is_profile(id))
            .filter_map(|id| {
                let info = system.info(&id)?;
                let fallback = title_case(id.trim_start_matches(self.bundle_prefix.as_str()));
                Some(PackageSummary {
                    name: info.get("Name").map(String::from).unwrap_or(fallback),
                    description: info.get_or("Description", "").to_string(),
                    version: info.get_or("Version", "").to_string(),
                    repo: info.get_or("Origin", "ctxos").to_string(),
                    kind: EntryKind::Stack,
                    installed: system.is_installed(&id),
                    package: PackageRef::system(id),
                })
            })
            .collect()
    }
}

/// "tools-net" -> "Tools-Net"
fn title_case(s: &str) -> String {
    s.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
