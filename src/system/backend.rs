//! Package backend contract and ecosystem routing

use crate::types::{ActionResult, Ecosystem, PackageInfo, PackageRef, PackageSummary};
use std::sync::Arc;

/// Capabilities shared by both package ecosystems
///
/// Queries degrade to empty answers when the underlying tool is unavailable.
/// Mutations return the command result verbatim.
pub trait PackageBackend: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    fn info(&self, id: &str) -> Option<PackageInfo>;

    fn is_installed(&self, id: &str) -> bool;

    fn list(&self, filter: Option<&str>) -> Vec<PackageSummary>;

    fn search(&self, query: &str) -> Vec<PackageSummary>;

    fn install(&self, id: &str) -> ActionResult;

    fn remove(&self, id: &str) -> ActionResult;

    /// Identifiers with pending upgrades
    fn updates(&self) -> Vec<String>;

    /// Refresh package metadata
    fn refresh(&self) -> ActionResult;
}

/// Dispatches `PackageRef`s to the backend owning their ecosystem
#[derive(Clone)]
pub struct PackageRouter {
    system: Arc<dyn PackageBackend>,
    sandboxed: Arc<dyn PackageBackend>,
}

impl PackageRouter {
    pub fn new(system: Arc<dyn PackageBackend>, sandboxed: Arc<dyn PackageBackend>) -> Self {
        Self { system, sandboxed }
    }

    pub fn backend(&self, ecosystem: Ecosystem) -> &dyn PackageBackend {
        match ecosystem {
            Ecosystem::System => self.system.as_ref(),
            Ecosystem::Sandboxed => self.sandboxed.as_ref(),
        }
    }

    pub fn backends(&self) -> [&dyn PackageBackend; 2] {
        [self.system.as_ref(), self.sandboxed.as_ref()]
    }

    pub fn info(&self, pkg: &PackageRef) -> Option<PackageInfo> {
        self.backend(pkg.ecosystem).info(&pkg.id)
    }

    pub fn is_installed(&self, pkg: &PackageRef) -> bool {
        self.backend(pkg.ecosystem).is_installed(&pkg.id)
    }

    pub fn install(&self, pkg: &PackageRef) -> ActionResult {
        tracing::info!(package = %pkg, ecosystem = pkg.ecosystem.as_str(), "installing");
        self.backend(pkg.ecosystem).install(&pkg.id)
    }

    pub fn remove(&self, pkg: &PackageRef) -> ActionResult {
        tracing::info!(package = %pkg, ecosystem = pkg.ecosystem.as_str(), "removing");
        self.backend(pkg.ecosystem).remove(&pkg.id)
    }

    /// Search both ecosystems, system packages first
    pub fn search(&self, query: &str) -> Vec<PackageSummary> {
        self.backends()
            .iter()
            .flat_map(|b| b.search(query))
            .collect()
    }

    /// Total pending upgrades across both ecosystems
    pub fn pending_updates(&self) -> usize {
        self.backends().iter().map(|b| b.updates().len()).sum()
    }
}
