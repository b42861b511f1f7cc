//! Simple install/remove/update requests
//!
//! These bypass the migration state machine. A restore point is optional and
//! best-effort: a failed snapshot is logged and the operation continues.

use crate::migration::HostLock;
use crate::system::{PackageRouter, SnapshotGuard};
use crate::types::{ActionResult, PackageRef};
use std::sync::Arc;

pub struct PackageActions {
    packages: PackageRouter,
    snapshots: Arc<SnapshotGuard>,
    lock: HostLock,
}

impl PackageActions {
    pub fn new(packages: PackageRouter, snapshots: Arc<SnapshotGuard>, lock: HostLock) -> Self {
        Self {
            packages,
            snapshots,
            lock,
        }
    }

    pub fn install(&self, pkg: &PackageRef, snapshot: bool) -> ActionResult {
        self.mutate("install", pkg, snapshot, || self.packages.install(pkg))
    }

    pub fn remove(&self, pkg: &PackageRef, snapshot: bool) -> ActionResult {
        self.mutate("remove", pkg, snapshot, || self.packages.remove(pkg))
    }

    fn mutate(
        &self,
        verb: &str,
        pkg: &PackageRef,
        snapshot: bool,
        op: impl FnOnce() -> ActionResult,
    ) -> ActionResult {
        let _host = self.lock.acquire();
        let restore_point = snapshot.then(|| self.restore_point(&format!("{} {}", verb, pkg.id)));
        let result = op();
        if !result.success {
            if let Some(Some(description)) = restore_point {
                tracing::warn!(package = %pkg, %description, "{} failed, snapshot available for manual rollback", verb);
            }
        }
        result
    }

    /// Refresh metadata for both ecosystems
    ///
    /// Both refreshes always run; the first failure is returned.
    pub fn update_cache(&self) -> ActionResult {
        let _host = self.lock.acquire();
        let results: Vec<ActionResult> = self
            .packages
            .backends()
            .iter()
            .map(|backend| {
                let result = backend.refresh();
                if !result.success {
                    tracing::warn!(
                        ecosystem = backend.ecosystem().as_str(),
                        command = %result.command,
                        "metadata refresh failed"
                    );
                }
                result
            })
            .collect();
        results
            .iter()
            .find(|r| !r.success)
            .or_else(|| results.last())
            .cloned()
            .unwrap_or_else(|| ActionResult::synthesized("update", "Nothing to refresh"))
    }

    /// Description of a real restore point, if one was taken
    fn restore_point(&self, comment: &str) -> Option<String> {
        let result = self.snapshots.create(comment);
        if !result.success {
            tracing::warn!(
                error = result.error.as_deref().unwrap_or(""),
                "snapshot failed, continuing without restore point"
            );
            return None;
        }
        result
            .snapshot
            .tool
            .is_real()
            .then_some(result.snapshot.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::backend::fake::FakeBackend;
    use crate::system::exec::testing::ScriptedRunner;
    use crate::system::backend::PackageBackend;
    use crate::types::{Ecosystem, SnapshotTool};

    fn actions(system: Arc<FakeBackend>, snapshots: Arc<ScriptedRunner>) -> PackageActions {
        PackageActions::new(
            PackageRouter::new(system, Arc::new(FakeBackend::new(Ecosystem::Sandboxed))),
            Arc::new(SnapshotGuard::with_tool(snapshots, SnapshotTool::Snapper)),
            HostLock::default(),
        )
    }

    #[test]
    fn test_install_twice_succeeds() {
        let system = Arc::new(FakeBackend::new(Ecosystem::System));
        let actions = actions(system.clone(), Arc::new(ScriptedRunner::new()));
        let pkg = PackageRef::parse("htop");
        assert!(actions.install(&pkg, false).success);
        assert!(actions.install(&pkg, false).success);
        assert!(system.is_installed("htop"));
    }

    #[test]
    fn test_snapshot_flag_controls_restore_point() {
        let snapshots = Arc::new(ScriptedRunner::new().on("snapper create", 0, ""));
        let actions = actions(Arc::new(FakeBackend::new(Ecosystem::System)), snapshots.clone());
        let pkg = PackageRef::parse("htop");

        actions.install(&pkg, false);
        assert!(snapshots.calls().is_empty());

        actions.remove(&pkg, true);
        assert!(snapshots.called("snapper create --description stackctl_remove_htop_"));
    }

    #[test]
    fn test_failed_snapshot_does_not_block_install() {
        let snapshots = Arc::new(ScriptedRunner::new().on("snapper create", 1, "no config"));
        let system = Arc::new(FakeBackend::new(Ecosystem::System));
        let actions = actions(system.clone(), snapshots);
        assert!(actions.install(&PackageRef::parse("htop"), true).success);
        assert_eq!(system.mutations(), 1);
    }

    #[test]
    fn test_update_cache_refreshes_both() {
        let actions = actions(
            Arc::new(FakeBackend::new(Ecosystem::System)),
            Arc::new(ScriptedRunner::new()),
        );
        assert!(actions.update_cache().success);
    }

    #[test]
    fn test_update_cache_reports_failed_refresh() {
        let system = Arc::new(FakeBackend::new(Ecosystem::System).failing_refresh());
        let apps = Arc::new(FakeBackend::new(Ecosystem::Sandboxed));
        let actions = PackageActions::new(
            PackageRouter::new(system.clone(), apps.clone()),
            Arc::new(SnapshotGuard::with_tool(Arc::new(ScriptedRunner::new()), SnapshotTool::None)),
            HostLock::default(),
        );

        let result = actions.update_cache();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(100));
        assert_eq!(system.calls(), vec!["refresh"]);
        assert_eq!(apps.calls(), vec!["refresh"]);
    }
}
