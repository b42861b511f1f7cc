//! Profile migration
//!
//! Switching profiles runs strictly in order:
//! 1. Restore point (abort before touching packages if it fails)
//! 2. Remove the active profile, if it differs from the target
//! 3. Install the target
//! 4. Health check
//!
//! Failures are reported as a stage-tagged `MigrationOutcome`. The engine
//! never rolls back on its own; the snapshot is attached so the caller can.

use crate::error::CoreError;
use crate::profiles::{active, ProfileCatalog, ProfileClass};
use crate::system::{HealthVerifier, PackageRouter, SnapshotGuard};
use crate::types::{ActionResult, MigrationImpact, MigrationOutcome, PackageRef, Risk, Stage};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Single-flight lock over host package state
///
/// Clones share the same lock. Held for the whole of a switch and for every
/// simple mutation, released when the guard drops.
#[derive(Debug, Clone, Default)]
pub struct HostLock(Arc<Mutex<()>>);

impl HostLock {
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        if let Some(guard) = self.0.try_lock() {
            return guard;
        }
        tracing::info!("another package operation is running, waiting");
        self.0.lock()
    }
}

/// One package mutation in a switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Remove(PackageRef),
    Install(PackageRef),
}

/// Caller acknowledgements for a switch
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchOptions {
    /// Proceed even when no snapshot facility exists
    pub allow_unguarded: bool,
}

pub struct MigrationEngine {
    catalog: Arc<ProfileCatalog>,
    packages: PackageRouter,
    snapshots: Arc<SnapshotGuard>,
    health: Arc<HealthVerifier>,
    lock: HostLock,
}

impl MigrationEngine {
    pub fn new(
        catalog: Arc<ProfileCatalog>,
        packages: PackageRouter,
        snapshots: Arc<SnapshotGuard>,
        health: Arc<HealthVerifier>,
        lock: HostLock,
    ) -> Self {
        Self {
            catalog,
            packages,
            snapshots,
            health,
            lock,
        }
    }

    /// What switching to `target_id` would change; queries only
    pub fn impact(&self, target_id: &str) -> MigrationImpact {
        let profiles = self.catalog.list_profiles();
        let current = active(&profiles);
        let (risk, message) = classify(current.map(|p| p.package.id.as_str()), target_id);

        MigrationImpact {
            to_remove: current.map(|p| p.name.clone()).into_iter().collect(),
            to_install: vec![target_id.to_string()],
            risk,
            message: message.map(String::from),
        }
    }

    /// Switch the host to the profile `target_id`
    pub fn switch(&self, target_id: &str, options: SwitchOptions) -> MigrationOutcome {
        let _host = self.lock.acquire();
        let target = PackageRef::parse(target_id);

        let profiles = self.catalog.list_profiles();
        let current = active(&profiles).map(|p| p.package.clone());
        tracing::info!(
            target = %target,
            current = current.as_ref().map_or("none", |p| p.id.as_str()),
            "switching profile"
        );

        enter(Stage::Snapshot);
        let tool = self.snapshots.tool();
        if !tool.is_real() {
            if !options.allow_unguarded {
                tracing::error!("refusing unguarded switch without acknowledgement");
                return MigrationOutcome::failed(Stage::Snapshot, Vec::new())
                    .with_error(CoreError::Unguarded.to_string());
            }
            tracing::warn!("switching without a restore point (acknowledged)");
        }

        let snapshot = self.snapshots.create(&format!("Switching to {}", target.id));
        if !snapshot.success && tool.is_real() {
            let err = CoreError::SnapshotFailed(snapshot.error.unwrap_or_default());
            tracing::error!(error = %err, "aborting switch");
            return MigrationOutcome::failed(Stage::Snapshot, Vec::new()).with_error(err.to_string());
        }
        let snapshot = snapshot.snapshot;

        enter(Stage::Migrate);
        let steps: Vec<ActionResult> = plan(current.as_ref(), &target)
            .iter()
            .map(|op| self.execute(op))
            .collect();

        if !steps.iter().all(|s| s.success) {
            tracing::error!(
                failed = steps.iter().filter(|s| !s.success).count(),
                "migration steps failed"
            );
            return MigrationOutcome::failed(Stage::Migrate, steps).with_snapshot(snapshot);
        }

        enter(Stage::PostHealth);
        let report = self.health.check();
        if !report.healthy {
            let err = CoreError::HealthCheckFailed(report.errors.clone());
            tracing::error!(error = %err, details = ?report.errors, "system unhealthy after migration");
            return MigrationOutcome::failed(Stage::PostHealth, steps)
                .with_details(report.errors)
                .with_error(err.to_string())
                .with_snapshot(snapshot);
        }

        tracing::info!(target = %target, "profile switch completed");
        MigrationOutcome::completed(steps, snapshot)
    }

    fn execute(&self, op: &Operation) -> ActionResult {
        // Every step runs even if an earlier one failed
        match op {
            Operation::Remove(pkg) => self.packages.remove(pkg),
            Operation::Install(pkg) => self.packages.install(pkg),
        }
    }
}

fn enter(stage: Stage) {
    tracing::info!(stage = stage.as_str(), "migration stage");
}

/// Operations needed to move from `current` to `target`
pub fn plan(current: Option<&PackageRef>, target: &PackageRef) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(2);
    if let Some(current) = current {
        if current.id != target.id {
            ops.push(Operation::Remove(current.clone()));
        }
    }
    ops.push(Operation::Install(target.clone()));
    ops
}

/// Risk of moving between profile classes
fn classify(current: Option<&str>, target: &str) -> (Risk, Option<&'static str>) {
    let Some(current) = current else {
        return (Risk::Low, None);
    };
    match (ProfileClass::of(current), ProfileClass::of(target)) {
        (ProfileClass::Server, ProfileClass::Desktop) => (
            Risk::High,
            Some("Migrating from Server to Desktop. This will install a GUI stack."),
        ),
        (ProfileClass::Desktop, ProfileClass::Server) => (
            Risk::Critical,
            Some("Migrating from Desktop to Server. This will remove the GUI stack."),
        ),
        _ => (Risk::Low, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::backend::fake::FakeBackend;
    use crate::system::exec::testing::ScriptedRunner;
    use crate::types::{Ecosystem, SnapshotTool};
    use std::thread;
    use std::time::Duration;

    struct Harness {
        system: Arc<FakeBackend>,
        snapshot_runner: Arc<ScriptedRunner>,
        engine: MigrationEngine,
    }

    fn healthy() -> ScriptedRunner {
        ScriptedRunner::new()
            .on("systemctl is-active", 0, "active")
            .on("ping", 0, "")
    }

    fn harness(system: FakeBackend, snapshots: ScriptedRunner, tool: SnapshotTool, health: ScriptedRunner) -> Harness {
        let system = Arc::new(system);
        let router = PackageRouter::new(system.clone(), Arc::new(FakeBackend::new(Ecosystem::Sandboxed)));
        let snapshot_runner = Arc::new(snapshots);
        let engine = MigrationEngine::new(
            Arc::new(ProfileCatalog::new(router.clone(), "ctxos-")),
            router,
            Arc::new(SnapshotGuard::with_tool(snapshot_runner.clone(), tool)),
            Arc::new(HealthVerifier::new(
                Arc::new(health),
                vec!["dbus".into(), "polkit".into(), "networking".into()],
                "deb.debian.org",
            )),
            HostLock::default(),
        );
        Harness {
            system,
            snapshot_runner,
            engine,
        }
    }

    fn guarded(installed: &[&str]) -> Harness {
        harness(
            FakeBackend::new(Ecosystem::System).with_installed(installed),
            ScriptedRunner::new().on("timeshift --create", 0, ""),
            SnapshotTool::Timeshift,
            healthy(),
        )
    }

    #[test]
    fn test_plan_sequences() {
        let server = PackageRef::system("ctxos-server");
        let desktop = PackageRef::system("ctxos-desktop");
        assert_eq!(
            plan(Some(&server), &desktop),
            vec![Operation::Remove(server.clone()), Operation::Install(desktop.clone())]
        );
        assert_eq!(plan(None, &desktop), vec![Operation::Install(desktop.clone())]);
        assert_eq!(plan(Some(&desktop), &desktop), vec![Operation::Install(desktop)]);
    }

    #[test]
    fn test_impact_for_every_pair() {
        let ids = ["ctxos-desktop", "ctxos-server", "ctxos-dev"];
        let names = ["Desktop Environment", "Server Base", "Development Stack"];
        for (a, name) in ids.iter().zip(names) {
            for b in ids.iter().filter(|b| *b != a) {
                let h = guarded(&[*a]);
                let impact = h.engine.impact(b);
                assert_eq!(impact.to_remove, vec![name.to_string()]);
                assert_eq!(impact.to_install, vec![b.to_string()]);
            }
        }

        let impact = guarded(&[]).engine.impact("ctxos-dev");
        assert!(impact.to_remove.is_empty());
        assert_eq!(impact.risk, Risk::Low);
    }

    #[test]
    fn test_risk_classification() {
        assert_eq!(guarded(&["ctxos-server"]).engine.impact("ctxos-desktop").risk, Risk::High);
        let critical = guarded(&["ctxos-desktop"]).engine.impact("ctxos-server");
        assert_eq!(critical.risk, Risk::Critical);
        assert!(critical.message.unwrap().contains("remove the GUI stack"));
        assert_eq!(guarded(&["ctxos-dev"]).engine.impact("ctxos-desktop").risk, Risk::Low);
        assert_eq!(guarded(&["ctxos-desktop"]).engine.impact("ctxos-dev").risk, Risk::Low);
    }

    #[test]
    fn test_impact_has_no_side_effects() {
        let h = guarded(&["ctxos-server"]);
        h.engine.impact("ctxos-desktop");
        assert_eq!(h.system.mutations(), 0);
        assert!(h.snapshot_runner.calls().is_empty());
    }

    #[test]
    fn test_server_to_desktop_end_to_end() {
        let h = guarded(&["ctxos-server"]);
        let outcome = h.engine.switch("ctxos-desktop", SwitchOptions::default());

        assert!(outcome.success);
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.stage.is_none());
        assert!(!outcome.unguarded);
        let calls: Vec<_> = h
            .system
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("install ") || c.starts_with("remove "))
            .collect();
        assert_eq!(calls, vec!["remove ctxos-server", "install ctxos-desktop"]);
    }

    #[test]
    fn test_no_active_profile_installs_only() {
        let h = guarded(&[]);
        let outcome = h.engine.switch("ctxos-dev", SwitchOptions::default());
        assert!(outcome.success);
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(h.system.mutations(), 1);
        assert!(h.system.calls().contains(&"install ctxos-dev".to_string()));
    }

    #[test]
    fn test_snapshot_failure_aborts_before_packages() {
        let h = harness(
            FakeBackend::new(Ecosystem::System).with_installed(&["ctxos-server"]),
            ScriptedRunner::new().on("snapper create", 1, "snapper: quota exceeded"),
            SnapshotTool::Snapper,
            healthy(),
        );
        let outcome = h.engine.switch("ctxos-desktop", SwitchOptions::default());

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(Stage::Snapshot));
        assert!(outcome.error.unwrap().contains("quota exceeded"));
        assert_eq!(h.system.mutations(), 0);
    }

    #[test]
    fn test_unguarded_requires_acknowledgement() {
        let h = harness(
            FakeBackend::new(Ecosystem::System),
            ScriptedRunner::new(),
            SnapshotTool::None,
            healthy(),
        );
        let refused = h.engine.switch("ctxos-dev", SwitchOptions::default());
        assert!(!refused.success);
        assert_eq!(refused.stage, Some(Stage::Snapshot));
        assert_eq!(h.system.mutations(), 0);

        let allowed = h.engine.switch("ctxos-dev", SwitchOptions { allow_unguarded: true });
        assert!(allowed.success);
        assert!(allowed.unguarded);
        assert_eq!(h.system.mutations(), 1);
    }

    #[test]
    fn test_failed_step_still_runs_the_rest() {
        let h = harness(
            FakeBackend::new(Ecosystem::System)
                .with_installed(&["ctxos-server"])
                .failing("ctxos-server"),
            ScriptedRunner::new().on("timeshift --create", 0, ""),
            SnapshotTool::Timeshift,
            healthy(),
        );
        let outcome = h.engine.switch("ctxos-desktop", SwitchOptions::default());

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(Stage::Migrate));
        assert_eq!(outcome.steps.len(), 2);
        assert!(!outcome.steps[0].success);
        assert!(outcome.steps[1].success);
        assert!(outcome.snapshot.is_some());
    }

    #[test]
    fn test_unhealthy_after_migration() {
        let h = harness(
            FakeBackend::new(Ecosystem::System).with_installed(&["ctxos-server"]),
            ScriptedRunner::new().on("timeshift --create", 0, ""),
            SnapshotTool::Timeshift,
            ScriptedRunner::new()
                .on("systemctl is-active dbus", 3, "failed")
                .on("systemctl is-active", 0, "active")
                .on("ping", 0, ""),
        );
        let outcome = h.engine.switch("ctxos-desktop", SwitchOptions::default());

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(Stage::PostHealth));
        assert_eq!(
            outcome.details,
            Some(vec!["Service 'dbus' is not running.".to_string()])
        );
        assert!(!h.snapshot_runner.called("timeshift --restore"));
    }

    #[test]
    fn test_concurrent_switches_do_not_interleave() {
        let h = harness(
            FakeBackend::new(Ecosystem::System)
                .with_installed(&["ctxos-server"])
                .with_delay(Duration::from_millis(30)),
            ScriptedRunner::new().on("timeshift --create", 0, ""),
            SnapshotTool::Timeshift,
            healthy(),
        );
        let engine = Arc::new(h.engine);

        let handles: Vec<_> = ["ctxos-desktop", "ctxos-dev"]
            .into_iter()
            .map(|target| {
                let engine = engine.clone();
                thread::spawn(move || engine.switch(target, SwitchOptions::default()))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().success);
        }

        // Every mutation finishes before the next one starts
        let calls = h.system.calls();
        for pair in calls.chunks(2) {
            assert_eq!(pair[1], format!("done {}", pair[0]));
        }
    }
}
