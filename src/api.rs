//! Request/response boundary
//!
//! Presentation layers send `{ action, params }` and get back a JSON value.
//! Only unknown actions and missing parameters produce an `{ error }` reply;
//! everything else reports failure inside the action's own result shape.

use crate::actions::PackageActions;
use crate::config::Config;
use crate::error::CoreError;
use crate::migration::{HostLock, MigrationEngine, SwitchOptions};
use crate::profiles::{active, ProfileCatalog};
use crate::system::{
    hardware, AptBackend, FlatpakBackend, HealthVerifier, PackageRouter, SnapshotGuard,
    SystemRunner,
};
use crate::types::{Ecosystem, PackageRef, PackageSummary};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Params {
    pub id: Option<String>,
    pub query: Option<String>,
    /// Take a restore point before a simple install/remove
    pub snapshot: bool,
    /// Acknowledge switching without a snapshot facility
    pub allow_unguarded: Option<bool>,
}

impl Params {
    fn required_id(&self) -> Result<&str, CoreError> {
        non_empty(self.id.as_deref()).ok_or(CoreError::MissingParameter("id"))
    }

    fn required_query(&self) -> Result<&str, CoreError> {
        non_empty(self.query.as_deref()).ok_or(CoreError::MissingParameter("query"))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct Service {
    catalog: Arc<ProfileCatalog>,
    packages: PackageRouter,
    snapshots: Arc<SnapshotGuard>,
    health: Arc<HealthVerifier>,
    engine: MigrationEngine,
    actions: PackageActions,
    lock: HostLock,
    suggestions: Vec<PackageSummary>,
    allow_unguarded: bool,
}

impl Service {
    /// Wire up the host-backed components
    pub fn from_config(config: &Config) -> Self {
        let runner = Arc::new(SystemRunner::new(config.command_timeout(), config.dry_run));
        let packages = PackageRouter::new(
            Arc::new(AptBackend::new(runner.clone())),
            Arc::new(FlatpakBackend::new(runner.clone(), config.apps.remote.clone())),
        );
        let snapshots = Arc::new(SnapshotGuard::detect(runner.clone()));
        let health = Arc::new(HealthVerifier::new(
            runner.clone(),
            config.health.services.clone(),
            config.health.reachability_host.clone(),
        ));
        let suggestions = hardware::suggested_stacks(&hardware::detect_gpus(runner.as_ref()));

        Self::assemble(packages, snapshots, health, suggestions, config)
    }

    pub fn assemble(
        packages: PackageRouter,
        snapshots: Arc<SnapshotGuard>,
        health: Arc<HealthVerifier>,
        suggestions: Vec<PackageSummary>,
        config: &Config,
    ) -> Self {
        let lock = HostLock::default();
        let catalog = Arc::new(ProfileCatalog::new(
            packages.clone(),
            config.catalog.bundle_prefix.clone(),
        ));
        let engine = MigrationEngine::new(
            catalog.clone(),
            packages.clone(),
            snapshots.clone(),
            health.clone(),
            lock.clone(),
        );
        let actions = PackageActions::new(packages.clone(), snapshots.clone(), lock.clone());

        Self {
            catalog,
            packages,
            snapshots,
            health,
            engine,
            actions,
            lock,
            suggestions,
            allow_unguarded: config.allow_unguarded,
        }
    }

    pub fn packages(&self) -> &PackageRouter {
        &self.packages
    }

    /// Decode and handle one JSON request
    pub fn handle_json(&self, raw: &str) -> Value {
        match serde_json::from_str::<Request>(raw) {
            Ok(request) => self.handle(&request),
            Err(e) => error_response(CoreError::MalformedRequest(e.to_string())),
        }
    }

    pub fn handle(&self, request: &Request) -> Value {
        tracing::debug!(action = %request.action, "handling request");
        match self.dispatch(request) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(action = %request.action, error = %err, "rejected request");
                error_response(err)
            }
        }
    }

    fn dispatch(&self, request: &Request) -> Result<Value, CoreError> {
        let params = &request.params;
        let value = match request.action.as_str() {
            "list_featured" => Value::Array(self.featured()),
            "list_all" => Value::Array(self.all()),
            "get_details" => self.details(params.required_id()?),
            "search" => Value::Array(self.search(params.required_query()?)),
            "install" => {
                let pkg = PackageRef::parse(params.required_id()?);
                to_value(&self.actions.install(&pkg, params.snapshot))
            }
            "remove" => {
                let pkg = PackageRef::parse(params.required_id()?);
                to_value(&self.actions.remove(&pkg, params.snapshot))
            }
            "switch_profile" => {
                let options = SwitchOptions {
                    allow_unguarded: params.allow_unguarded.unwrap_or(self.allow_unguarded),
                };
                let outcome = self.engine.switch(params.required_id()?, options);
                to_value(&outcome.ensure_error())
            }
            "update" => to_value(&self.actions.update_cache()),
            "migration_impact" => to_value(&self.engine.impact(params.required_id()?)),
            "check_health" => to_value(&self.health.check()),
            "restore_snapshot" => {
                let id = params.required_id()?;
                let _host = self.lock.acquire();
                to_value(&self.snapshots.restore(id))
            }
            "list_snapshots" => to_value(&self.snapshots.list()),
            other => return Err(CoreError::UnknownAction(other.to_string())),
        };
        Ok(value)
    }

    /// Profiles followed by hardware-suggested stacks
    fn featured(&self) -> Vec<Value> {
        let profiles = self.catalog.list_profiles();
        profiles
            .iter()
            .map(to_value)
            .chain(self.suggestions.iter().map(to_value))
            .collect()
    }

    /// Discovered bundles, profiles, then installed apps
    fn all(&self) -> Vec<Value> {
        let bundles = self.catalog.discover_bundles();
        let profiles = self.catalog.list_profiles();
        let apps = self.packages.backend(Ecosystem::Sandboxed).list(None);

        bundles
            .iter()
            .map(to_value)
            .chain(profiles.iter().map(to_value))
            .chain(apps.iter().map(to_value))
            .collect()
    }

    fn details(&self, id: &str) -> Value {
        if ProfileCatalog::is_profile(id) {
            return self.profile_details(id);
        }

        let mut pkg = PackageRef::parse(id);
        let mut info = self.packages.info(&pkg);
        if info.is_none() && pkg.ecosystem == Ecosystem::Sandboxed {
            // Dotted APT names such as python3.11 or libssl3.0
            pkg = PackageRef::system(id);
            info = self.packages.info(&pkg);
        }
        let Some(info) = info else {
            return Value::Null;
        };
        let installed = self.packages.is_installed(&pkg);

        match pkg.ecosystem {
            Ecosystem::Sandboxed => json!({
                "id": id,
                "ecosystem": pkg.ecosystem,
                "name": info.get_or("Name", id),
                "version": info.get_or("Version", ""),
                "description": info.get_or("Description", ""),
                "repo": info.get_or("Origin", "flathub"),
                "type": "app",
                "installed": installed,
            }),
            Ecosystem::System => json!({
                "id": id,
                "ecosystem": pkg.ecosystem,
                "name": info.get_or("Package", id),
                "version": info.get_or("Version", ""),
                "description": info.get_or("Description", ""),
                "size": info.get_or("Size", ""),
                "installed_size": info.get_or("Installed-Size", ""),
                "repo": info.get_or("Origin", "Debian"),
                "section": info.get_or("Section", ""),
                "type": "package",
                "installed": installed,
            }),
        }
    }

    fn profile_details(&self, id: &str) -> Value {
        let profiles = self.catalog.list_profiles();
        let Some(profile) = profiles.iter().find(|p| p.package.id == id) else {
            return Value::Null;
        };
        // Only a move away from another active profile is a switch
        let can_switch = active(&profiles).is_some_and(|current| current.package.id != id);

        let mut value = to_value(profile);
        value["can_switch"] = Value::Bool(can_switch);
        if can_switch {
            value["migration"] = to_value(&self.engine.impact(id));
        }
        value
    }

    /// Local catalog matches, then backend results, de-duplicated by id
    fn search(&self, query: &str) -> Vec<Value> {
        let needle = query.to_lowercase();
        let matches = |field: &Value| {
            field
                .as_str()
                .is_some_and(|s| s.to_lowercase().contains(&needle))
        };

        let mut seen = HashSet::new();
        let local = self
            .all()
            .into_iter()
            .filter(|entry| matches(&entry["name"]) || matches(&entry["id"]));
        let remote = self.packages.search(query).into_iter().map(|p| to_value(&p));

        local
            .chain(remote)
            .filter(|entry| {
                let id = entry["id"].as_str().unwrap_or_default().to_string();
                seen.insert(id)
            })
            .collect()
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn error_response(err: CoreError) -> Value {
    json!({ "error": err.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::backend::fake::FakeBackend;
    use crate::system::exec::testing::ScriptedRunner;
    use crate::types::SnapshotTool;

    struct Fixture {
        system: Arc<FakeBackend>,
        service: Service,
    }

    fn fixture(installed: &[&str], tool: SnapshotTool, health: ScriptedRunner) -> Fixture {
        let system = Arc::new(FakeBackend::new(Ecosystem::System).with_installed(installed));
        let packages = PackageRouter::new(
            system.clone(),
            Arc::new(FakeBackend::new(Ecosystem::Sandboxed)),
        );
        let snapshots = Arc::new(ScriptedRunner::new().on("timeshift --create", 0, ""));
        let service = Service::assemble(
            packages,
            Arc::new(SnapshotGuard::with_tool(snapshots, tool)),
            Arc::new(HealthVerifier::new(
                Arc::new(health),
                vec!["dbus".into()],
                "deb.debian.org",
            )),
            Vec::new(),
            &Config::default(),
        );
        Fixture { system, service }
    }

    fn healthy() -> ScriptedRunner {
        ScriptedRunner::new()
            .on("systemctl", 0, "active")
            .on("ping", 0, "")
    }

    fn request(raw: Value) -> Value {
        let f = fixture(&["ctxos-server"], SnapshotTool::Timeshift, healthy());
        f.service.handle_json(&raw.to_string())
    }

    #[test]
    fn test_unknown_action() {
        let reply = request(json!({ "action": "reboot" }));
        assert_eq!(reply["error"], "Unknown action: reboot");
    }

    #[test]
    fn test_missing_id() {
        let reply = request(json!({ "action": "install", "params": {} }));
        assert_eq!(reply["error"], "Missing required parameter: id");
    }

    #[test]
    fn test_malformed_request() {
        let f = fixture(&[], SnapshotTool::Timeshift, healthy());
        let reply = f.service.handle_json("{not json");
        assert!(reply["error"].as_str().unwrap().starts_with("Malformed request"));
    }

    #[test]
    fn test_install_returns_action_result() {
        let reply = request(json!({ "action": "install", "params": { "id": "htop" } }));
        assert_eq!(reply["success"], true);
        assert_eq!(reply["exit_code"], 0);
    }

    #[test]
    fn test_list_featured_marks_active() {
        let reply = request(json!({ "action": "list_featured" }));
        let rows = reply.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["id"], "ctxos-server");
        assert_eq!(rows[1]["installed"], true);
    }

    #[test]
    fn test_profile_details_include_migration() {
        let reply = request(json!({ "action": "get_details", "params": { "id": "ctxos-desktop" } }));
        assert_eq!(reply["can_switch"], true);
        assert_eq!(reply["migration"]["risk"], "high");
        assert_eq!(reply["migration"]["to_remove"][0], "Server Base");

        let active = request(json!({ "action": "get_details", "params": { "id": "ctxos-server" } }));
        assert_eq!(active["can_switch"], false);
        assert!(active.get("migration").is_none());
    }

    #[test]
    fn test_profile_details_without_active_profile() {
        let f = fixture(&[], SnapshotTool::Timeshift, healthy());
        let reply = f
            .service
            .handle_json(r#"{"action":"get_details","params":{"id":"ctxos-dev"}}"#);
        assert_eq!(reply["id"], "ctxos-dev");
        assert_eq!(reply["can_switch"], false);
        assert!(reply.get("migration").is_none());
    }

    #[test]
    fn test_dotted_apt_package_details() {
        let f = fixture(&["python3.11"], SnapshotTool::Timeshift, healthy());
        let reply = f
            .service
            .handle_json(r#"{"action":"get_details","params":{"id":"python3.11"}}"#);
        assert_eq!(reply["type"], "package");
        assert_eq!(reply["ecosystem"], "system");
        assert_eq!(reply["name"], "python3.11");
        assert_eq!(reply["installed"], true);

        let unknown = f
            .service
            .handle_json(r#"{"action":"get_details","params":{"id":"org.example.Nothing"}}"#);
        assert!(unknown.is_null());
    }

    #[test]
    fn test_search_matches_profiles() {
        let reply = request(json!({ "action": "search", "params": { "query": "SERVER" } }));
        let rows = reply.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "ctxos-server");
    }

    #[test]
    fn test_switch_success() {
        let f = fixture(&["ctxos-server"], SnapshotTool::Timeshift, healthy());
        let reply = f.service.handle(&Request {
            action: "switch_profile".into(),
            params: Params {
                id: Some("ctxos-desktop".into()),
                ..Params::default()
            },
        });
        assert_eq!(reply["success"], true);
        assert_eq!(reply["steps"].as_array().unwrap().len(), 2);
        assert_eq!(f.system.mutations(), 2);
    }

    #[test]
    fn test_failed_switch_always_has_error() {
        let f = fixture(
            &[],
            SnapshotTool::Timeshift,
            ScriptedRunner::new().on("systemctl", 0, "active"),
        );
        let reply = f
            .service
            .handle_json(r#"{"action":"switch_profile","params":{"id":"ctxos-dev"}}"#);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["stage"], "post-health");
        assert_eq!(reply["details"][0], "No internet connectivity detected.");
        assert!(!reply["error"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_switch_unguarded_param() {
        let f = fixture(&[], SnapshotTool::None, healthy());
        let refused = f
            .service
            .handle_json(r#"{"action":"switch_profile","params":{"id":"ctxos-dev"}}"#);
        assert_eq!(refused["stage"], "snapshot");
        assert_eq!(f.system.mutations(), 0);

        let allowed = f.service.handle_json(
            r#"{"action":"switch_profile","params":{"id":"ctxos-dev","allow_unguarded":true}}"#,
        );
        assert_eq!(allowed["success"], true);
        assert_eq!(allowed["unguarded"], true);
    }

    #[test]
    fn test_restore_without_facility() {
        let f = fixture(&[], SnapshotTool::None, healthy());
        let reply = f
            .service
            .handle_json(r#"{"action":"restore_snapshot","params":{"id":"unguarded-1"}}"#);
        assert_eq!(reply["success"], true);
        let listed = f.service.handle_json(r#"{"action":"list_snapshots"}"#);
        assert_eq!(listed, json!([]));
    }
}
