//! Post-operation health verification

use super::exec::{CommandRunner, CommandSpec};
use crate::types::HealthReport;
use std::sync::Arc;

pub struct HealthVerifier {
    runner: Arc<dyn CommandRunner>,
    services: Vec<String>,
    reachability_host: String,
}

impl HealthVerifier {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        services: Vec<String>,
        reachability_host: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            services,
            reachability_host: reachability_host.into(),
        }
    }

    /// Check critical services and network reachability
    pub fn check(&self) -> HealthReport {
        let mut errors: Vec<String> = self
            .services
            .iter()
            .filter(|service| !self.is_service_running(service))
            .map(|service| format!("Service '{}' is not running.", service))
            .collect();

        if !self.has_network() {
            errors.push("No internet connectivity detected.".to_string());
        }

        let report = HealthReport::from_errors(errors);
        if report.healthy {
            tracing::info!("health check passed");
        } else {
            tracing::warn!(errors = ?report.errors, "health check failed");
        }
        report
    }

    fn is_service_running(&self, service: &str) -> bool {
        let result = self
            .runner
            .run(&CommandSpec::new("systemctl").args(["is-active", service]));
        match result.exit_code {
            Some(_) => result.output.trim() == "active",
            None if result.timed_out() => {
                tracing::warn!(%service, "systemctl timed out");
                false
            }
            // No service manager (e.g. a container): nothing to verify
            None => {
                tracing::debug!(%service, "systemctl unavailable, assuming healthy");
                true
            }
        }
    }

    fn has_network(&self) -> bool {
        self.runner
            .run(&CommandSpec::new("ping").args(["-c", "1", self.reachability_host.as_str()]))
            .success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::exec::testing::ScriptedRunner;

    fn verifier(runner: ScriptedRunner) -> HealthVerifier {
        HealthVerifier::new(
            Arc::new(runner),
            vec!["dbus".into(), "polkit".into()],
            "deb.debian.org",
        )
    }

    #[test]
    fn test_all_healthy() {
        let report = verifier(
            ScriptedRunner::new()
                .on("systemctl is-active", 0, "active\n")
                .on("ping", 0, ""),
        )
        .check();
        assert!(report.healthy);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_missing_systemctl_is_healthy() {
        let report = verifier(ScriptedRunner::new().on("ping", 0, "")).check();
        assert!(report.healthy);
    }

    #[test]
    fn test_inactive_service_and_no_network() {
        let report = verifier(
            ScriptedRunner::new()
                .on("systemctl is-active dbus", 0, "active\n")
                .on("systemctl is-active polkit", 3, "inactive\n")
                .on("ping", 2, "ping: unknown host"),
        )
        .check();
        assert!(!report.healthy);
        assert_eq!(
            report.errors,
            vec![
                "Service 'polkit' is not running.".to_string(),
                "No internet connectivity detected.".to_string(),
            ]
        );
    }

    #[test]
    fn test_hung_systemctl_is_unhealthy() {
        let report = verifier(
            ScriptedRunner::new()
                .on("systemctl is-active dbus", 0, "active\n")
                .timeout("systemctl is-active polkit")
                .on("ping", 0, ""),
        )
        .check();
        assert!(!report.healthy);
        assert_eq!(report.errors, vec!["Service 'polkit' is not running.".to_string()]);
    }

    #[test]
    fn test_unlaunchable_systemctl_is_healthy() {
        let report = verifier(
            ScriptedRunner::new()
                .missing("systemctl")
                .on("ping", 0, ""),
        )
        .check();
        assert!(report.healthy);
    }

    #[test]
    fn test_missing_ping_fails_closed() {
        let report = verifier(ScriptedRunner::new().on("systemctl", 0, "active")).check();
        assert!(!report.healthy);
        assert_eq!(report.errors.len(), 1);
    }
}
