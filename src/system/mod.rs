//! Host interaction layer
//!
//! This module handles all interactions with the host system:
//! - Command execution (timeouts, non-interactive environment, dry-run)
//! - Package backends for APT and Flatpak behind one contract
//! - Snapshot facility detection and restore points
//! - Health verification and hardware detection

pub mod apt;
pub mod backend;
pub mod exec;
pub mod flatpak;
pub mod hardware;
pub mod health;
pub mod snapshot;

pub use apt::AptBackend;
pub use backend::PackageRouter;
pub use exec::SystemRunner;
pub use flatpak::FlatpakBackend;
pub use health::HealthVerifier;
pub use snapshot::SnapshotGuard;
