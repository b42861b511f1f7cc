//! Background update monitor
//!
//! Periodically counts pending upgrades across both ecosystems and pushes a
//! notice onto a bounded channel. A slow consumer never stalls the poller:
//! notices that do not fit are dropped, the next poll produces a fresh one.

use crate::system::PackageRouter;
use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct UpdateNotice {
    pub count: usize,
    pub checked_at: DateTime<Local>,
}

pub struct UpdateMonitor {
    stop: Sender<()>,
    notices: Receiver<UpdateNotice>,
    handle: JoinHandle<()>,
}

impl UpdateMonitor {
    /// Start polling every `interval`, buffering up to `capacity` notices
    pub fn spawn(packages: PackageRouter, interval: Duration, capacity: usize) -> io::Result<Self> {
        let (stop, stop_rx) = channel::bounded(1);
        let (tx, notices) = channel::bounded(capacity.max(1));

        let handle = thread::Builder::new()
            .name("update-monitor".into())
            .spawn(move || poll_loop(&packages, interval, &tx, &stop_rx))?;

        tracing::info!(interval_secs = interval.as_secs(), "update monitor started");
        Ok(Self {
            stop,
            notices,
            handle,
        })
    }

    pub fn notices(&self) -> &Receiver<UpdateNotice> {
        &self.notices
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the poller to exit without waiting for it
    ///
    /// A poll already in flight finishes in the background.
    pub fn stop(self) {
        if !self.is_running() {
            tracing::warn!("update monitor had already exited");
            return;
        }
        let _ = self.stop.try_send(());
        tracing::info!("update monitor stopping");
    }
}

fn poll_loop(
    packages: &PackageRouter,
    interval: Duration,
    tx: &Sender<UpdateNotice>,
    stop: &Receiver<()>,
) {
    loop {
        tracing::debug!("checking for updates");
        let count = packages.pending_updates();
        if count > 0 {
            tracing::info!(count, "updates available");
            let notice = UpdateNotice {
                count,
                checked_at: Local::now(),
            };
            match tx.try_send(notice) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("update queue full, dropping notice");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }

        crossbeam::select! {
            // A message or a dropped monitor both mean stop
            recv(stop) -> _ => return,
            default(interval) => {}
        }
    }
}
