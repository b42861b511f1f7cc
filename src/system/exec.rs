//! External command execution
//!
//! Every interaction with package managers, snapshot tools and service
//! managers goes through a `CommandRunner`. Runners never fail: a non-zero
//! exit, a missing binary and a timeout are all reported on the returned
//! `ActionResult`. Supports dry-run mode for safe testing.

use crate::error::CoreError;
use crate::types::ActionResult;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Environment override applied to every package mutation
pub const NONINTERACTIVE_ENV: (&str, &str) = ("DEBIAN_FRONTEND", "noninteractive");

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A command line plus the environment it should run with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Changes system state (skipped in dry-run mode)
    pub mutates: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            mutates: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Mark as a system mutation that must never prompt
    pub fn mutation(self) -> Self {
        let mut spec = self.env(NONINTERACTIVE_ENV.0, NONINTERACTIVE_ENV.1);
        spec.mutates = true;
        spec
    }

    /// Human-readable command line
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs external commands
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> ActionResult;
}

/// Runs commands on the host with a per-invocation deadline
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(timeout: Duration, dry_run: bool) -> Self {
        Self { timeout, dry_run }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> ActionResult {
        let command = spec.display();

        if self.dry_run && spec.mutates {
            tracing::info!(%command, "dry run, not executing");
            return ActionResult::synthesized(
                command.clone(),
                format!("Dry run: Would execute `{}`", command),
            );
        }

        tracing::debug!(%command, "running");
        match execute(spec, self.timeout) {
            Ok(Some((code, output))) => {
                if code != 0 {
                    tracing::debug!(%command, code, "command failed");
                }
                ActionResult::completed(command, code, output)
            }
            Ok(None) => {
                tracing::warn!(%command, timeout_secs = self.timeout.as_secs(), "command timed out");
                ActionResult::failed(command, CoreError::Timeout.to_string())
            }
            Err(source) => {
                let err = CoreError::Launch {
                    program: spec.program.clone(),
                    source,
                };
                tracing::debug!(%command, error = %err, "launch failed");
                ActionResult::failed(command, err.to_string())
            }
        }
    }
}

/// Spawn the command with stdout and stderr sharing one pipe
///
/// Returns `Ok(None)` when the deadline expired and the child was killed.
fn execute(spec: &CommandSpec, timeout: Duration) -> io::Result<Option<(i32, String)>> {
    let (mut reader, writer) = io::pipe()?;

    let mut child = {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so a timeout can take down helpers too
            cmd.process_group(0);
        }
        cmd.spawn()?
        // `cmd` drops here, closing our copies of the write end
    };

    let collector = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            kill_group(&mut child);
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let output = collector.join().unwrap_or_default();
    // Killed by a signal: report it the way a shell would
    let code = status.code().unwrap_or(128);
    Ok(Some((code, output)))
}

/// Kill the child and everything left in its process group
///
/// Grandchildren holding the pipe would otherwise keep the collector
/// thread blocked after the deadline.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: plain signal delivery to a group we created
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
