//! Command execution for OS network configuration
//!
//! Every routing or addressing change is issued as an external command
//! (`ip`, `ifconfig`, `route`, `cmd /C route`). The [`CommandExecutor`]
//! trait keeps that behind a seam so the routing logic can run against a
//! [`RecordingExecutor`] instead of the real host.

use serde::Serialize;
use std::fmt;
use std::io;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Default upper bound for a single command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        source: io::Error,
    },
}

/// A single command line: program plus positional arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Capability to run an external command
pub trait CommandExecutor: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

/// Spawns real OS processes, killing any that outlive the timeout
pub struct SystemExecutor {
    timeout: Duration,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for SystemExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        debug!("exec: {}", invocation);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Spawn {
                program: invocation.program.clone(),
                source: e,
            })?;

        // Route tools print a few lines at most, so the pipes never fill
        // before the child exits.
        let deadline = Instant::now() + self.timeout;
        loop {
            let exited = child.try_wait().map_err(|e| ExecError::Wait {
                program: invocation.program.clone(),
                source: e,
            })?;
            if exited.is_some() {
                break;
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill {} after timeout: {}", invocation, e);
                }
                if let Err(e) = child.wait() {
                    warn!("Failed to reap {} after timeout: {}", invocation, e);
                }
                return Err(ExecError::Timeout {
                    program: invocation.program.clone(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }

        let output = child.wait_with_output().map_err(|e| ExecError::Wait {
            program: invocation.program.clone(),
            source: e,
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Records every invocation and answers with scripted results
///
/// Commands succeed with empty output unless a response was registered for
/// a matching command-line prefix. Used by tests and by `tunroute plan`.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Invocation>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any command line starting with `prefix` with `output`
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        self.push_response(prefix, output);
        self
    }

    /// Make any command line starting with `prefix` exit non-zero
    pub fn fail_on(self, prefix: &str) -> Self {
        self.push_response(prefix, CommandOutput::failed(2, "RTNETLINK answers: File exists"));
        self
    }

    fn push_response(&self, prefix: &str, output: CommandOutput) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push((prefix.to_string(), output));
        }
    }

    /// All invocations seen so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Invocations rendered as command lines
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl CommandExecutor for RecordingExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        let line = invocation.to_string();
        let scripted = self.responses.lock().ok().and_then(|responses| {
            responses
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map(|(_, output)| output.clone())
        });

        Ok(scripted.unwrap_or_else(|| CommandOutput::ok("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display() {
        let inv = Invocation::new("/sbin/ip", ["link", "set", "dev", "tun0", "up"]);
        assert_eq!(inv.to_string(), "/sbin/ip link set dev tun0 up");
    }

    #[test]
    fn test_command_output_success() {
        assert!(CommandOutput::ok("").success());
        assert!(!CommandOutput::failed(1, "nope").success());
        assert!(!CommandOutput::default().success());
    }

    #[test]
    fn test_recording_executor_records_in_order() {
        let exec = RecordingExecutor::new();
        exec.run(&Invocation::new("route", ["add", "default", "10.0.0.1"]))
            .unwrap();
        exec.run(&Invocation::new("route", ["change", "default", "10.0.0.1"]))
            .unwrap();

        assert_eq!(
            exec.command_lines(),
            vec!["route add default 10.0.0.1", "route change default 10.0.0.1"]
        );

        exec.clear();
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_recording_executor_scripted_responses() {
        let exec = RecordingExecutor::new()
            .respond(
                "/sbin/ip route show default",
                CommandOutput::ok("default via 192.168.1.1 dev eth0"),
            )
            .fail_on("/sbin/ip route add 0.0.0.0/1");

        let out = exec
            .run(&Invocation::new("/sbin/ip", ["route", "show", "default"]))
            .unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("eth0"));

        let out = exec
            .run(&Invocation::new("/sbin/ip", ["route", "add", "0.0.0.0/1", "dev", "tun0"]))
            .unwrap();
        assert!(!out.success());

        let out = exec
            .run(&Invocation::new("/sbin/ip", ["route", "add", "128.0.0.0/1", "dev", "tun0"]))
            .unwrap();
        assert!(out.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_executor_spawn_failure() {
        let exec = SystemExecutor::new();
        let missing = Invocation::new("/nonexistent/tunroute-test-binary", Vec::<String>::new());
        let result = exec.run(&missing);
        assert!(matches!(result, Err(ExecError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_executor_timeout_kills_child() {
        let exec = SystemExecutor::with_timeout(Duration::from_millis(100));
        let result = exec.run(&Invocation::new("sleep", ["5"]));
        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_executor_captures_output() {
        let exec = SystemExecutor::new();
        let out = exec.run(&Invocation::new("echo", ["hello"])).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }
}
