//! Wiring a bus to the standard streams of a helper process.
//!
//! The host spawns the helper with piped stdin/stdout and speaks frames
//! over them; stderr stays inherited so helper logs land in the host's
//! log stream. The helper side binds the mirror-image bus over its own
//! stdio. No command-line flags or environment variables carry protocol
//! configuration; anything the helper needs arrives as envelope fields
//! over the established channel.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::bus::MessageBus;
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};

/// Host-side bus speaking to a helper child over its stdio.
pub type HelperBus = MessageBus<ChildStdout, ChildStdin>;

/// Helper-side bus over the process's own stdio.
pub type StdioBus = MessageBus<tokio::io::Stdin, tokio::io::Stdout>;

/// A spawned helper child whose stdio carries the bus.
pub struct HelperProcess {
    child: Child,
}

impl HelperProcess {
    /// Spawn `program args..` with piped stdio and build the host-side
    /// bus over it. The returned bus is not started.
    pub fn spawn<P, I, A>(program: P, args: I, config: BusConfig) -> BusResult<(Self, HelperBus)>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| BusError::Process(format!("spawn failed: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BusError::Process("helper stdout was not piped".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BusError::Process("helper stdin was not piped".into()))?;
        let bus = MessageBus::new(stdout, stdin, config);
        Ok((Self { child }, bus))
    }

    /// Wait for the helper to exit. Dropping the host bus closes the
    /// helper's stdin, which is the shutdown signal it watches for.
    pub async fn wait(&mut self) -> BusResult<std::process::ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| BusError::Process(format!("wait failed: {e}")))
    }

    /// Kill the helper outright.
    pub async fn kill(&mut self) -> BusResult<()> {
        self.child
            .kill()
            .await
            .map_err(|e| BusError::Process(format!("kill failed: {e}")))
    }
}

/// Build the helper-side bus over this process's own stdio.
pub fn stdio_bus(config: BusConfig) -> StdioBus {
    MessageBus::new(tokio::io::stdin(), tokio::io::stdout(), config)
}
