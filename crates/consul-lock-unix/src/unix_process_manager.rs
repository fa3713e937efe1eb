#[cfg(unix)]
mod unix_impl {
    use async_trait::async_trait;
    use consul_lock_core::{
        ChildStdio, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager,
        ProcessSignaling, ProcessStatus, SignalListener, TrappedSignal,
    };
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Stdio};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::process::{Child, Command};
    use tokio::signal::unix::{SignalKind, signal as unix_signal};
    use tracing::{debug, info};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String) -> Self {
            Self { child, command }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            self.child.id()
        }

        fn get_command(&self) -> &str {
            &self.command
        }

        fn take_stdio(&mut self) -> ChildStdio {
            ChildStdio {
                stdin: self
                    .child
                    .stdin
                    .take()
                    .map(|s| Box::new(s) as Box<dyn AsyncWrite + Unpin + Send>),
                stdout: self
                    .child
                    .stdout
                    .take()
                    .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>),
                stderr: self
                    .child
                    .stderr
                    .take()
                    .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>),
            }
        }

        async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
            let status = self
                .child
                .wait()
                .await
                .map_err(|e| ProcessError::Wait(e.to_string()))?;
            Ok(decode_status(status))
        }
    }

    fn decode_status(status: ExitStatus) -> ProcessStatus {
        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessStatus::Exited(code),
            (None, Some(signal)) => ProcessStatus::Signaled(signal),
            (None, None) => ProcessStatus::Undecodable(format!("{status:?}")),
        }
    }

    fn to_nix(signal: TrappedSignal) -> Option<Signal> {
        match signal {
            TrappedSignal::Hangup => Some(Signal::SIGHUP),
            TrappedSignal::Interrupt => Some(Signal::SIGINT),
            TrappedSignal::Terminate => Some(Signal::SIGTERM),
            TrappedSignal::Quit => Some(Signal::SIGQUIT),
            TrappedSignal::Other(_) => None,
        }
    }

    /// Unix-specific process manager
    pub struct UnixProcessManager;

    impl UnixProcessManager {
        pub fn new() -> Self {
            UnixProcessManager
        }
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        type Handle = UnixProcessHandle;

        async fn spawn_process(
            &self,
            command: &str,
            args: &[String],
        ) -> Result<UnixProcessHandle, ProcessError> {
            let mut cmd = Command::new(command);
            cmd.args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            // Keep terminal-generated signals away from the child; they reach
            // it only through forwarding
            cmd.process_group(0);

            let child = cmd
                .spawn()
                .map_err(|e| ProcessError::SpawnFailed(format!("{command}: {e}")))?;

            if let Some(pid) = child.id() {
                info!("Spawned Unix process: {} (PID: {}) with args: {:?}", command, pid, args);
            }

            Ok(UnixProcessHandle::new(child, command.to_string()))
        }
    }

    impl ProcessSignaling for UnixProcessManager {
        type Listener = UnixSignalListener;

        fn trap_signals(&self) -> Result<UnixSignalListener, ProcessError> {
            UnixSignalListener::new().map_err(ProcessError::from)
        }

        fn forward_signal(
            &self,
            pid: ProcessId,
            trapped: TrappedSignal,
        ) -> Result<(), ProcessError> {
            let Some(sig) = to_nix(trapped) else {
                debug!("{trapped} has no POSIX equivalent, not forwarding");
                return Ok(());
            };
            let nix_pid = NixPid::from_raw(pid as i32);

            match signal::kill(nix_pid, sig) {
                Ok(()) => {
                    info!("Forwarded {} to process {}", trapped, pid);
                    Ok(())
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    Ok(())
                }
                Err(e) => Err(ProcessError::Signal {
                    signal: trapped.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            UnixProcessManager::new()
        }

        fn platform_name() -> &'static str {
            "Unix"
        }
    }

    /// Listener for SIGHUP, SIGINT, SIGTERM and SIGQUIT.
    ///
    /// Installing it replaces the default disposition of those signals, so
    /// the invoking process survives them until the child has been reaped.
    pub struct UnixSignalListener {
        hangup: tokio::signal::unix::Signal,
        interrupt: tokio::signal::unix::Signal,
        terminate: tokio::signal::unix::Signal,
        quit: tokio::signal::unix::Signal,
    }

    impl UnixSignalListener {
        pub fn new() -> std::io::Result<Self> {
            Ok(Self {
                hangup: unix_signal(SignalKind::hangup())?,
                interrupt: unix_signal(SignalKind::interrupt())?,
                terminate: unix_signal(SignalKind::terminate())?,
                quit: unix_signal(SignalKind::quit())?,
            })
        }
    }

    #[async_trait]
    impl SignalListener for UnixSignalListener {
        async fn recv(&mut self) -> Option<TrappedSignal> {
            let signal = tokio::select! {
                Some(()) = self.hangup.recv() => TrappedSignal::Hangup,
                Some(()) = self.interrupt.recv() => TrappedSignal::Interrupt,
                Some(()) = self.terminate.recv() => TrappedSignal::Terminate,
                Some(()) = self.quit.recv() => TrappedSignal::Quit,
                else => return None,
            };
            Some(signal)
        }
    }

}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager, UnixSignalListener};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
pub struct UnixSignalListener;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
