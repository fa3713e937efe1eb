#[cfg(windows)]
mod windows_impl {
    use async_trait::async_trait;
    use consul_lock_core::{
        ChildStdio, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager,
        ProcessSignaling, ProcessStatus, SignalListener, TrappedSignal,
    };
    use std::process::Stdio;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::process::{Child, Command};
    use tokio::signal::windows::{CtrlBreak, CtrlC, ctrl_break, ctrl_c};
    use tracing::info;
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

    /// Exit code a forwarded termination leaves on the child
    const FORWARDED_EXIT_CODE: u32 = 1;

    /// Windows-specific process handle implementation
    pub struct WindowsProcessHandle {
        child: Child,
        command: String,
    }

    impl WindowsProcessHandle {
        pub fn new(child: Child, command: String) -> Self {
            Self { child, command }
        }
    }

    #[async_trait]
    impl ProcessHandle for WindowsProcessHandle {
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
            Ok(match status.code() {
                Some(code) => ProcessStatus::Exited(code),
                None => ProcessStatus::Undecodable(format!("{status:?}")),
            })
        }
    }

    /// Windows-specific process manager
    pub struct WindowsProcessManager;

    impl WindowsProcessManager {
        pub fn new() -> Self {
            WindowsProcessManager
        }
    }

    impl Default for WindowsProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for WindowsProcessManager {
        type Handle = WindowsProcessHandle;

        async fn spawn_process(
            &self,
            command: &str,
            args: &[String],
        ) -> Result<WindowsProcessHandle, ProcessError> {
            let child = Command::new(command)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| ProcessError::SpawnFailed(format!("{command}: {e}")))?;

            if let Some(pid) = child.id() {
                info!(pid = %pid, command = %command, args = ?args, "Spawned Windows process");
            }

            Ok(WindowsProcessHandle::new(child, command.to_string()))
        }
    }

    impl ProcessSignaling for WindowsProcessManager {
        type Listener = WindowsSignalListener;

        fn trap_signals(&self) -> Result<WindowsSignalListener, ProcessError> {
            WindowsSignalListener::new().map_err(ProcessError::from)
        }

        /// There is no signal delivery on Windows; every forwarded event
        /// becomes a termination request.
        fn forward_signal(
            &self,
            pid: ProcessId,
            signal: TrappedSignal,
        ) -> Result<(), ProcessError> {
            let failed = |e: windows::core::Error| ProcessError::Signal {
                signal: signal.to_string(),
                reason: e.to_string(),
            };

            // SAFETY: the handle is opened here, used once and closed before returning
            unsafe {
                let handle = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(failed)?;
                let terminated = TerminateProcess(handle, FORWARDED_EXIT_CODE).map_err(failed);
                let _ = CloseHandle(handle);
                terminated?;
            }

            info!(pid = %pid, signal = %signal, "Terminated process in place of signal");
            Ok(())
        }
    }

    impl ProcessManager for WindowsProcessManager {
        fn new() -> Self {
            WindowsProcessManager::new()
        }

        fn platform_name() -> &'static str {
            "Windows"
        }
    }

    /// Console control events standing in for trapped signals
    pub struct WindowsSignalListener {
        ctrl_c: CtrlC,
        ctrl_break: CtrlBreak,
    }

    impl WindowsSignalListener {
        pub fn new() -> std::io::Result<Self> {
            Ok(Self {
                ctrl_c: ctrl_c()?,
                ctrl_break: ctrl_break()?,
            })
        }
    }

    #[async_trait]
    impl SignalListener for WindowsSignalListener {
        async fn recv(&mut self) -> Option<TrappedSignal> {
            let signal = tokio::select! {
                Some(()) = self.ctrl_c.recv() => TrappedSignal::Interrupt,
                Some(()) = self.ctrl_break.recv() => TrappedSignal::Other("CTRL_BREAK"),
                else => return None,
            };
            Some(signal)
        }
    }

}

#[cfg(windows)]
pub use windows_impl::{WindowsProcessHandle, WindowsProcessManager, WindowsSignalListener};

// Provide stub implementations for non-Windows systems
#[cfg(not(windows))]
pub struct WindowsProcessHandle;

#[cfg(not(windows))]
pub struct WindowsProcessManager;

#[cfg(not(windows))]
pub struct WindowsSignalListener;

#[cfg(not(windows))]
impl WindowsProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(windows))]
impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
