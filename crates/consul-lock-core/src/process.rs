use crate::error::ProcessError;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Unique identifier for a process
pub type ProcessId = u32;

/// Exit code reported for a trapped signal that has no POSIX number
pub const UNCLASSIFIED_SIGNAL_CODE: i32 = -1;

/// Exit code extracted from a status that ended by signal rather than exit
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// Termination-style signals the supervisor traps and forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrappedSignal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
    /// A platform event with no POSIX equivalent (e.g. Ctrl-Break)
    Other(&'static str),
}

impl TrappedSignal {
    /// The trapped set on POSIX systems
    pub const POSIX: [TrappedSignal; 4] = [
        TrappedSignal::Hangup,
        TrappedSignal::Interrupt,
        TrappedSignal::Terminate,
        TrappedSignal::Quit,
    ];

    /// POSIX signal number, when there is one
    pub fn number(&self) -> Option<i32> {
        match self {
            TrappedSignal::Hangup => Some(1),
            TrappedSignal::Interrupt => Some(2),
            TrappedSignal::Quit => Some(3),
            TrappedSignal::Terminate => Some(15),
            TrappedSignal::Other(_) => None,
        }
    }

    /// Exit code reported when this signal decided the outcome
    pub fn exit_code(&self) -> i32 {
        self.number().unwrap_or(UNCLASSIFIED_SIGNAL_CODE)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TrappedSignal::Hangup => "SIGHUP",
            TrappedSignal::Interrupt => "SIGINT",
            TrappedSignal::Terminate => "SIGTERM",
            TrappedSignal::Quit => "SIGQUIT",
            TrappedSignal::Other(name) => *name,
        }
    }
}

impl fmt::Display for TrappedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(number) => write!(f, "{}({number})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// How a child process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Exited on its own with this code
    Exited(i32),
    /// Ended by this signal number (POSIX only)
    Signaled(i32),
    /// The platform gave back a status this build cannot interpret
    Undecodable(String),
}

impl ProcessStatus {
    /// Exit code to report for this status.
    ///
    /// Signal deaths report the platform's extracted exit status, not 128+N.
    pub fn exit_code(&self) -> Result<i32, ProcessError> {
        match self {
            ProcessStatus::Exited(code) => Ok(*code),
            ProcessStatus::Signaled(_) => Ok(SIGNALED_EXIT_CODE),
            ProcessStatus::Undecodable(raw) => Err(ProcessError::UndecodableStatus(raw.clone())),
        }
    }
}

/// The child's ends of its standard streams, once handed over
#[derive(Default)]
pub struct ChildStdio {
    pub stdin: Option<Box<dyn AsyncWrite + Unpin + Send>>,
    pub stdout: Option<Box<dyn AsyncRead + Unpin + Send>>,
    pub stderr: Option<Box<dyn AsyncRead + Unpin + Send>>,
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync + 'static {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn get_command(&self) -> &str;

    /// Hand over the piped standard streams; later calls return nothing
    fn take_stdio(&mut self) -> ChildStdio;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError>;
}

/// Spawning side of a platform process manager
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// The type of process handle this lifecycle manager produces
    type Handle: ProcessHandle;

    /// Spawn `command` with piped standard streams
    async fn spawn_process(&self, command: &str, args: &[String])
    -> Result<Self::Handle, ProcessError>;
}

/// Signal side of a platform process manager
pub trait ProcessSignaling: Send + Sync {
    type Listener: SignalListener;

    /// Start trapping the termination-style signals for this process
    fn trap_signals(&self) -> Result<Self::Listener, ProcessError>;

    /// Deliver `signal` to the process `pid` unchanged
    fn forward_signal(&self, pid: ProcessId, signal: TrappedSignal) -> Result<(), ProcessError>;
}

/// Platform process manager combining spawning and signalling
pub trait ProcessManager: ProcessLifecycle + ProcessSignaling {
    fn new() -> Self
    where
        Self: Sized;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str
    where
        Self: Sized;
}

/// Factory trait for creating the platform's process manager
pub trait ProcessManagerFactory {
    type Manager: ProcessManager;

    fn create_process_manager() -> Self::Manager;

    fn platform_name() -> &'static str;
}

/// Source of trapped signals
#[async_trait]
pub trait SignalListener: Send {
    /// Next trapped signal; `None` once no more can arrive
    async fn recv(&mut self) -> Option<TrappedSignal>;
}

/// Listener fed from a channel, for embedding and tests
pub struct ChannelSignalListener {
    rx: mpsc::Receiver<TrappedSignal>,
}

impl ChannelSignalListener {
    pub fn channel() -> (mpsc::Sender<TrappedSignal>, Self) {
        let (tx, rx) = mpsc::channel(4);
        (tx, Self { rx })
    }
}

#[async_trait]
impl SignalListener for ChannelSignalListener {
    async fn recv(&mut self) -> Option<TrappedSignal> {
        self.rx.recv().await
    }
}
