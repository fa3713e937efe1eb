use crate::config::EXIT_CODE_ERROR;
use crate::process::{ProcessHandle, ProcessManager, ProcessStatus, SignalListener, TrappedSignal};
use crate::stdio::{self, RelayStdErr, RelayStdOut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type StdinSource = Box<dyn AsyncRead + Unpin + Send>;

/// Runs one child program at a time, relaying its standard streams and
/// forwarding trapped signals to it.
pub struct ProcessSupervisor<M> {
    process_manager: Arc<M>,
    stdin: Mutex<Option<StdinSource>>,
    out: RelayStdOut,
    err: RelayStdErr,
    drain_timeout: Duration,
}

impl<M: ProcessManager> ProcessSupervisor<M> {
    pub fn new(process_manager: Arc<M>) -> Self {
        Self::new_with_buffers(
            process_manager,
            None,
            RelayStdOut::inherit(),
            RelayStdErr::inherit(),
        )
    }

    /// Use `stdin` instead of the process's own standard input (taken by the
    /// next run only) and the given output sinks.
    pub fn new_with_buffers(
        process_manager: Arc<M>,
        stdin: Option<StdinSource>,
        out: RelayStdOut,
        err: RelayStdErr,
    ) -> Self {
        Self {
            process_manager,
            stdin: Mutex::new(stdin),
            out,
            err,
            drain_timeout: Duration::from_secs(2),
        }
    }

    /// How long output relays may keep draining after the child has exited
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Run `program` to completion and return the exit code to report.
    pub async fn run(&self, program: &str, args: &[String]) -> i32 {
        match self.process_manager.trap_signals() {
            Ok(signals) => self.run_with_signals(program, args, signals).await,
            Err(e) => {
                error!("Failed to trap signals: {e}");
                EXIT_CODE_ERROR
            }
        }
    }

    /// [`run`](Self::run) with an explicit signal source.
    ///
    /// The first trapped signal decides the exit code; the child is still
    /// waited for, so the call never returns while the child is alive.
    pub async fn run_with_signals<S: SignalListener>(
        &self,
        program: &str,
        args: &[String],
        mut signals: S,
    ) -> i32 {
        let mut handle = match self.process_manager.spawn_process(program, args).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("{e}");
                return EXIT_CODE_ERROR;
            }
        };
        let pid = handle.get_pid();
        info!(command = handle.get_command(), ?pid, "Started child process");

        let cancel = CancellationToken::new();
        let relays = self.start_relays(&mut handle, &cancel);

        let exit = handle.wait();
        tokio::pin!(exit);

        let mut received: Option<TrappedSignal> = None;
        let mut listening = true;
        // a child that has already exited wins over any queued signal
        let exited = loop {
            tokio::select! {
                biased;
                exited = &mut exit => break exited,
                signal = signals.recv(), if listening => match signal {
                    Some(signal) => {
                        warn!("Got signal: {signal}");
                        self.forward(pid, signal);
                        received.get_or_insert(signal);
                    }
                    None => listening = false,
                },
            }
        };

        cancel.cancel();
        self.drain(relays).await;

        if let Some(signal) = received {
            return signal.exit_code();
        }

        let status = match exited {
            Ok(status) => status,
            Err(e) => {
                error!("{e}");
                return EXIT_CODE_ERROR;
            }
        };
        debug!(?status, "child exited");
        exit_code(&status)
    }

    fn forward(&self, pid: Option<u32>, signal: TrappedSignal) {
        let Some(pid) = pid else {
            warn!("Child has no PID, cannot forward {signal}");
            return;
        };
        if let Err(e) = self.process_manager.forward_signal(pid, signal) {
            warn!("{e}");
        }
    }

    fn start_relays(
        &self,
        handle: &mut M::Handle,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let stdio = handle.take_stdio();
        let mut output = Vec::with_capacity(2);

        if let Some(mut child_in) = stdio.stdin {
            let source = self
                .stdin
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_else(|| Box::new(tokio::io::stdin()) as StdinSource);
            let cancel = cancel.child_token();
            // not drained: it only ends on stdin EOF or cancellation
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = stdio::feed(source, &mut child_in) => {
                        if let Err(e) = result {
                            warn!("stdin relay failed: {e}");
                        }
                    }
                }
            });
        }

        if let Some(child_out) = stdio.stdout {
            let out = self.out.clone();
            output.push(tokio::spawn(async move {
                if let Err(e) = stdio::stream(child_out, out).await {
                    warn!("stdout relay failed: {e}");
                }
            }));
        }

        if let Some(child_err) = stdio.stderr {
            let err = self.err.clone();
            output.push(tokio::spawn(async move {
                if let Err(e) = stdio::stream(child_err, err).await {
                    warn!("stderr relay failed: {e}");
                }
            }));
        }

        output
    }

    async fn drain(&self, relays: Vec<JoinHandle<()>>) {
        let aborts: Vec<_> = relays.iter().map(JoinHandle::abort_handle).collect();
        let all = async {
            for relay in relays {
                let _ = relay.await;
            }
        };
        if tokio::time::timeout(self.drain_timeout, all).await.is_err() {
            warn!("Output relays still open after child exit, abandoning them");
            aborts.iter().for_each(|abort| abort.abort());
        }
    }
}

/// Exit code for a child that ended on its own
fn exit_code(status: &ProcessStatus) -> i32 {
    status.exit_code().unwrap_or_else(|e| {
        error!("{e}");
        EXIT_CODE_ERROR
    })
}
