use crate::consul::ConsulBackend;
use crate::factory::{PlatformProcessManager, PlatformProcessManagerFactory};
use consul_lock_core::{
    BackendConfig, EXIT_CODE_ERROR, KvBackend, LockCoordinator, LockError, LockOptions,
    ProcessManager, ProcessManagerFactory, ProcessSupervisor,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Runs a program only while holding the lock on a key
pub struct LockedRunner<B, M = PlatformProcessManager> {
    coordinator: LockCoordinator<B>,
    supervisor: ProcessSupervisor<M>,
}

impl LockedRunner<ConsulBackend> {
    /// Runner talking to the Consul agent described by `config`
    pub fn connect(config: &BackendConfig, options: LockOptions) -> Result<Self, LockError> {
        config
            .validate(&options)
            .map_err(|e| LockError::Configuration(e.to_string()))?;
        let backend = ConsulBackend::new(config)?;
        debug!(
            address = %config.address,
            platform = PlatformProcessManagerFactory::platform_name(),
            "runner configured"
        );

        Ok(Self::new(
            LockCoordinator::new(backend, options)
                .with_retry_config(config.retry_config.clone()),
            ProcessSupervisor::new(Arc::new(
                PlatformProcessManagerFactory::create_process_manager(),
            )),
        ))
    }
}

impl<B: KvBackend, M: ProcessManager> LockedRunner<B, M> {
    pub fn new(coordinator: LockCoordinator<B>, supervisor: ProcessSupervisor<M>) -> Self {
        Self {
            coordinator,
            supervisor,
        }
    }

    pub fn coordinator(&self) -> &LockCoordinator<B> {
        &self.coordinator
    }

    /// Acquire `key`, run `program` to completion, release, and return the
    /// exit code the invoking process should report.
    pub async fn run(&self, key: &str, program: &str, args: &[String]) -> i32 {
        let outcome = self
            .coordinator
            .run_locked(key, |_session| self.supervisor.run(program, args))
            .await;

        match outcome {
            Ok(code) => code,
            Err(e) if e.is_contention() => {
                warn!("{e}");
                self.coordinator.options().contention_exit_code
            }
            Err(e) => {
                error!("{e}");
                EXIT_CODE_ERROR
            }
        }
    }
}
