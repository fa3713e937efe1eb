mod unix_process_manager;

pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager, UnixSignalListener};

pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl consul_lock_core::ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager() -> UnixProcessManager {
        UnixProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
