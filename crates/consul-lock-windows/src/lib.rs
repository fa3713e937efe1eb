//! Windows-specific process management implementation

mod windows_process_manager;

pub use windows_process_manager::{
    WindowsProcessHandle, WindowsProcessManager, WindowsSignalListener,
};

/// Windows-specific process manager factory
pub struct WindowsProcessManagerFactory;

#[cfg(windows)]
impl consul_lock_core::ProcessManagerFactory for WindowsProcessManagerFactory {
    type Manager = WindowsProcessManager;

    fn create_process_manager() -> WindowsProcessManager {
        WindowsProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
