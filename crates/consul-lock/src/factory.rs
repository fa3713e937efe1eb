use consul_lock_core::ProcessManagerFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = consul_lock_unix::UnixProcessManager;

    #[cfg(windows)]
    type Manager = consul_lock_windows::WindowsProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return consul_lock_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return consul_lock_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return consul_lock_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return consul_lock_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// The process manager for the platform this build targets
pub type PlatformProcessManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;
