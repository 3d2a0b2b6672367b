//! Windows-specific process launching implementation

mod windows_process_launcher;

pub use windows_process_launcher::WindowsProcessLauncher;

#[cfg(windows)]
pub use windows_process_launcher::WindowsProcessHandle;

/// Windows-specific launcher factory
pub struct WindowsProcessLauncherFactory;

impl WindowsProcessLauncherFactory {
    pub fn create_launcher() -> WindowsProcessLauncher {
        WindowsProcessLauncher::new()
    }

    pub fn platform_name() -> &'static str {
        "Windows"
    }
}
