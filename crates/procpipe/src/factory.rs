use procpipe_core::ProcessLauncher;
use std::sync::Arc;

/// Platform-independent factory that selects the appropriate launcher at compile time
pub struct PlatformLauncherFactory;

impl PlatformLauncherFactory {
    pub fn create_launcher() -> Arc<dyn ProcessLauncher> {
        #[cfg(unix)]
        return Arc::new(procpipe_unix::UnixProcessLauncherFactory::create_launcher());

        #[cfg(windows)]
        return Arc::new(procpipe_windows::WindowsProcessLauncherFactory::create_launcher());
    }

    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        return procpipe_unix::UnixProcessLauncherFactory::platform_name();

        #[cfg(windows)]
        return procpipe_windows::WindowsProcessLauncherFactory::platform_name();
    }
}
