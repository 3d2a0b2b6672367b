//! Unix process launching for procpipe sessions

mod unix_process_launcher;

pub use unix_process_launcher::UnixProcessLauncher;

#[cfg(unix)]
pub use unix_process_launcher::UnixProcessHandle;

pub struct UnixProcessLauncherFactory;

impl UnixProcessLauncherFactory {
    pub fn create_launcher() -> UnixProcessLauncher {
        UnixProcessLauncher::new()
    }

    pub fn platform_name() -> &'static str {
        "Unix"
    }
}
