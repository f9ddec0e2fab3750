use std::process::ExitStatus;

/// Offset added to a signal number to form an exit code, as shells do
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// Exit code of a finished process
///
/// A normal exit yields its status code unchanged. A process killed by a
/// signal yields `128 + signal`, so SIGKILL becomes 137.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SIGNAL_EXIT_BASE + signal;
        }
    }

    1
}
