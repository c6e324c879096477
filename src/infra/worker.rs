use std::io;
use std::thread::{self, JoinHandle};

/// Niceness applied to background parsing and search threads.
const BACKGROUND_NICE: i32 = 10;

/// Spawns a named thread for heavy file work at reduced scheduling priority.
pub fn spawn_background<F, T>(name: &str, work: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            lower_current_thread_priority();
            work()
        })
}

/// Linux schedules threads individually, so this only affects the calling thread there.
/// Elsewhere `setpriority` would renice the whole process, so it is left alone.
#[cfg(target_os = "linux")]
pub fn lower_current_thread_priority() {
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, BACKGROUND_NICE) };
    if result != 0 {
        tracing::debug!(
            error = %io::Error::last_os_error(),
            "failed to lower worker priority"
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn lower_current_thread_priority() {
    let _ = BACKGROUND_NICE;
}
