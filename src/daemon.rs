use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clipboard::ClipboardMonitor;
use crate::config::AppPaths;
use crate::engine::Engine;
use crate::errors::{ClipError, Result};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    fs::write(path, pid.to_string()).map_err(|e| ClipError::Daemon(e.to_string()))
}

pub fn read_pid_file(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ClipError::Daemon(e.to_string())),
    }
}

pub fn remove_pid_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ClipError::Daemon(e.to_string())),
    }
}

// kill() treats 0 and negative pids as process groups.
fn signal_target(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|&pid| pid > 0)
}

pub fn is_process_running(pid: u32) -> bool {
    let Some(target) = signal_target(pid) else {
        return false;
    };
    if unsafe { libc::kill(target, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Pid of a live process, other than this one, that owns the history.
/// Stale or invalid pid files are cleaned up.
pub fn other_owner(paths: &AppPaths) -> Result<Option<u32>> {
    match read_pid_file(&paths.pid_file)? {
        Some(pid) if pid == std::process::id() => Ok(None),
        Some(pid) if is_process_running(pid) => Ok(Some(pid)),
        Some(_) => {
            remove_pid_file(&paths.pid_file)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

pub fn ensure_no_other_owner(paths: &AppPaths) -> Result<()> {
    match other_owner(paths)? {
        Some(pid) => Err(ClipError::Daemon(format!(
            "history is owned by process {pid}; run `clipstack daemon stop` first"
        ))),
        None => Ok(()),
    }
}

pub struct OwnerGuard {
    pid_file: std::path::PathBuf,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_pid_file(&self.pid_file) {
            warn!(error = %e, "failed to remove pid file");
        }
    }
}

pub fn claim_owner(paths: &AppPaths) -> Result<OwnerGuard> {
    fs::create_dir_all(&paths.base_dir).map_err(|e| ClipError::Daemon(e.to_string()))?;
    ensure_no_other_owner(paths)?;
    write_pid_file(&paths.pid_file)?;
    Ok(OwnerGuard {
        pid_file: paths.pid_file.clone(),
    })
}

pub fn stop_daemon(paths: &AppPaths) -> Result<bool> {
    match read_pid_file(&paths.pid_file)? {
        Some(pid) if is_process_running(pid) => {
            if let Some(target) = signal_target(pid) {
                unsafe {
                    libc::kill(target, libc::SIGTERM);
                }
            }
            Ok(true)
        }
        Some(_) => {
            remove_pid_file(&paths.pid_file)?;
            Ok(false)
        }
        None => Ok(false),
    }
}

pub fn daemon_status(paths: &AppPaths) -> Result<Option<u32>> {
    match read_pid_file(&paths.pid_file)? {
        Some(pid) if is_process_running(pid) => Ok(Some(pid)),
        Some(_) => {
            remove_pid_file(&paths.pid_file)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

pub fn start_daemon(paths: &AppPaths) -> Result<u32> {
    let exe = std::env::current_exe().map_err(|e| ClipError::Daemon(e.to_string()))?;
    fs::create_dir_all(&paths.base_dir).map_err(|e| ClipError::Daemon(e.to_string()))?;
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_file)
        .map_err(|e| ClipError::Daemon(e.to_string()))?;

    let child = Command::new(exe)
        .args(["daemon", "run"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log_file))
        .spawn()
        .map_err(|e| ClipError::Daemon(e.to_string()))?;

    Ok(child.id())
}

pub fn run_watcher(paths: &AppPaths) -> Result<()> {
    let _owner = claim_owner(paths)?;
    let mut engine = Engine::open(paths)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::Relaxed)) {
        warn!(error = %e, "could not install signal handler");
    }

    info!(pid = std::process::id(), "watching clipboard");

    let mut monitor = ClipboardMonitor::from_current();
    while running.load(Ordering::Relaxed) {
        poll_once(&mut monitor, &mut engine);
        thread::sleep(POLL_INTERVAL);
    }

    info!("shutting down");
    engine.flush();
    Ok(())
}

pub fn poll_once(monitor: &mut ClipboardMonitor, engine: &mut Engine) -> bool {
    match monitor.poll() {
        Ok(Some(content)) => {
            let id = engine.capture(content);
            debug!(%id, "captured clipboard change");
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!(error = %e, "clipboard poll failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("test.pid");
        write_pid_file(&pid_path).unwrap();
        let pid = read_pid_file(&pid_path).unwrap();
        assert_eq!(pid, Some(std::process::id()));
    }

    #[test]
    fn test_read_missing_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid = read_pid_file(&dir.path().join("nonexistent.pid")).unwrap();
        assert!(pid.is_none());
    }

    #[test]
    fn test_read_garbage_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("garbage.pid");
        fs::write(&pid_path, "not a pid").unwrap();
        assert_eq!(read_pid_file(&pid_path).unwrap(), None);
    }

    #[test]
    fn test_remove_missing_pid_file_ok() {
        let dir = TempDir::new().unwrap();
        assert!(remove_pid_file(&dir.path().join("nonexistent.pid")).is_ok());
    }

    #[test]
    fn test_is_process_running_self() {
        assert!(is_process_running(std::process::id()));
    }

    #[test]
    fn test_is_process_running_invalid() {
        assert!(!is_process_running(99999));
    }

    #[test]
    fn test_out_of_range_pids_are_not_running() {
        assert!(!is_process_running(0));
        assert!(!is_process_running(u32::MAX));
        assert!(!is_process_running(i32::MAX as u32 + 1));
    }

    #[test]
    fn test_zero_pid_file_is_stale() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        fs::write(&paths.pid_file, "0").unwrap();
        assert_eq!(other_owner(&paths).unwrap(), None);
        assert!(!paths.pid_file.exists());
        fs::write(&paths.pid_file, "0").unwrap();
        assert!(claim_owner(&paths).is_ok());
    }

    #[test]
    fn test_stop_with_overflowing_pid_signals_nothing() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        fs::write(&paths.pid_file, "4294967295").unwrap();
        assert!(!stop_daemon(&paths).unwrap());
        assert!(!paths.pid_file.exists());
        assert!(daemon_status(&paths).unwrap().is_none());
    }

    #[test]
    fn test_daemon_status_stale_pid() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        fs::write(&paths.pid_file, "99999").unwrap();
        assert!(daemon_status(&paths).unwrap().is_none());
        assert!(!paths.pid_file.exists());
    }

    #[test]
    fn test_claim_owner_writes_and_releases_pid() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().join("data"));
        {
            let _guard = claim_owner(&paths).unwrap();
            assert_eq!(read_pid_file(&paths.pid_file).unwrap(), Some(std::process::id()));
            // Our own pid never counts as another owner.
            assert!(ensure_no_other_owner(&paths).is_ok());
        }
        assert!(!paths.pid_file.exists());
    }

    #[test]
    fn test_claim_replaces_stale_owner() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        fs::write(&paths.pid_file, "99999").unwrap();
        let _guard = claim_owner(&paths).unwrap();
        assert_eq!(read_pid_file(&paths.pid_file).unwrap(), Some(std::process::id()));
    }

    #[test]
    fn test_live_other_owner_is_refused() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        // pid 1 is always alive on unix.
        fs::write(&paths.pid_file, "1").unwrap();
        assert_eq!(other_owner(&paths).unwrap(), Some(1));
        assert!(matches!(claim_owner(&paths), Err(ClipError::Daemon(_))));
        assert!(paths.pid_file.exists());
    }
}
