//! Browser process lifecycle management
//!
//! Spawns the browser in its own process group with an isolated profile and
//! guarantees that the whole group is terminated and the profile cleaned up
//! exactly once, whatever happens to the capture in between.

use crate::profile::ProfileDirectory;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid as SysPid, Process, ProcessesToUpdate, Signal, System};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Pause after spawn before the DevTools endpoint is polled.
pub const SPAWN_SETTLE: Duration = Duration::from_millis(500);

/// Pause between the graceful and the forceful termination signal.
pub const KILL_COOLDOWN: Duration = Duration::from_millis(500);

const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Terminates a process together with everything it started
#[cfg_attr(test, mockall::automock)]
pub trait ProcessTree: Send + Sync {
    /// Ask the tree rooted at `pid` to exit.
    fn terminate(&self, pid: u32) -> io::Result<()>;

    /// Force the tree rooted at `pid` to exit. Succeeds if it is already gone.
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// Signals the whole POSIX process group led by the browser
///
/// The browser is spawned with `process_group(0)`, so its group id equals its
/// pid and helper processes inherit the group.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixProcessGroup;

#[cfg(unix)]
impl PosixProcessGroup {
    fn signal(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let pgid = i32::try_from(pid).map_err(io::Error::other)?;
        killpg(Pid::from_raw(pgid), signal)?;
        Ok(())
    }
}

#[cfg(unix)]
impl ProcessTree for PosixProcessGroup {
    fn terminate(&self, pid: u32) -> io::Result<()> {
        Self::signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        match Self::signal(pid, nix::sys::signal::Signal::SIGKILL) {
            Err(e) if e.raw_os_error() == Some(nix::libc::ESRCH) => Ok(()),
            other => other,
        }
    }
}

/// Walks the process table for descendants and signals each of them
///
/// For platforms without process groups. The table comes from `sysinfo`, so
/// the walk works wherever `sysinfo` can list processes. Where a graceful
/// signal is not supported (Windows) the tree is killed outright.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChildEnumeration;

impl ChildEnumeration {
    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }

    /// Descendants of `root`, deepest first.
    pub fn descendants(root: u32) -> Vec<u32> {
        descendants_in(process_table(&Self::snapshot()), root)
    }

    fn signal_tree(pid: u32, signal: Signal) -> io::Result<()> {
        let system = Self::snapshot();
        let Some(root) = system.process(SysPid::from_u32(pid)) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no process with pid {pid}"),
            ));
        };

        for child in descendants_in(process_table(&system), pid) {
            if let Some(process) = system.process(SysPid::from_u32(child)) {
                send_signal(process, signal);
            }
        }

        if send_signal(root, signal) {
            Ok(())
        } else {
            Err(io::Error::other(format!("failed to signal pid {pid}")))
        }
    }
}

impl ProcessTree for ChildEnumeration {
    fn terminate(&self, pid: u32) -> io::Result<()> {
        Self::signal_tree(pid, Signal::Term)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        match Self::signal_tree(pid, Signal::Kill) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn process_table(system: &System) -> impl Iterator<Item = (u32, Option<u32>)> + '_ {
    system
        .processes()
        .iter()
        .map(|(pid, process)| (pid.as_u32(), process.parent().map(|parent| parent.as_u32())))
}

fn send_signal(process: &Process, signal: Signal) -> bool {
    process.kill_with(signal).unwrap_or_else(|| process.kill())
}

/// Pids below `root` in a `(pid, parent)` table, breadth first and then
/// reversed so the deepest processes come first.
fn descendants_in<I>(table: I, root: u32) -> Vec<u32>
where
    I: IntoIterator<Item = (u32, Option<u32>)>,
{
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, parent) in table {
        if let Some(parent) = parent {
            children.entry(parent).or_default().push(pid);
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        for &child in children.get(&parent).into_iter().flatten() {
            if child != root && !found.contains(&child) {
                found.push(child);
                queue.push_back(child);
            }
        }
    }

    found.reverse();
    found
}

/// The tree termination strategy for the current platform.
pub fn default_process_tree() -> Box<dyn ProcessTree> {
    #[cfg(unix)]
    {
        Box::new(PosixProcessGroup)
    }

    #[cfg(not(unix))]
    {
        Box::new(ChildEnumeration)
    }
}

/// One browser process and the profile directory it runs with
///
/// Created before the process is spawned so that teardown also covers launch
/// failures. [`BrowserProcess::kill_and_cleanup`] consumes the handle; if the
/// handle is dropped without it (for example when the capture future is
/// dropped mid-flight, or when teardown itself is abandoned half way) `Drop`
/// finishes whatever is left: the forceful kill if it was not sent yet, and
/// the profile removal.
pub struct BrowserProcess {
    child: Option<Child>,
    pid: Option<u32>,
    profile: ProfileDirectory,
    tree: Box<dyn ProcessTree>,
    profile_removed: bool,
}

impl BrowserProcess {
    pub fn new(profile: ProfileDirectory) -> Self {
        Self::with_tree(profile, default_process_tree())
    }

    pub fn with_tree(profile: ProfileDirectory, tree: Box<dyn ProcessTree>) -> Self {
        Self {
            child: None,
            pid: None,
            profile,
            tree,
            profile_removed: false,
        }
    }

    pub fn profile_dir(&self) -> &Path {
        self.profile.path()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Spawn `program` with `args`, output discarded, in a new process group.
    ///
    /// On Linux the child also receives SIGKILL if this process dies.
    pub fn start<I, S>(&mut self, program: &Path, args: I) -> io::Result<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if self.child.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "browser process already started",
            ));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        // SAFETY: the closure runs in the forked child before exec and only
        // issues the prctl(2) syscall. It does not allocate or take locks, so
        // it is async-signal-safe.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)
                    .map_err(io::Error::from)
            });
        }

        let child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned process has no pid"))?;

        info!(pid, program = %program.display(), "Browser process started");
        self.child = Some(child);
        self.pid = Some(pid);
        Ok(pid)
    }

    /// Terminate the process tree and remove a random profile directory.
    ///
    /// Sends the graceful signal, waits [`KILL_COOLDOWN`], then always sends
    /// the forceful one. Errors are logged and swallowed: teardown must finish
    /// even when the capture left things in a bad state.
    pub async fn kill_and_cleanup(mut self) {
        if let Some(pid) = self.pid {
            match self.tree.terminate(pid) {
                Ok(()) => tokio::time::sleep(KILL_COOLDOWN).await,
                Err(e) => debug!(pid, error = %e, "Graceful termination failed"),
            }

            if let Err(e) = self.tree.kill(pid) {
                debug!(pid, error = %e, "Forceful termination failed");
            }
            self.pid = None;

            if let Some(mut child) = self.child.take() {
                match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
                    Ok(Ok(status)) => debug!(pid, %status, "Browser process exited"),
                    Ok(Err(e)) => debug!(pid, error = %e, "Failed to reap browser process"),
                    Err(_) => warn!(pid, "Browser process did not exit after SIGKILL"),
                }
            }
        }

        self.remove_profile();
    }

    fn remove_profile(&mut self) {
        if !self.profile_removed {
            self.profile_removed = true;
            self.profile.remove();
        }
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        // pid is cleared once the forceful signal went out
        if let Some(pid) = self.pid.take() {
            warn!(pid, "Browser process teardown did not finish, killing");
            let _ = self.tree.kill(pid);
        }
        self.remove_profile();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileDir;
    use mockall::predicate::eq;

    fn random_profile() -> ProfileDirectory {
        ProfileDirectory::resolve(&ProfileDir::Random).unwrap()
    }

    #[test]
    fn test_descendants_deepest_first() {
        // 1 -> 10 -> 100 -> 1000, 1 -> 11, 2 -> 20 (unrelated)
        let table = [
            (1, None),
            (10, Some(1)),
            (11, Some(1)),
            (100, Some(10)),
            (1000, Some(100)),
            (2, None),
            (20, Some(2)),
        ];

        let found = descendants_in(table, 1);
        assert_eq!(found, vec![1000, 100, 11, 10]);
        assert!(descendants_in(table, 20).is_empty());
        assert!(descendants_in(table, 999).is_empty());
    }

    #[test]
    fn test_descendants_ignore_parent_cycles() {
        let table = [(1, Some(2)), (2, Some(1))];
        assert_eq!(descendants_in(table, 1), vec![2]);
    }

    #[tokio::test]
    async fn test_teardown_without_process() {
        let mut tree = MockProcessTree::new();
        tree.expect_terminate().times(0);
        tree.expect_kill().times(0);

        let profile = random_profile();
        let path = profile.path().to_path_buf();
        let process = BrowserProcess::with_tree(profile, Box::new(tree));

        process.kill_and_cleanup().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_spawn_still_cleans_profile() {
        let profile = random_profile();
        let path = profile.path().to_path_buf();
        let mut process = BrowserProcess::new(profile);

        let err = process
            .start(Path::new("/nonexistent/browser-binary"), ["--headless"])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(process.pid().is_none());

        process.kill_and_cleanup().await;
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_teardown_signals_exactly_once() {
        let profile = random_profile();
        let mut process = BrowserProcess::new(profile);
        let pid = process.start(Path::new("sleep"), ["30"]).unwrap();

        let mut tree = MockProcessTree::new();
        tree.expect_terminate()
            .with(eq(pid))
            .times(1)
            .returning(|pid| PosixProcessGroup.terminate(pid));
        tree.expect_kill()
            .with(eq(pid))
            .times(1)
            .returning(|pid| PosixProcessGroup.kill(pid));
        process.tree = Box::new(tree);

        process.kill_and_cleanup().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_process_left_in_group() {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let profile = random_profile();
        let path = profile.path().to_path_buf();
        let mut process = BrowserProcess::new(profile);
        let pid = process.start(Path::new("sleep"), ["30"]).unwrap();

        assert!(killpg(Pid::from_raw(pid as i32), None).is_ok());

        process.kill_and_cleanup().await;

        assert!(killpg(Pid::from_raw(pid as i32), None).is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_without_teardown_cleans_profile() {
        let mut tree = MockProcessTree::new();
        tree.expect_terminate().times(0);
        tree.expect_kill().times(0);

        let profile = random_profile();
        let path = profile.path().to_path_buf();
        let process = BrowserProcess::with_tree(profile, Box::new(tree));

        drop(process);
        assert!(!path.exists());
    }

    /// Starts a shell that ignores SIGTERM and forks a child that inherits
    /// the ignored disposition. Returns the shell pid and its child pids.
    #[cfg(unix)]
    async fn start_stubborn_tree(process: &mut BrowserProcess) -> (u32, Vec<u32>) {
        let pid = process
            .start(Path::new("sh"), ["-c", "trap '' TERM; sleep 30; exit 0"])
            .unwrap();

        let mut children = Vec::new();
        for _ in 0..40 {
            children = ChildEnumeration::descendants(pid);
            if !children.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!children.is_empty(), "shell never forked");
        (pid, children)
    }

    #[cfg(unix)]
    fn is_running(pid: u32) -> bool {
        use sysinfo::ProcessStatus;

        let mut system = System::new();
        let pid = SysPid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .is_some_and(|process| process.status() != ProcessStatus::Zombie)
    }

    #[cfg(unix)]
    async fn wait_until_gone(mut pids: Vec<u32>) -> Vec<u32> {
        for _ in 0..40 {
            pids.retain(|&pid| is_running(pid));
            if pids.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        pids
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_teardown_still_kills_group() {
        let profile = random_profile();
        let path = profile.path().to_path_buf();
        let mut process = BrowserProcess::new(profile);
        let (_, children) = start_stubborn_tree(&mut process).await;

        // give up inside the cooldown, after SIGTERM was ignored
        let teardown =
            tokio::time::timeout(Duration::from_millis(100), process.kill_and_cleanup()).await;
        assert!(teardown.is_err());

        assert!(!path.exists());
        let alive = wait_until_gone(children).await;
        assert!(alive.is_empty(), "still running: {alive:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_enumeration_kills_whole_tree() {
        let profile = random_profile();
        let mut process =
            BrowserProcess::with_tree(profile, Box::new(ChildEnumeration));
        let (pid, children) = start_stubborn_tree(&mut process).await;

        process.kill_and_cleanup().await;

        let alive = wait_until_gone(children).await;
        assert!(alive.is_empty(), "still running: {alive:?}");
        assert!(ChildEnumeration.kill(pid).is_ok());
    }
}
