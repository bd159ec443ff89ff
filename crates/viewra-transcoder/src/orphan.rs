//! Orphan encoder process detection
//!
//! Encoder processes are recognised by their command line: an argument that
//! is a path under the transcoding root whose first directory component
//! follows the `{container}_{provider}_{id}` naming scheme. Any such
//! process whose pid is not in the active set has lost its session and is
//! killed.

use crate::command::parse_session_dir_name;
use std::collections::HashSet;
use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, Signal, System};
use tracing::warn;

/// Whether a process with the given pid is currently alive
pub fn process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid));
    system.process(Pid::from_u32(pid)).is_some()
}

/// Send SIGKILL to a process
pub fn kill_process(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid));
    system
        .process(Pid::from_u32(pid))
        .map(|p| p.kill())
        .unwrap_or(false)
}

/// Send a graceful interrupt (SIGTERM) to a process
pub fn terminate_process(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid));
    system
        .process(Pid::from_u32(pid))
        .and_then(|p| p.kill_with(Signal::Term))
        .unwrap_or(false)
}

/// If `arg` is a session artefact path under `root`, return the session id
pub fn session_id_from_artifact(root: &Path, arg: &str) -> Option<String> {
    let path = Path::new(arg);
    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    let dir_name = first.as_os_str().to_str()?;
    let (_, _, id) = parse_session_dir_name(dir_name)?;
    Some(id)
}

/// Scan the process table for encoder processes under `root` whose pid is
/// not in the active set
pub fn find_orphan_pids(root: &Path, active_pids: &HashSet<u32>) -> Vec<u32> {
    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new().with_cmd(sysinfo::UpdateKind::Always)),
    );

    let mut orphans = Vec::new();
    for (pid, process) in system.processes() {
        let pid = pid.as_u32();
        if active_pids.contains(&pid) {
            continue;
        }
        let is_ours = process
            .cmd()
            .iter()
            .any(|arg| session_id_from_artifact(root, arg).is_some());
        if is_ours {
            orphans.push(pid);
        }
    }
    orphans
}

/// Kill every orphaned encoder process; returns the number killed
pub fn sweep(root: &Path, active_pids: &HashSet<u32>) -> usize {
    let orphans = find_orphan_pids(root, active_pids);
    let mut killed = 0;
    for pid in orphans {
        warn!(pid, "killing orphaned encoder process");
        if kill_process(pid) {
            killed += 1;
        }
    }
    killed
}
