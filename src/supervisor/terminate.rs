//! Process termination strategies.
//!
//! Each strategy sends SIGTERM, waits at most the grace period, then
//! sends SIGKILL to whatever is left. Missing processes are not errors.
//! Discovery of descendants and port holders goes through `procfs` and
//! finds nothing outside Linux.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Poll interval while waiting for processes to disappear.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[cfg(unix)]
mod signal {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;
    use tracing::debug;

    fn to_pid(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    pub fn term_group(pgid: u32) {
        send_group(pgid, Signal::SIGTERM);
    }

    pub fn kill_group(pgid: u32) {
        send_group(pgid, Signal::SIGKILL);
    }

    pub fn term(pid: u32) {
        send(pid, Signal::SIGTERM);
    }

    pub fn kill_now(pid: u32) {
        send(pid, Signal::SIGKILL);
    }

    pub fn alive(pid: u32) -> bool {
        to_pid(pid).is_some_and(|p| kill(p, None).is_ok())
    }

    fn send_group(pgid: u32, sig: Signal) {
        if let Some(p) = to_pid(pgid) {
            match killpg(p, sig) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => debug!(pgid, ?sig, %err, "killpg failed"),
            }
        }
    }

    fn send(pid: u32, sig: Signal) {
        if let Some(p) = to_pid(pid) {
            match kill(p, sig) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => debug!(pid, ?sig, %err, "kill failed"),
            }
        }
    }
}

#[cfg(not(unix))]
mod signal {
    pub fn term_group(_pgid: u32) {}
    pub fn kill_group(_pgid: u32) {}
    pub fn term(_pid: u32) {}
    pub fn kill_now(_pid: u32) {}
    pub fn alive(_pid: u32) -> bool {
        false
    }
}

/// Terminate a process group whose leader we spawned.
///
/// `exited` flips to `Some` once the leader has been reaped, which ends
/// the grace wait early. The group is sent SIGKILL afterwards regardless,
/// to catch members that ignored SIGTERM.
pub async fn terminate_group<T>(pgid: u32, grace: Duration, exited: &mut watch::Receiver<Option<T>>) {
    signal::term_group(pgid);
    let in_grace = timeout(grace, exited.wait_for(Option::is_some))
        .await
        .is_ok_and(|r| r.is_ok());
    debug!(pgid, in_grace, "group terminated");
    signal::kill_group(pgid);
}

/// Terminate `pid` and every descendant, children first.
pub async fn terminate_tree(pid: u32, grace: Duration) {
    let mut victims = descendants(pid);
    victims.push(pid);
    terminate_all(&victims, grace).await;
}

/// Terminate every process listening on TCP `port`, with descendants.
/// Returns the number of listeners found.
pub async fn terminate_port_holders(port: u16, grace: Duration) -> usize {
    let me = std::process::id();
    let holders: Vec<u32> = tokio::task::spawn_blocking(move || port_holders(port))
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|pid| *pid != me)
        .collect();

    let mut victims = Vec::new();
    for pid in &holders {
        victims.extend(descendants(*pid));
        victims.push(*pid);
    }
    terminate_all(&victims, grace).await;
    holders.len()
}

async fn terminate_all(pids: &[u32], grace: Duration) {
    if pids.is_empty() {
        return;
    }
    for pid in pids {
        signal::term(*pid);
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline && pids.iter().any(|pid| signal::alive(*pid)) {
        sleep(POLL_INTERVAL).await;
    }

    for pid in pids.iter().filter(|pid| signal::alive(**pid)) {
        debug!(pid, "escalating to SIGKILL");
        signal::kill_now(*pid);
    }
}

/// Every descendant of `root` in a parent → children map, deepest first.
#[must_use]
pub fn descendants_in(children: &HashMap<u32, Vec<u32>>, root: u32) -> Vec<u32> {
    let mut order = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for child in children.get(&parent).into_iter().flatten() {
            if seen.insert(*child) {
                order.push(*child);
                frontier.push(*child);
            }
        }
    }
    order.reverse();
    order
}

fn descendants(root: u32) -> Vec<u32> {
    descendants_in(&procs::children_by_parent(), root)
}

fn port_holders(port: u16) -> Vec<u32> {
    procs::listeners_on(port)
}

#[cfg(target_os = "linux")]
mod procs {
    use std::collections::{HashMap, HashSet};

    use procfs::net::TcpState;
    use procfs::process::{all_processes, FDTarget, Process};

    fn live_processes() -> Vec<Process> {
        all_processes()
            .map(|processes| processes.flatten().collect())
            .unwrap_or_default()
    }

    pub fn children_by_parent() -> HashMap<u32, Vec<u32>> {
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for process in live_processes() {
            let Ok(stat) = process.stat() else { continue };
            if let (Ok(pid), Ok(ppid)) = (u32::try_from(stat.pid), u32::try_from(stat.ppid)) {
                children.entry(ppid).or_default().push(pid);
            }
        }
        children
    }

    pub fn listeners_on(port: u16) -> Vec<u32> {
        let inodes: HashSet<u64> = procfs::net::tcp()
            .into_iter()
            .chain(procfs::net::tcp6())
            .flatten()
            .filter(|entry| matches!(entry.state, TcpState::Listen) && entry.local_address.port() == port)
            .map(|entry| entry.inode)
            .filter(|inode| *inode != 0)
            .collect();
        if inodes.is_empty() {
            return Vec::new();
        }

        live_processes()
            .into_iter()
            .filter(|process| {
                process.fd().is_ok_and(|fds| {
                    fds.flatten().any(|fd| {
                        matches!(fd.target, FDTarget::Socket(inode) if inodes.contains(&inode))
                    })
                })
            })
            .filter_map(|process| u32::try_from(process.pid()).ok())
            .collect()
    }
}

#[cfg(not(target_os = "linux"))]
mod procs {
    use std::collections::HashMap;

    pub fn children_by_parent() -> HashMap<u32, Vec<u32>> {
        HashMap::new()
    }

    pub fn listeners_on(_port: u16) -> Vec<u32> {
        Vec::new()
    }
}
