//! # Execution Gate
//!
//! Remembers which task bodies already ran during this run, so that
//! `once-per-host` and `once-globally` tasks are not repeated no matter how
//! often (or from how many workers) they are invoked.

use crate::models::OncePolicy;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct GateRecords {
    per_host: HashSet<(String, String)>,
    global: HashSet<String>,
}

/// Outcome of passing a body through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gated<T> {
    Ran(T),
    Skipped,
}

#[derive(Debug, Default)]
pub struct ExecutionGate {
    records: Mutex<GateRecords>,
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_run(&self, task_id: &str, host_id: &str, policy: OncePolicy) -> bool {
        let records = self.records.lock().expect("Mutex should not be poisoned");
        match policy {
            OncePolicy::None => true,
            OncePolicy::OncePerHost => !records
                .per_host
                .contains(&(task_id.to_string(), host_id.to_string())),
            OncePolicy::OnceGlobally => !records.global.contains(task_id),
        }
    }

    pub fn mark_ran(&self, task_id: &str, host_id: &str, policy: OncePolicy) {
        let mut records = self.records.lock().expect("Mutex should not be poisoned");
        Self::record(&mut records, task_id, host_id, policy);
    }

    /// Check-and-record in one critical section. Returns true if the caller
    /// won the right to run the body.
    fn claim(&self, task_id: &str, host_id: &str, policy: OncePolicy) -> bool {
        let mut records = self.records.lock().expect("Mutex should not be poisoned");
        Self::record(&mut records, task_id, host_id, policy)
    }

    fn record(records: &mut GateRecords, task_id: &str, host_id: &str, policy: OncePolicy) -> bool {
        match policy {
            OncePolicy::None => true,
            OncePolicy::OncePerHost => records
                .per_host
                .insert((task_id.to_string(), host_id.to_string())),
            OncePolicy::OnceGlobally => records.global.insert(task_id.to_string()),
        }
    }

    /// Runs `body` unless the policy says this task (or task/host pair)
    /// already ran. The pair is recorded before the body starts, so a
    /// concurrent caller for the same pair is turned away even while the
    /// first one is still running.
    pub fn run_once<T, E>(
        &self,
        task_id: &str,
        host_id: &str,
        policy: OncePolicy,
        body: impl FnOnce() -> Result<T, E>,
    ) -> Result<Gated<T>, E> {
        if !self.claim(task_id, host_id, policy) {
            log::trace!("Gate denied '{}' on {} ({})", task_id, host_id, policy);
            return Ok(Gated::Skipped);
        }
        log::trace!("Gate passed '{}' on {} ({})", task_id, host_id, policy);
        body().map(Gated::Ran)
    }

    /// Number of recorded (task, host) pairs and global task ids.
    pub fn recorded(&self) -> (usize, usize) {
        let records = self.records.lock().expect("Mutex should not be poisoned");
        (records.per_host.len(), records.global.len())
    }

    pub fn has_run_on(&self, task_id: &str, host_id: &str) -> bool {
        let records = self.records.lock().expect("Mutex should not be poisoned");
        records
            .per_host
            .contains(&(task_id.to_string(), host_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn count_runs(gate: &ExecutionGate, task: &str, host: &str, policy: OncePolicy, n: usize) -> usize {
        let mut runs = 0;
        for _ in 0..n {
            let out: Result<_, ()> = gate.run_once(task, host, policy, || {
                runs += 1;
                Ok(())
            });
            out.unwrap();
        }
        runs
    }

    #[test]
    fn test_policy_none_always_runs() {
        let gate = ExecutionGate::new();
        assert_eq!(count_runs(&gate, "runcmd", "a1", OncePolicy::None, 3), 3);
        assert_eq!(gate.recorded(), (0, 0));
    }

    #[test]
    fn test_once_globally_runs_once_across_hosts() {
        let gate = ExecutionGate::new();
        assert_eq!(count_runs(&gate, "create_db", "a1", OncePolicy::OnceGlobally, 2), 1);
        assert_eq!(count_runs(&gate, "create_db", "a2", OncePolicy::OnceGlobally, 2), 0);
        assert_eq!(gate.recorded(), (0, 1));
    }

    #[test]
    fn test_once_per_host_runs_once_per_host() {
        let gate = ExecutionGate::new();
        assert_eq!(count_runs(&gate, "setup_hostname", "a2", OncePolicy::OncePerHost, 2), 1);
        assert_eq!(count_runs(&gate, "setup_hostname", "a1", OncePolicy::OncePerHost, 2), 1);
        assert_eq!(count_runs(&gate, "setup_hostname", "a2", OncePolicy::OncePerHost, 1), 0);
        assert!(gate.has_run_on("setup_hostname", "a1"));
        assert_eq!(gate.recorded(), (2, 0));
    }

    #[test]
    fn test_should_run_and_mark_ran() {
        let gate = ExecutionGate::new();
        assert!(gate.should_run("reboot", "a1", OncePolicy::OncePerHost));
        gate.mark_ran("reboot", "a1", OncePolicy::OncePerHost);
        assert!(!gate.should_run("reboot", "a1", OncePolicy::OncePerHost));
        assert!(gate.should_run("reboot", "a2", OncePolicy::OncePerHost));
    }

    #[test]
    fn test_skipped_body_is_not_called() {
        let gate = ExecutionGate::new();
        gate.mark_ran("deploy_solo", "a1", OncePolicy::OnceGlobally);
        let out: Result<Gated<u8>, ()> =
            gate.run_once("deploy_solo", "a2", OncePolicy::OnceGlobally, || panic!("must not run"));
        assert_eq!(out, Ok(Gated::Skipped));
    }

    #[test]
    fn test_concurrent_workers_pass_gate_once() {
        let gate = Arc::new(ExecutionGate::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    let _: Result<_, ()> = gate.run_once("deploy_solo", "a1", OncePolicy::OnceGlobally, || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        Ok(())
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
