use std::collections::BTreeMap;
use std::panic;
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::config::traversal::MAX_HOPS;
use crate::error::Result;
use crate::hook::{HookKind, SignatureSet};
use crate::memory::LayoutSet;
use crate::process::{ProcessCandidate, ProcessEnumerator, ProcessProvider};
use crate::session::{DetachReport, Session};

/// Registry of attached clients, keyed by pid.
///
/// Sessions share nothing but the read-only layouts; the manager is the only
/// place that sees more than one of them.
pub struct SessionManager<Pv: ProcessProvider> {
    provider: Pv,
    signatures: SignatureSet,
    layouts: Arc<LayoutSet>,
    max_hops: usize,
    sessions: BTreeMap<u32, Session<Pv::Process>>,
}

impl<Pv: ProcessProvider> SessionManager<Pv> {
    pub fn new(provider: Pv, signatures: SignatureSet, layouts: Arc<LayoutSet>) -> Self {
        Self {
            provider,
            signatures,
            layouts,
            max_hops: MAX_HOPS,
            sessions: BTreeMap::new(),
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn provider(&self) -> &Pv {
        &self.provider
    }

    /// Open and attach one candidate. Already attached pids are left alone.
    pub fn attach(&mut self, candidate: &ProcessCandidate) -> Result<u32> {
        if self.sessions.contains_key(&candidate.pid) {
            return Ok(candidate.pid);
        }
        let process = self.provider.open_process(candidate)?;
        let session = Session::attach(
            Arc::new(process),
            self.signatures.clone(),
            Arc::clone(&self.layouts),
        )?
        .with_max_hops(self.max_hops);
        self.sessions.insert(candidate.pid, session);
        Ok(candidate.pid)
    }

    /// Attach every candidate that is not attached yet, skipping those that
    /// fail to open. Returns the newly attached pids.
    pub fn attach_new(&mut self, enumerator: &dyn ProcessEnumerator) -> Result<Vec<u32>> {
        let mut attached = Vec::new();
        for candidate in enumerator.candidates()? {
            if self.sessions.contains_key(&candidate.pid) {
                continue;
            }
            match self.attach(&candidate) {
                Ok(pid) => attached.push(pid),
                Err(e) => warn!("Skipping {} (PID: {}): {}", candidate.name, candidate.pid, e),
            }
        }
        Ok(attached)
    }

    /// Detach and drop every session whose process has exited.
    pub fn remove_dead(&mut self) -> Vec<u32> {
        let dead: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, session)| !session.is_alive())
            .map(|(&pid, _)| pid)
            .collect();
        for pid in &dead {
            if let Some(session) = self.sessions.remove(pid) {
                info!("Client (PID: {}) exited", pid);
                session.detach();
            }
        }
        dead
    }

    pub fn get(&self, pid: u32) -> Option<&Session<Pv::Process>> {
        self.sessions.get(&pid)
    }

    /// Sessions in ascending pid order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session<Pv::Process>> {
        self.sessions.values()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn activate_all_hooks(&self) -> Vec<(u32, Result<Vec<HookKind>>)> {
        self.run_each(|session| session.activate_all())
    }

    /// Run `task` once per session, each on its own thread, and collect the
    /// results in pid order. A slow session does not hold up the others.
    pub fn run_each<T, F>(&self, task: F) -> Vec<(u32, T)>
    where
        T: Send,
        F: Fn(&Session<Pv::Process>) -> T + Sync,
    {
        let task = &task;
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .sessions
                .iter()
                .map(|(&pid, session)| (pid, scope.spawn(move || task(session))))
                .collect();
            handles
                .into_iter()
                .map(|(pid, handle)| match handle.join() {
                    Ok(result) => (pid, result),
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    /// Detach every session in pid order.
    pub fn close(&mut self) -> Vec<(u32, DetachReport)> {
        let sessions = std::mem::take(&mut self.sessions);
        sessions
            .into_iter()
            .map(|(pid, session)| (pid, session.detach()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::hook::builtin_signatures;
    use crate::memory::builtin_layouts;
    use crate::process::{MockMemoryBuilder, MockProcess, MockProvider};

    struct Pids(Vec<u32>);

    impl ProcessEnumerator for Pids {
        fn candidates(&self) -> Result<Vec<ProcessCandidate>> {
            Ok(self
                .0
                .iter()
                .map(|&pid| ProcessCandidate {
                    pid,
                    name: "WizardGraphicalClient.exe".to_string(),
                })
                .collect())
        }
    }

    fn manager(pids: &[u32]) -> (SessionManager<MockProvider>, Vec<Arc<MockProcess>>) {
        let provider = MockProvider::new();
        let processes = pids
            .iter()
            .map(|&pid| provider.add(MockMemoryBuilder::new().pid(pid).region(0x1000, 0x100).build()))
            .collect();
        let manager =
            SessionManager::new(provider, builtin_signatures(), Arc::new(builtin_layouts()));
        (manager, processes)
    }

    #[test]
    fn test_attach_new_skips_refused() {
        let (mut manager, _) = manager(&[30, 10, 20]);
        manager.provider().refuse(20);

        let attached = manager.attach_new(&Pids(vec![30, 10, 20])).unwrap();
        assert_eq!(attached, vec![30, 10]);
        assert_eq!(manager.pids(), vec![10, 30]);

        // Nothing new the second time.
        assert!(manager.attach_new(&Pids(vec![10, 30])).unwrap().is_empty());
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_remove_dead() {
        let (mut manager, processes) = manager(&[1, 2]);
        manager.attach_new(&Pids(vec![1, 2])).unwrap();

        processes[1].set_alive(false);
        assert_eq!(manager.remove_dead(), vec![2]);
        assert_eq!(manager.pids(), vec![1]);
        assert!(manager.get(1).is_some());
        assert!(manager.get(2).is_none());
    }

    #[test]
    fn test_run_each_is_concurrent() {
        let (mut manager, _) = manager(&[1, 2, 3]);
        manager.attach_new(&Pids(vec![3, 2, 1])).unwrap();
        let started = Mutex::new(Vec::new());

        // Each task waits until all three have started; a sequential runner
        // would give up on the first.
        let results = manager.run_each(|session| {
            started.lock().unwrap().push(session.pid());
            for _ in 0..1000 {
                if started.lock().unwrap().len() == 3 {
                    return true;
                }
                thread::sleep(Duration::from_millis(2));
            }
            false
        });
        assert_eq!(results, vec![(1, true), (2, true), (3, true)]);
    }

    #[test]
    fn test_close_detaches_in_pid_order() {
        let (mut manager, _) = manager(&[5, 4]);
        manager.attach_new(&Pids(vec![5, 4])).unwrap();

        let closed = manager.close();
        assert_eq!(
            closed.iter().map(|(pid, _)| *pid).collect::<Vec<_>>(),
            vec![4, 5]
        );
        assert!(manager.is_empty());
    }
}
