//! Per-skill supervision: spawn, handshake, restart with backoff, stop.

use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    skskills_config::SupervisorConfig,
    skskills_registry::{
        InstalledSkillRecord, LifecycleManager, Namespace, ProcessQuiescer, RegistryStore,
        SkillStore, effective_skills,
    },
};

use crate::{
    error::Result,
    traits::SkillTransport,
    transport::StdioTransport,
    types::{ProcessState, SkillStatus},
};

struct Slot {
    /// The record this slot was started from, so `resync` can tell a
    /// replaced snapshot apart from an unchanged one.
    record: InstalledSkillRecord,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Supervises the effective skill set of one namespace.
///
/// Each skill gets a dedicated supervision task driving its state machine;
/// the supervisor only hands out cancellation tokens and status snapshots.
/// At most one process runs per skill name.
pub struct Supervisor {
    namespace: Namespace,
    cfg: SupervisorConfig,
    registry: Arc<RegistryStore>,
    store: SkillStore,
    slots: Mutex<HashMap<String, Slot>>,
    /// Retained after a slot ends so `status_all` still shows stopped and
    /// crashed skills.
    statuses: Mutex<HashMap<String, SkillStatus>>,
    root: CancellationToken,
}

impl Supervisor {
    pub fn new(
        namespace: Namespace,
        cfg: SupervisorConfig,
        registry: Arc<RegistryStore>,
        store: SkillStore,
    ) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            cfg,
            registry,
            store,
            slots: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Start every enabled skill in this namespace's effective set.
    pub async fn start_enabled(self: &Arc<Self>) -> Result<Vec<String>> {
        let doc = self.registry.load()?;
        let records: Vec<InstalledSkillRecord> = effective_skills(&doc, &self.namespace)
            .into_iter()
            .cloned()
            .collect();

        let mut started = Vec::new();
        for record in records {
            let name = record.name.clone();
            self.start_skill(record).await;
            started.push(name);
        }
        Ok(started)
    }

    /// Reconcile running slots with the current effective set: stop skills
    /// that dropped out, start skills that appeared, and restart skills
    /// whose registry record changed under us (an `update` or forced
    /// install committed by another process).
    pub async fn resync(self: &Arc<Self>) -> Result<()> {
        let doc = self.registry.load()?;
        let effective: Vec<InstalledSkillRecord> = effective_skills(&doc, &self.namespace)
            .into_iter()
            .cloned()
            .collect();

        let running: Vec<InstalledSkillRecord> = {
            let slots = self.slots.lock().await;
            slots.values().map(|slot| slot.record.clone()).collect()
        };
        for prior in &running {
            if !effective.iter().any(|r| r.name == prior.name) {
                self.stop_skill(&prior.name).await;
            }
        }
        for record in effective {
            match running.iter().find(|r| r.name == record.name) {
                Some(prior) if prior.updated_at == record.updated_at => {},
                Some(_) => {
                    info!(skill = %record.name, "skill record changed, restarting");
                    self.start_skill(record).await;
                },
                None => self.start_skill(record).await,
            }
        }
        Ok(())
    }

    /// Start supervising one skill, stopping any prior process for the same
    /// name first. The slot table lock is held across the whole
    /// stop-check-insert sequence so concurrent starts for one name cannot
    /// each spawn a process.
    pub async fn start_skill(self: &Arc<Self>, record: InstalledSkillRecord) {
        let name = record.name.clone();
        let mut slots = self.slots.lock().await;
        if let Some(prior) = slots.remove(&name) {
            prior.cancel.cancel();
            let _ = prior.task.await;
        }

        self.statuses.lock().await.insert(
            name.clone(),
            SkillStatus {
                name: name.clone(),
                version: record.manifest.version.to_string(),
                state: ProcessState::Starting,
                restart_count: 0,
                pid: None,
                last_exit: None,
            },
        );

        let cancel = self.root.child_token();
        let task = tokio::spawn({
            let sup = Arc::clone(self);
            let cancel = cancel.clone();
            let record = record.clone();
            async move { sup.supervise(record, cancel).await }
        });
        slots.insert(name, Slot { record, cancel, task });
    }

    /// Stop one skill's process and wait until its slot has wound down.
    pub async fn stop_skill(&self, name: &str) {
        let slot = self.slots.lock().await.remove(name);
        if let Some(slot) = slot {
            slot.cancel.cancel();
            let _ = slot.task.await;
        }
    }

    /// Stop everything. Used at the end of a run session.
    pub async fn shutdown_all(&self) {
        self.root.cancel();
        let slots: Vec<Slot> = {
            let mut map = self.slots.lock().await;
            map.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            let _ = slot.task.await;
        }
        info!(namespace = %self.namespace, "supervisor shut down");
    }

    /// Enable a skill and start it if it lands in the effective set.
    pub async fn enable_skill(self: &Arc<Self>, lifecycle: &LifecycleManager, name: &str) -> Result<()> {
        lifecycle.set_enabled(name, &self.namespace, true).await?;
        self.resync().await
    }

    /// Disable a skill; the lifecycle commit quiesces its process first.
    pub async fn disable_skill(self: &Arc<Self>, lifecycle: &LifecycleManager, name: &str) -> Result<()> {
        lifecycle.set_enabled(name, &self.namespace, false).await?;
        self.resync().await
    }

    /// Swap in a new skill snapshot and restart it if enabled.
    pub async fn update_skill(
        self: &Arc<Self>,
        lifecycle: &LifecycleManager,
        name: &str,
        source: &std::path::Path,
    ) -> Result<()> {
        lifecycle.update(name, source, &self.namespace).await?;
        self.resync().await
    }

    /// Snapshot of every known skill, sorted by name.
    pub async fn status_all(&self) -> Vec<SkillStatus> {
        let mut statuses: Vec<SkillStatus> = self.statuses.lock().await.values().cloned().collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    async fn update_status(&self, name: &str, f: impl FnOnce(&mut SkillStatus)) {
        if let Some(status) = self.statuses.lock().await.get_mut(name) {
            f(status);
        }
    }

    /// The state machine for one skill. Runs until stopped, crashed, or the
    /// whole supervisor shuts down.
    async fn supervise(self: Arc<Self>, record: InstalledSkillRecord, cancel: CancellationToken) {
        let name = record.name.clone();
        let skill_dir = self.store.skill_dir(&name, &record.namespace);
        let (program, args) = record.manifest.entry_command();

        // Entry programs shipped inside the skill directory run from there;
        // anything else (an interpreter like python3) resolves via PATH.
        let in_dir = skill_dir.join(&program);
        let program = if in_dir.is_file() {
            in_dir.display().to_string()
        } else {
            program
        };

        let mut restart_count = 0u32;
        loop {
            self.update_status(&name, |s| {
                s.state = ProcessState::Starting;
                s.pid = None;
            })
            .await;

            let transport = match StdioTransport::spawn(&name, &program, &args, &skill_dir).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(skill = %name, error = %e, "failed to launch skill");
                    if self.backoff_or_crash(&name, &mut restart_count, &cancel).await {
                        continue;
                    }
                    return;
                },
            };
            self.update_status(&name, |s| s.pid = transport.pid()).await;

            let handshake_ok = tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop_process(&name, &transport).await;
                    return;
                },
                exit = transport.wait_exit() => {
                    warn!(skill = %name, ?exit, "skill exited before handshake");
                    self.update_status(&name, |s| s.last_exit = exit).await;
                    false
                },
                result = transport.handshake(self.cfg.handshake_timeout()) => match result {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(skill = %name, error = %e, "handshake failed");
                        transport.shutdown(self.cfg.shutdown_grace()).await;
                        // The failure may be the process dying mid-handshake.
                        if let Some(code) = transport.wait_exit().await {
                            self.update_status(&name, |s| s.last_exit = Some(code)).await;
                        }
                        false
                    },
                },
            };

            if handshake_ok {
                self.update_status(&name, |s| s.state = ProcessState::Live).await;
                info!(skill = %name, pid = ?transport.pid(), "skill live");

                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.stop_process(&name, &transport).await;
                        return;
                    },
                    exit = transport.wait_exit() => {
                        warn!(skill = %name, ?exit, "skill exited unexpectedly");
                        self.update_status(&name, |s| s.last_exit = exit).await;
                    },
                }
            }

            if !self.backoff_or_crash(&name, &mut restart_count, &cancel).await {
                return;
            }
        }
    }

    async fn stop_process(&self, name: &str, transport: &Arc<StdioTransport>) {
        self.update_status(name, |s| s.state = ProcessState::Stopping).await;
        transport.shutdown(self.cfg.shutdown_grace()).await;
        self.update_status(name, |s| {
            s.state = ProcessState::Stopped;
            s.pid = None;
        })
        .await;
        info!(skill = %name, "skill stopped");
    }

    /// Apply the restart policy after a failed attempt. Returns `true` when
    /// the loop should try again, `false` when it must end (crashed, or
    /// cancelled during the backoff).
    async fn backoff_or_crash(
        &self,
        name: &str,
        restart_count: &mut u32,
        cancel: &CancellationToken,
    ) -> bool {
        *restart_count += 1;
        let count = *restart_count;

        if count > self.cfg.restart_limit {
            warn!(skill = %name, restarts = count, "restart limit exceeded, marking crashed");
            self.update_status(name, |s| {
                s.state = ProcessState::Crashed;
                s.restart_count = count;
                s.pid = None;
            })
            .await;
            return false;
        }

        self.update_status(name, |s| {
            s.state = ProcessState::Degraded;
            s.restart_count = count;
            s.pid = None;
        })
        .await;

        let delay = self.cfg.backoff_for_attempt(count);
        tokio::select! {
            _ = cancel.cancelled() => {
                self.update_status(name, |s| s.state = ProcessState::Stopped).await;
                false
            },
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[async_trait]
impl ProcessQuiescer for Supervisor {
    /// Stop the process for a skill whose files or record are about to
    /// change. Global skills run inside agent sessions too, so only the
    /// name is matched here.
    async fn quiesce(&self, _namespace: &Namespace, name: &str) {
        self.stop_skill(name).await;
    }
}
