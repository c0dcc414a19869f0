use std::collections::HashMap;

use orc_core::{Report, Subtask, SubtaskStatus};
use uuid::Uuid;

/// The task ledger (§3 Ownership: "The Orchestrator exclusively owns...the
/// ledger"): every subtask ever enqueued, plus the reports submitted
/// against it. A flat table indexed by id rather than an object graph (§9
/// "Cyclic references... implement as stable ids indexing flat tables").
#[derive(Default)]
pub struct Ledger {
    subtasks: HashMap<Uuid, Subtask>,
    reports: HashMap<Uuid, Vec<Report>>,
}

impl Ledger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly-created subtask. Panics if the id already exists —
    /// callers must check `contains` first (`enqueue_subtask`'s
    /// `DuplicateId` check, §4.1).
    pub fn insert(&mut self, subtask: Subtask) {
        self.subtasks.insert(subtask.id, subtask);
    }

    /// Whether a subtask with this id is already in the ledger.
    pub fn contains(&self, id: Uuid) -> bool {
        self.subtasks.contains_key(&id)
    }

    /// Look up a subtask by id.
    pub fn get(&self, id: Uuid) -> Option<&Subtask> {
        self.subtasks.get(&id)
    }

    /// Mutable access to a subtask by id.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Subtask> {
        self.subtasks.get_mut(&id)
    }

    /// All subtasks, unordered (callers needing FIFO order consult the
    /// queue, not the ledger).
    pub fn all(&self) -> impl Iterator<Item = &Subtask> {
        self.subtasks.values()
    }

    /// Record a worker's report against its subtask.
    pub fn record_report(&mut self, report: Report) {
        self.reports.entry(report.subtask_id).or_default().push(report);
    }

    /// All reports recorded for a given subtask, in submission order.
    pub fn reports_for(&self, subtask_id: Uuid) -> &[Report] {
        self.reports.get(&subtask_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The most recent report for a subtask, if any.
    pub fn latest_report(&self, subtask_id: Uuid) -> Option<&Report> {
        self.reports.get(&subtask_id).and_then(|v| v.last())
    }

    /// Number of subtasks with a given status, for the status distribution
    /// chart (§6 `task_status_distribution`).
    pub fn count_by_status(&self, status: SubtaskStatus) -> usize {
        self.subtasks.values().filter(|s| s.status == status).count()
    }

    /// Clear every subtask and report (operator `reset`/`clear`, §6).
    pub fn clear(&mut self) {
        self.subtasks.clear();
        self.reports.clear();
    }

    /// Total number of subtasks ever enqueued.
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether the ledger has no subtasks.
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }
}
