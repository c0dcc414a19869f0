//! Alignment negotiation between the Coordinator and the Structurer (§4.2,
//! §4.5): a one-shot rendezvous over a single target's proposed file tree.
//! Lives here, next to the Supervisor, rather than in `orc-core`, because it
//! is a synchronization primitive the two agents share rather than a piece
//! of the domain's data model — and because both already depend on this
//! crate for `OrchestratorService`, so no new edge is introduced between
//! `orc-coordinator` and `orc-structurer` themselves.

use orc_core::StructureSnapshot;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct AlignmentState {
    structurer_proposal: Option<StructureSnapshot>,
    revision_requested: bool,
    settled: Option<StructureSnapshot>,
}

/// A single-shot negotiation for one target (§9 "Decision is single-shot per
/// target"). The Structurer proposes, the Coordinator either accepts or asks
/// for one revision, and the Coordinator always has the final word: if
/// disagreement survives the one allowed revision, its own tree wins
/// verbatim (§4.5).
pub struct AlignmentNegotiation {
    state: Mutex<AlignmentState>,
    changed: Notify,
}

impl AlignmentNegotiation {
    /// A fresh, unsettled negotiation.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AlignmentState::default()),
            changed: Notify::new(),
        }
    }

    /// Structurer posts its initial or revised tree proposal.
    pub async fn propose(&self, tree: StructureSnapshot) {
        let mut state = self.state.lock().await;
        state.structurer_proposal = Some(tree);
        state.revision_requested = false;
        drop(state);
        self.changed.notify_waiters();
    }

    /// Coordinator waits for the Structurer's latest proposal.
    pub async fn await_proposal(&self) -> StructureSnapshot {
        loop {
            let notified = self.changed.notified();
            if let Some(tree) = self.state.lock().await.structurer_proposal.clone() {
                return tree;
            }
            notified.await;
        }
    }

    /// Coordinator rejects the current proposal and asks for the one
    /// revision the Structurer is permitted (§4.5 "Structurer may revise
    /// once").
    pub async fn request_revision(&self) {
        let mut state = self.state.lock().await;
        state.revision_requested = true;
        state.structurer_proposal = None;
        drop(state);
        self.changed.notify_waiters();
    }

    /// Structurer waits to learn whether its proposal was rejected.
    pub async fn await_revision_request(&self) {
        loop {
            let notified = self.changed.notified();
            if self.state.lock().await.revision_requested {
                return;
            }
            notified.await;
        }
    }

    /// Coordinator posts the final agreed tree, settling the negotiation.
    pub async fn settle(&self, tree: StructureSnapshot) {
        let mut state = self.state.lock().await;
        state.settled = Some(tree);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Structurer waits for the settled tree, to learn the Alignment phase
    /// is over and persistence may begin.
    pub async fn await_settlement(&self) -> StructureSnapshot {
        loop {
            let notified = self.changed.notified();
            if let Some(tree) = self.state.lock().await.settled.clone() {
                return tree;
            }
            notified.await;
        }
    }
}

impl Default for AlignmentNegotiation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn coordinator_sees_the_structurers_proposal() {
        let negotiation = Arc::new(AlignmentNegotiation::new());
        let tree = StructureSnapshot::from_paths(["a.py"]);
        negotiation.propose(tree.clone()).await;

        let seen = tokio::time::timeout(Duration::from_millis(50), negotiation.await_proposal())
            .await
            .unwrap();
        assert_eq!(seen, tree);
    }

    #[tokio::test]
    async fn a_revision_request_is_observed_by_the_structurer() {
        let negotiation = Arc::new(AlignmentNegotiation::new());
        negotiation.propose(StructureSnapshot::from_paths(["a.py"])).await;

        let waiter = {
            let negotiation = negotiation.clone();
            tokio::spawn(async move { negotiation.await_revision_request().await })
        };
        negotiation.request_revision().await;
        tokio::time::timeout(Duration::from_millis(50), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn settlement_is_observed_by_the_structurer() {
        let negotiation = Arc::new(AlignmentNegotiation::new());
        let tree = StructureSnapshot::from_paths(["a.py", "b.py"]);

        let waiter = {
            let negotiation = negotiation.clone();
            tokio::spawn(async move { negotiation.await_settlement().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        negotiation.settle(tree.clone()).await;

        let seen = tokio::time::timeout(Duration::from_millis(50), waiter).await.unwrap().unwrap();
        assert_eq!(seen, tree);
    }
}
