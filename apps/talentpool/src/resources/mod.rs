//! Resource stores: one per backend table or bucket, each owning a local
//! mirror that only changes through its own calls.
//!
//! List reads replace the mirror and are fenced: a response older than the
//! last applied one is dropped. Writes patch the mirror in place and advance
//! the fence so an older read cannot resurrect what they changed.

pub mod applications;
pub mod candidates;
pub mod cv;
pub mod jobs;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::fence::{RequestFence, Ticket, Watermark};

pub use applications::ApplicationsStore;
pub use candidates::{get_candidate_profile, CandidateDetail};
pub use cv::CvStore;
pub use jobs::JobsStore;

/// What a view renders from a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Mirror<T> {
    pub items: T,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct Slot<T> {
    mirror: Mirror<T>,
    watermark: Watermark,
    owner: Option<Uuid>,
}

pub(crate) struct Resource<T> {
    name: &'static str,
    slot: RwLock<Slot<T>>,
    fence: RequestFence,
}

impl<T: Clone + Default> Resource<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: RwLock::new(Slot::default()),
            fence: RequestFence::default(),
        }
    }

    pub(crate) async fn snapshot(&self) -> Mirror<T> {
        self.slot.read().await.mirror.clone()
    }

    /// Empties the mirror if it was filled for someone other than `owner`.
    /// Reads still in flight for the previous identity can no longer land.
    pub(crate) async fn scope_to(&self, owner: Option<Uuid>) {
        let mut slot = self.slot.write().await;
        if slot.owner == owner {
            return;
        }
        debug!("Resetting {} mirror for a new identity", self.name);
        slot.mirror = Mirror::default();
        slot.owner = owner;
        slot.watermark.advance(self.fence.issue());
    }

    pub(crate) fn ticket(&self) -> Ticket {
        self.fence.issue()
    }

    /// Starts a replacing read: marks the mirror loading and clears the error.
    pub(crate) async fn begin(&self) -> Ticket {
        let ticket = self.fence.issue();
        let mut slot = self.slot.write().await;
        slot.mirror.is_loading = true;
        slot.mirror.error = None;
        ticket
    }

    /// Lands a replacing read unless a newer one already did.
    pub(crate) async fn finish(&self, ticket: Ticket, outcome: Result<T, String>) -> bool {
        let mut slot = self.slot.write().await;
        if !slot.watermark.admit(ticket) {
            debug!("Dropping stale {} response", self.name);
            return false;
        }
        match outcome {
            Ok(items) => slot.mirror.items = items,
            Err(message) => slot.mirror.error = Some(message),
        }
        slot.mirror.is_loading = false;
        true
    }

    /// Applies a write made on behalf of `owner`. Skipped when the mirror has
    /// since been handed to another identity.
    pub(crate) async fn patch(&self, ticket: Ticket, owner: Uuid, apply: impl FnOnce(&mut T)) {
        let mut slot = self.slot.write().await;
        if slot.owner != Some(owner) {
            debug!("Dropping {} write for a previous identity", self.name);
            return;
        }
        slot.watermark.advance(ticket);
        apply(&mut slot.mirror.items);
    }

    pub(crate) async fn fail(&self, message: String) {
        self.slot.write().await.mirror.error = Some(message);
    }

    pub(crate) async fn settle(&self) {
        self.slot.write().await.mirror.is_loading = false;
    }
}
