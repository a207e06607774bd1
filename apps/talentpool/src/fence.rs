//! Stale-response fencing.
//!
//! Every request that may overwrite a local mirror takes a [`Ticket`] from the
//! mirror's [`RequestFence`] before it goes out. When the response comes back
//! the ticket is checked against the mirror's [`Watermark`]: a response whose
//! ticket is older than the last one applied is dropped.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct RequestFence {
    issued: AtomicU64,
}

impl RequestFence {
    pub fn issue(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

/// Highest ticket applied to a mirror. Lives under the same lock as the mirror.
#[derive(Debug, Default, Clone, Copy)]
pub struct Watermark(u64);

impl Watermark {
    /// Replacing responses: admitted only when newer than everything applied.
    pub fn admit(&mut self, ticket: Ticket) -> bool {
        if ticket.0 > self.0 {
            self.0 = ticket.0;
            true
        } else {
            false
        }
    }

    /// Patching responses always apply but still fence out older replacements.
    pub fn advance(&mut self, ticket: Ticket) {
        self.0 = self.0.max(ticket.0);
    }
}
