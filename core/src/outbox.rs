/// Local send queue: optimistic tickets awaiting remote confirmation
use crate::message::{DeliveryStatus, Message};
use crate::time::now_ms;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// The pre-confirmation shadow of an outbound message.
///
/// A ticket exists only while its status is Pending or Failed; the instant
/// the remote snapshot carries a record with the same id, the ticket is
/// superseded and dropped. The body held here is plaintext (display form);
/// the transform is applied on the wire, not in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub message: Message,
}

/// Per-conversation queue of in-flight sends.
///
/// Owns the Pending -> Committed/Failed state machine. Committed is
/// implicit: `reconcile_against` discards the ticket once the remote
/// snapshot contains its id. Failed is terminal with respect to automatic
/// transitions: the ticket stays visible until cleared or manually
/// retried; there is no automatic retry.
#[derive(Debug, Default)]
pub struct SendQueue {
    tickets: Vec<Ticket>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            tickets: Vec::new(),
        }
    }

    /// Create a Pending ticket with a fresh client-generated id. The caller
    /// drives the remote write; the ticket is visible immediately.
    pub fn enqueue(&mut self, conversation_id: &str, sender_id: &str, body_plaintext: &str) -> Ticket {
        let ticket = Ticket {
            message: Message {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                body: body_plaintext.to_string(),
                timestamp_ms: now_ms(),
                status: DeliveryStatus::Pending,
            },
        };
        self.tickets.push(ticket.clone());
        ticket
    }

    /// Mark a Pending ticket Failed in place. The ticket is not removed
    /// from the view. Returns false if the ticket no longer exists (already
    /// confirmed by a snapshot) or already failed.
    pub fn mark_failed(&mut self, ticket_id: &str) -> bool {
        for ticket in &mut self.tickets {
            if ticket.message.id == ticket_id && ticket.message.status == DeliveryStatus::Pending {
                ticket.message.status = DeliveryStatus::Failed;
                return true;
            }
        }
        false
    }

    /// Drop every ticket whose id the remote snapshot now contains; those
    /// sends are Committed and the remote record takes over.
    pub fn reconcile_against(&mut self, remote_ids: &HashSet<String>) -> usize {
        let before = self.tickets.len();
        self.tickets
            .retain(|t| !remote_ids.contains(&t.message.id));
        let dropped = before - self.tickets.len();
        if dropped > 0 {
            debug!("{} ticket(s) confirmed by remote snapshot", dropped);
        }
        dropped
    }

    /// Remaining Pending/Failed tickets, in insertion order.
    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn clear(&mut self) {
        self.tickets.clear();
    }
}
