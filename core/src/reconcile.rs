/// Merges remote snapshots with the local send queue into one rendered list
///
/// The remote stream delivers full snapshots ("all messages under this
/// conversation"), never deltas, so every invocation treats the parsed
/// remote content as the complete authoritative committed set. Each call is
/// a pure function of (current snapshot, current ticket set), safe to run
/// back-to-back with identical results.
use crate::message::{parse_message, Message};
use crate::outbox::SendQueue;
use crate::remote::MessageSnapshot;
use std::collections::{HashMap, HashSet};

/// Parse every entry of a raw snapshot, discarding invalid records.
/// Order of the result follows remote delivery order.
pub fn parse_snapshot(conversation_id: &str, snapshot: &MessageSnapshot, shift: u8) -> Vec<Message> {
    snapshot
        .iter()
        .filter_map(|(id, raw)| parse_message(id, conversation_id, raw, shift))
        .collect()
}

/// Produce the ordered, duplicate-free rendered list.
///
/// The committed set is keyed by id here, not trusted to arrive unique: a
/// snapshot repeating an id keeps one entry (the later content, at the
/// first position). Tickets confirmed by the snapshot are dropped from the
/// queue, so a remote record always wins over the ticket sharing its id
/// (same entity, not a duplicate to deduplicate after the fact). The sort
/// is stable: entries with identical normalized timestamps keep remote
/// delivery order.
pub fn render(parsed_remote: Vec<Message>, queue: &mut SendQueue) -> Vec<Message> {
    let mut slot_by_id: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Message> = Vec::with_capacity(parsed_remote.len());
    for message in parsed_remote {
        match slot_by_id.get(&message.id) {
            Some(&slot) => merged[slot] = message,
            None => {
                slot_by_id.insert(message.id.clone(), merged.len());
                merged.push(message);
            }
        }
    }

    let remote_ids: HashSet<String> = slot_by_id.into_keys().collect();
    queue.reconcile_against(&remote_ids);

    merged.extend(queue.tickets().iter().map(|t| t.message.clone()));
    merged.sort_by_key(|m| m.timestamp_ms);
    merged
}
