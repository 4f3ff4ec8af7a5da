//! Outbound message queue.
//!
//! Messages sent while disconnected wait here in call order. An item leaves
//! the queue only after the trigger endpoint accepted it.

use serde_json::Value;
use std::collections::VecDeque;

use crate::message::{now_millis, QueuedMessage, SendOptions};

#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    items: VecDeque<QueuedMessage>,
    next_seq: u64,
}

impl MessageQueue {
    /// Append a message; returns the new depth.
    pub(crate) fn push(&mut self, message_type: &str, payload: Value, options: SendOptions) -> usize {
        self.next_seq += 1;
        self.items.push_back(QueuedMessage {
            seq: self.next_seq,
            message_type: message_type.to_string(),
            payload,
            options,
            enqueued_at: now_millis(),
        });
        self.items.len()
    }

    /// Copy of the queue in order.
    pub(crate) fn snapshot(&self) -> Vec<QueuedMessage> {
        self.items.iter().cloned().collect()
    }

    /// Remove a delivered item.
    pub(crate) fn remove(&mut self, seq: u64) -> bool {
        match self.items.iter().position(|item| item.seq == seq) {
            Some(index) => self.items.remove(index).is_some(),
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
