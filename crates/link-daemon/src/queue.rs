use link_proto::protocol::OutboundMessage;
use std::collections::VecDeque;

/// Outbound messages held while the desktop socket is not open.  Insertion
/// order is delivery order.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<OutboundMessage>,
    /// `None` = unbounded.  With a cap, the oldest message makes room.
    cap: Option<usize>,
}

impl MessageQueue {
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            cap: cap.map(|c| c.max(1)),
        }
    }

    /// Append a message.  Returns the message evicted to stay under the cap.
    pub fn enqueue(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = match self.cap {
            Some(cap) if self.items.len() >= cap => self.items.pop_front(),
            _ => None,
        };
        self.items.push_back(message);
        evicted
    }

    /// Put messages back at the head, ahead of anything queued since.
    pub fn requeue_front(&mut self, messages: Vec<OutboundMessage>) {
        for message in messages.into_iter().rev() {
            self.items.push_front(message);
        }
    }

    /// Take everything, oldest first, leaving the queue empty.
    pub fn flush(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.items).into()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
