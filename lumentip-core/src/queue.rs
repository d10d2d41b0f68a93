use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::command::Command;

/// FIFO transport for commands awaiting dispatch.
///
/// Delivery is at-least-once. Consumers rely on each command's
/// idempotency hash, not the queue, to suppress duplicate application.
pub trait CommandQueue: Send + Sync {
    fn push(&self, command: &Command) -> serde_json::Result<()>;

    /// Removes and decodes the oldest payload, `None` when empty.
    fn pop(&self) -> serde_json::Result<Option<Command>>;
}

/// In-process queue holding serialized payloads, mirroring the list
/// semantics of an external store such as Redis.
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl CommandQueue for MemoryQueue {
    fn push(&self, command: &Command) -> serde_json::Result<()> {
        let payload = command.to_json()?;
        self.items.lock().push_back(payload);
        Ok(())
    }

    fn pop(&self) -> serde_json::Result<Option<Command>> {
        let payload = self.items.lock().pop_front();
        payload.map(|raw| Command::from_json(&raw)).transpose()
    }
}
