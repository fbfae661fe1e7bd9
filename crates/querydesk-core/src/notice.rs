//! Order-preserving capture of asynchronous server notice messages.
//!
//! Notices are out-of-band informational messages emitted by the database
//! server during statement execution (e.g. `RAISE NOTICE` output from
//! procedural loops). One buffer is tied to one execution. Appends preserve
//! emission order and the buffer is never truncated: the reference scenario
//! accumulates on the order of a thousand entries from a single loop.

/// Append-only, order-preserving buffer of notice messages.
#[derive(Debug, Default, Clone)]
pub struct NoticeBuffer {
    messages: Vec<String>,
}

impl NoticeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one message. O(1) amortized.
    pub fn append(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Appends a batch of messages, preserving their order.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = String>) {
        self.messages.extend(messages);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns all messages concatenated with newline separators in emission
    /// order. Non-destructive: callable repeatedly until the owning execution
    /// handle is discarded.
    pub fn drain(&self) -> String {
        self.messages.join("\n")
    }

    /// Iterates messages in emission order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.as_str())
    }
}
