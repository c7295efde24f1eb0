use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Author {
    /// This side of the call
    Local,
    Remote,
}

/// One chat line. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author: Author,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(author: Author, body: impl Into<String>) -> Self {
        Self {
            author,
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn local(body: impl Into<String>) -> Self {
        Self::new(Author::Local, body)
    }

    pub fn remote(body: impl Into<String>) -> Self {
        Self::new(Author::Remote, body)
    }
}

/// Append-only chat history for one call.
///
/// Snapshots handed out by [`MessageLog::snapshot`] are frozen: a later append
/// copies the backing vector instead of touching what a reader already holds,
/// so every newer snapshot is a prefix-extension of every older one.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Arc<Vec<Message>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        Arc::make_mut(&mut self.entries).push(message);
    }

    pub fn snapshot(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_insertion_order() {
        let mut log = MessageLog::new();
        log.append(Message::local("hi"));
        log.append(Message::remote("hello"));
        log.append(Message::local("how are you"));

        let bodies: Vec<_> = log.snapshot().iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, ["hi", "hello", "how are you"]);
        assert_eq!(log.last().unwrap().author, Author::Local);
    }

    #[test]
    fn older_snapshots_are_prefixes_of_newer_ones() {
        let mut log = MessageLog::new();
        log.append(Message::remote("one"));
        let before = log.snapshot();

        log.append(Message::local("two"));
        log.append(Message::remote("three"));
        let after = log.snapshot();

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 3);
        assert_eq!(&after[..before.len()], &before[..]);
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
