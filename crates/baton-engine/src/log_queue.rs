//! Bounded queue of kernel log messages.
//!
//! The kernel produces messages while it holds the session; the master
//! drains them after each call, once the session is back in its hands.
//! Info-level messages are not queued. When the queue is full the oldest
//! message is dropped and counted.

use std::collections::VecDeque;

use baton_core::LogLevel;

/// A message reported by the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMessage {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
}

/// Bounded FIFO of [`LogMessage`]s.
#[derive(Debug)]
pub struct LogQueue {
    messages: VecDeque<LogMessage>,
    capacity: usize,
    dropped: u64,
}

/// Everything taken out of the queue by one [`LogQueue::drain`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Messages in the order they were reported.
    pub messages: Vec<LogMessage>,
    /// How many messages were lost to overflow since the last drain.
    pub dropped: u64,
}

impl LogQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Queue a message. Returns `false` if the level is not queued.
    pub fn push(&mut self, level: LogLevel, message: &str) -> bool {
        if level == LogLevel::Info {
            return false;
        }
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
            self.dropped += 1;
        }
        self.messages.push_back(LogMessage {
            level,
            message: message.to_string(),
        });
        true
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Take every queued message and reset the drop counter.
    pub fn drain(&mut self) -> Drained {
        Drained {
            messages: self.messages.drain(..).collect(),
            dropped: std::mem::take(&mut self.dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_messages_are_not_queued() {
        let mut q = LogQueue::new(4);
        assert!(!q.push(LogLevel::Info, "starting"));
        assert!(q.push(LogLevel::Warning, "odd"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = LogQueue::new(2);
        q.push(LogLevel::Warning, "a");
        q.push(LogLevel::Error, "b");
        q.push(LogLevel::Fatal, "c");
        let drained = q.drain();
        assert_eq!(drained.dropped, 1);
        let texts: Vec<_> = drained.messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, ["b", "c"]);
    }

    #[test]
    fn drain_empties_and_resets() {
        let mut q = LogQueue::new(1);
        q.push(LogLevel::Warning, "a");
        q.push(LogLevel::Warning, "b");
        assert_eq!(q.drain().dropped, 1);
        assert!(q.is_empty());
        assert_eq!(q.drain(), Drained::default());
    }
}
