// Layerz Scripted Provider
// Replays a prepared event sequence under a virtual clock; used by tests.

use std::collections::VecDeque;

use super::{EventProvider, ProviderResult};
use crate::Event;

/// In-memory provider driven by a prepared sequence of timestamped events.
///
/// The virtual clock starts at zero and advances to each event's timestamp
/// as it is handed out. With a non-zero timeout, `read_event` returns
/// `None` once the next event's timestamp lies beyond `now + timeout`,
/// advancing the clock by the full timeout, which mirrors a poll that
/// came back empty.
#[derive(Debug, Default)]
pub struct SimProvider {
    queue: VecDeque<Event>,
    written: Vec<Event>,
    now_us: u64,
}

impl SimProvider {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            queue: events.into_iter().collect(),
            written: Vec::new(),
            now_us: 0,
        }
    }

    /// Append one more scripted event.
    pub fn push(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Everything the engine has emitted so far, in emission order.
    pub fn written(&self) -> &[Event] {
        &self.written
    }

    /// Current virtual time in microseconds.
    pub fn now_us(&self) -> u64 {
        self.now_us
    }
}

impl EventProvider for SimProvider {
    fn read_event(&mut self, timeout_ms: u32) -> ProviderResult<Option<Event>> {
        let Some(next) = self.queue.front() else {
            return Ok(None);
        };
        let due = next.timestamp_us();

        if timeout_ms > 0 {
            let deadline = self.now_us + timeout_ms as u64 * 1_000;
            if due > deadline {
                self.now_us = deadline;
                return Ok(None);
            }
        }

        self.now_us = self.now_us.max(due);
        Ok(self.queue.pop_front())
    }

    fn write_event(&mut self, event: Event) -> ProviderResult<()> {
        self.written.push(event);
        Ok(())
    }
}
