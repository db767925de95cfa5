//! Events on the superdense-time event queue, and the envelope used to
//! inject physical events from outside the main loop.

use std::sync::Arc;

use crate::{ActionKey, PrioritySetElement, ReactorData, Tag, TimeValue, TimerKey};

/// The trigger an event is delivered to when its tag is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKey {
    Action(ActionKey),
    Timer(TimerKey),
}

impl From<ActionKey> for TriggerKey {
    fn from(key: ActionKey) -> Self {
        TriggerKey::Action(key)
    }
}

impl From<TimerKey> for TriggerKey {
    fn from(key: TimerKey) -> Self {
        TriggerKey::Timer(key)
    }
}

/// An event scheduled for a future tag. Two events for the same
/// `(trigger, tag)` collapse in the queue; the later push wins.
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    pub(crate) trigger: TriggerKey,
    pub(crate) tag: Tag,
    pub(crate) value: Option<Arc<dyn ReactorData>>,
}

impl TaggedEvent {
    pub fn new(trigger: TriggerKey, tag: Tag, value: Option<Arc<dyn ReactorData>>) -> Self {
        Self {
            trigger,
            tag,
            value,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn trigger(&self) -> TriggerKey {
        self.trigger
    }
}

impl std::fmt::Display for TaggedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E[tag={},trigger={:?}]", self.tag, self.trigger)
    }
}

impl PrioritySetElement for TaggedEvent {
    fn has_priority_over(&self, other: &Self) -> bool {
        self.tag < other.tag
    }

    fn update_if_duplicate_of(&mut self, incoming: &mut Self) -> bool {
        if self.trigger == incoming.trigger && self.tag == incoming.tag {
            self.value = incoming.value.take();
            true
        } else {
            false
        }
    }
}

/// An asynchronous stimulus delivered through the thread-safe channel:
/// either a physical action trigger or a stop request.
#[derive(Debug)]
pub enum PhysicalEvent {
    Trigger {
        action: ActionKey,
        value: Option<Arc<dyn ReactorData>>,
        extra_delay: TimeValue,
    },
    Shutdown,
}

impl std::fmt::Display for PhysicalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhysicalEvent::Trigger { action, .. } => write!(f, "P[action={action:?}]"),
            PhysicalEvent::Shutdown => write!(f, "P[shutdown]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrioritySet;
    use slotmap::Key;

    fn tag(secs: u64, microstep: u32) -> Tag {
        Tag::new(TimeValue::new(secs, 0), microstep)
    }

    #[test]
    fn test_event_queue_ordering() {
        let trigger = TriggerKey::Action(ActionKey::null());
        let mut queue = PrioritySet::new();
        queue.push(TaggedEvent::new(trigger, tag(2, 0), None));
        queue.push(TaggedEvent::new(trigger, tag(1, 1), None));
        queue.push(TaggedEvent::new(trigger, tag(1, 0), None));

        assert_eq!(queue.pop().unwrap().tag(), tag(1, 0));
        assert_eq!(queue.pop().unwrap().tag(), tag(1, 1));
        assert_eq!(queue.pop().unwrap().tag(), tag(2, 0));
    }

    #[test]
    fn test_duplicate_event_keeps_latest_value() {
        let trigger = TriggerKey::Action(ActionKey::null());
        let mut queue = PrioritySet::new();
        queue.push(TaggedEvent::new(
            trigger,
            tag(1, 0),
            Some(Arc::new(1u32)),
        ));
        queue.push(TaggedEvent::new(
            trigger,
            tag(1, 0),
            Some(Arc::new(2u32)),
        ));

        assert_eq!(queue.len(), 1);
        let event = queue.pop().unwrap();
        let value = event.value.unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&2));
    }
}
