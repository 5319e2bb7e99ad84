//! Gameplay events.
//!
//! Events queued during a tick become readable on the next tick: the game
//! loop calls [`EventQueue::update`] once per tick, which retires the events
//! that were readable and promotes the freshly queued ones.

use crate::ecs::EntityId;

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// A goal listener was touched. `side` is the side credited with the point.
    GoalScored { goal: EntityId, side: u8 },
}

#[derive(Debug, Default)]
pub struct EventQueue {
    queued: Vec<GameEvent>,
    ready: Vec<GameEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an event for delivery next tick.
    pub fn queue(&mut self, event: GameEvent) {
        self.queued.push(event);
    }

    /// Events queued during the previous tick.
    pub fn ready(&self) -> &[GameEvent] {
        &self.ready
    }

    /// Advances one tick.
    pub fn update(&mut self) {
        self.ready = std::mem::take(&mut self.queued);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_next_tick_and_expire() {
        let mut q = EventQueue::new();
        let ev = GameEvent::GoalScored {
            goal: EntityId(4),
            side: 1,
        };
        q.queue(ev.clone());
        assert!(q.ready().is_empty());
        q.update();
        assert_eq!(q.ready(), &[ev]);
        q.update();
        assert!(q.ready().is_empty());
    }
}
