//! Tick-driven timers for the main thread.

/// Work deferred by a number of ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Hide the loading overlay.
    HideLoading,
    /// Refresh rich-presence status.
    UpdatePresence,
}

/// Tasks waiting for their delay to run out, in scheduling order.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: Vec<(f32, Task)>,
}

impl TaskQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once `delay_ticks` have passed.
    pub fn schedule(&mut self, task: Task, delay_ticks: f32) {
        self.pending.push((delay_ticks, task));
    }

    /// Advance time and return the tasks that came due, oldest first.
    pub fn advance(&mut self, delta_ticks: f32) -> Vec<Task> {
        let mut due = Vec::new();
        self.pending.retain_mut(|(left, task)| {
            *left -= delta_ticks;
            if *left <= 0.0 {
                due.push(*task);
                false
            } else {
                true
            }
        });
        due
    }

    /// Tasks still waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Fires once every `interval` ticks.
#[derive(Debug, Clone)]
pub struct Interval {
    interval: f32,
    acc: f32,
}

impl Interval {
    /// Timer firing every `interval` ticks.
    pub fn new(interval: f32) -> Self {
        Self { interval, acc: 0.0 }
    }

    /// Advance; `true` when the interval elapsed. At most one firing per call.
    pub fn tick(&mut self, delta_ticks: f32) -> bool {
        self.acc += delta_ticks;
        if self.acc >= self.interval {
            self.acc = 0.0;
            true
        } else {
            false
        }
    }

    /// Restart from zero.
    pub fn reset(&mut self) {
        self.acc = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_fire_after_delay() {
        let mut queue = TaskQueue::new();
        queue.schedule(Task::UpdatePresence, 40.0);
        queue.schedule(Task::HideLoading, 3.0);

        assert!(queue.advance(2.0).is_empty());
        assert_eq!(queue.advance(1.0), vec![Task::HideLoading]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.advance(100.0), vec![Task::UpdatePresence]);
        assert!(queue.is_empty());
    }

    #[test]
    fn interval_fires_once_per_period() {
        let mut sync = Interval::new(2.0);
        let fired: Vec<bool> = (0..6).map(|_| sync.tick(1.0)).collect();
        assert_eq!(fired, vec![false, true, false, true, false, true]);
    }
}
