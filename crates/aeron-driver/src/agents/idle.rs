// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Idle strategies and the agent runner loop: busy-spin -> yield -> park,
//! driven by the work count each agent's `do_work()` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Backs off proportionally to how long `do_work()` has reported no work.
pub trait IdleStrategy {
    fn idle(&mut self, work_count: usize);
}

/// Never yields the CPU; work_count > 0 resets to the hottest state.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpinIdleStrategy;

impl IdleStrategy for BusySpinIdleStrategy {
    fn idle(&mut self, _work_count: usize) {
        std::hint::spin_loop();
    }
}

/// Calls `thread::yield_now()` when there is no work.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldingIdleStrategy;

impl IdleStrategy for YieldingIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::yield_now();
        }
    }
}

/// Sleeps a fixed duration when there is no work.
#[derive(Debug, Clone, Copy)]
pub struct SleepingIdleStrategy {
    pub park_duration: Duration,
}

impl Default for SleepingIdleStrategy {
    fn default() -> Self {
        Self { park_duration: Duration::from_millis(1) }
    }
}

impl IdleStrategy for SleepingIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::sleep(self.park_duration);
        }
    }
}

/// Composes busy-spin -> yield -> park, per SPEC_FULL §5's scheduling
/// model: a short run of spinning, then cooperative yields, then real
/// sleep once the agent has been idle for a while.
pub struct ComposedIdleStrategy {
    idle_count: usize,
    spin_threshold: usize,
    yield_threshold: usize,
    sleep: SleepingIdleStrategy,
}

impl Default for ComposedIdleStrategy {
    fn default() -> Self {
        Self {
            idle_count: 0,
            spin_threshold: 100,
            yield_threshold: 1_000,
            sleep: SleepingIdleStrategy::default(),
        }
    }
}

impl IdleStrategy for ComposedIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.idle_count = 0;
            return;
        }
        self.idle_count += 1;
        if self.idle_count < self.spin_threshold {
            std::hint::spin_loop();
        } else if self.idle_count < self.yield_threshold {
            thread::yield_now();
        } else {
            self.sleep.idle(0);
        }
    }
}

/// Drives `do_work()` -> `idle.idle(work_count)` until `running` is cleared.
pub struct AgentRunner<A, I> {
    agent: A,
    idle: I,
    running: Arc<AtomicBool>,
}

impl<A, I> AgentRunner<A, I>
where
    A: FnMut() -> usize,
    I: IdleStrategy,
{
    pub fn new(agent: A, idle: I, running: Arc<AtomicBool>) -> Self {
        Self { agent, idle, running }
    }

    /// Run until `running` is cleared by another thread.
    pub fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            let work_count = (self.agent)();
            self.idle.idle(work_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn runner_stops_when_running_flag_clears() {
        let running = Arc::new(AtomicBool::new(true));
        let ticks = StdAtomicUsize::new(0);
        let running_clone = running.clone();

        let runner = AgentRunner::new(
            || {
                let n = ticks.fetch_add(1, Ordering::Relaxed);
                if n >= 4 {
                    running_clone.store(false, Ordering::Release);
                }
                1
            },
            BusySpinIdleStrategy,
            running,
        );
        runner.run();
        assert!(ticks.load(Ordering::Relaxed) >= 5);
    }

    #[test]
    fn composed_strategy_escalates_from_spin_to_yield() {
        let mut idle = ComposedIdleStrategy::default();
        for _ in 0..idle.spin_threshold + 10 {
            idle.idle(0);
        }
        assert!(idle.idle_count > idle.spin_threshold);
        idle.idle(1);
        assert_eq!(idle.idle_count, 0);
    }
}
