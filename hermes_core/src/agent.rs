//! Cooperative duty-cycle agents.
//!
//! The driver conductor (and, in a full deployment, sender/receiver
//! agents) implement [`Agent`]: a `do_work` called in a loop, returning
//! how much work was done so the idle strategy can back off when the
//! system is quiet. Termination is an explicit result
//! ([`HermesError::Terminated`]) propagated to the runner, never an
//! unwind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{HermesError, HermesResult};

/// A unit of cooperative work driven by an [`AgentRunner`].
pub trait Agent {
    /// One duty cycle. Returns the amount of work done (0 = idle).
    fn do_work(&mut self) -> HermesResult<usize>;

    /// Called once when the runner stops, on the agent's own thread.
    fn on_close(&mut self) {}

    /// Name used for the thread and log messages.
    fn role_name(&self) -> &str;
}

/// Back-off behaviour between duty cycles that did no work.
#[derive(Debug, Clone)]
pub enum IdleStrategy {
    /// Busy-spin. Lowest latency, one core burned.
    Spin,
    /// `thread::yield_now` every idle cycle.
    Yield,
    /// Park for a fixed duration every idle cycle.
    Sleep(Duration),
    /// Spin, then yield, then park with doubling duration.
    Backoff {
        max_spins: u32,
        max_yields: u32,
        min_park: Duration,
        max_park: Duration,
    },
}

impl Default for IdleStrategy {
    fn default() -> Self {
        IdleStrategy::Backoff {
            max_spins: 10,
            max_yields: 5,
            min_park: Duration::from_micros(1),
            max_park: Duration::from_millis(1),
        }
    }
}

/// Mutable idle state paired with a strategy.
#[derive(Debug, Clone, Default)]
pub struct Idler {
    strategy: IdleStrategy,
    spins: u32,
    yields: u32,
    park: Duration,
}

impl Idler {
    pub fn new(strategy: IdleStrategy) -> Self {
        Self {
            strategy,
            spins: 0,
            yields: 0,
            park: Duration::ZERO,
        }
    }

    /// Apply the strategy given the work count of the last cycle.
    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        match &self.strategy {
            IdleStrategy::Spin => std::hint::spin_loop(),
            IdleStrategy::Yield => std::thread::yield_now(),
            IdleStrategy::Sleep(duration) => std::thread::sleep(*duration),
            IdleStrategy::Backoff {
                max_spins,
                max_yields,
                min_park,
                max_park,
            } => {
                if self.spins < *max_spins {
                    self.spins += 1;
                    std::hint::spin_loop();
                } else if self.yields < *max_yields {
                    self.yields += 1;
                    std::thread::yield_now();
                } else {
                    if self.park.is_zero() {
                        self.park = *min_park;
                    }
                    std::thread::sleep(self.park);
                    self.park = (self.park * 2).min(*max_park);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park = Duration::ZERO;
    }
}

/// Runs an agent on a dedicated thread until stopped.
pub struct AgentRunner {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    role_name: String,
}

impl AgentRunner {
    /// Spawn the agent loop on a named thread.
    pub fn start<A: Agent + Send + 'static>(
        mut agent: A,
        strategy: IdleStrategy,
    ) -> HermesResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_flag = Arc::clone(&running);
        let role_name = agent.role_name().to_string();

        let handle = std::thread::Builder::new()
            .name(role_name.clone())
            .spawn(move || {
                let mut idler = Idler::new(strategy);
                log::info!("agent '{}' started", agent.role_name());

                while thread_flag.load(Ordering::Acquire) {
                    match agent.do_work() {
                        Ok(work_count) => idler.idle(work_count),
                        Err(HermesError::Terminated) => {
                            log::info!("agent '{}' terminating", agent.role_name());
                            break;
                        }
                        Err(e) => {
                            log::error!("agent '{}' failed: {}", agent.role_name(), e);
                            break;
                        }
                    }
                }

                agent.on_close();
                log::info!("agent '{}' stopped", agent.role_name());
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
            role_name,
        })
    }

    /// Request the agent stop and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("agent '{}' panicked", self.role_name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingAgent {
        cycles: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
        terminate_after: Option<usize>,
    }

    impl Agent for CountingAgent {
        fn do_work(&mut self) -> HermesResult<usize> {
            let n = self.cycles.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.terminate_after {
                if n >= limit {
                    return Err(HermesError::Terminated);
                }
            }
            Ok(1)
        }

        fn on_close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn role_name(&self) -> &str {
            "counting-agent"
        }
    }

    #[test]
    fn runner_drives_and_stops_agent() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let mut runner = AgentRunner::start(
            CountingAgent {
                cycles: Arc::clone(&cycles),
                closed: Arc::clone(&closed),
                terminate_after: None,
            },
            IdleStrategy::Yield,
        )
        .unwrap();

        while cycles.load(Ordering::SeqCst) < 10 {
            std::thread::yield_now();
        }
        runner.stop();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn terminate_result_exits_cleanly() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let mut runner = AgentRunner::start(
            CountingAgent {
                cycles: Arc::clone(&cycles),
                closed: Arc::clone(&closed),
                terminate_after: Some(3),
            },
            IdleStrategy::Spin,
        )
        .unwrap();

        // The agent self-terminates; stop() just joins.
        while !closed.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        runner.stop();
        assert!(cycles.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn idler_backs_off_and_resets() {
        let mut idler = Idler::new(IdleStrategy::Backoff {
            max_spins: 2,
            max_yields: 2,
            min_park: Duration::from_nanos(1),
            max_park: Duration::from_nanos(8),
        });

        for _ in 0..8 {
            idler.idle(0);
        }
        assert!(idler.park > Duration::ZERO);
        idler.idle(5);
        assert!(idler.park.is_zero());
    }
}
