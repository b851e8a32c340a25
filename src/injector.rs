//! Crash Injector
//!
//! Waits for the workload-start signal, applies the delay policy, and
//! hard-kills the server exactly once. Zero delay stresses the write path
//! (kill mid-write); a longer delay stresses the checkpoint/flush path (kill
//! after the write likely committed). Which side of the race wins is
//! intentionally nondeterministic; only the ordering "start before kill" is
//! guaranteed.

use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::errors::HarnessResult;
use crate::server::{ServerController, ServerHandle};

/// Delay policy between the workload-start signal and the kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillDelay {
    /// Kill as soon as the workload is observed to have started
    Immediate,
    /// Fixed delay after the start signal
    Fixed(Duration),
    /// Uniform random delay in `[0, max]`, chosen per run
    Jittered(Duration),
}

impl KillDelay {
    /// Resolve the policy to a concrete delay for this run.
    pub fn pick(&self) -> Duration {
        match self {
            KillDelay::Immediate => Duration::ZERO,
            KillDelay::Fixed(d) => *d,
            KillDelay::Jittered(max) => {
                let nanos = max.as_nanos().min(u128::from(u64::MAX)) as u64;
                if nanos == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
                }
            }
        }
    }
}

impl Default for KillDelay {
    fn default() -> Self {
        KillDelay::Immediate
    }
}

/// Injects exactly one hard kill per scenario run.
#[derive(Debug, Clone, Copy)]
pub struct CrashInjector {
    delay: KillDelay,
}

impl CrashInjector {
    pub fn new(delay: KillDelay) -> Self {
        CrashInjector { delay }
    }

    pub fn delay(&self) -> KillDelay {
        self.delay
    }

    /// Wait for `started`, wait out the delay, then kill.
    ///
    /// A dropped sender means the workload task died before signalling; the
    /// kill still proceeds so the run terminates instead of hanging, and the
    /// recovered state is still checked.
    pub async fn inject_after(
        &self,
        controller: &ServerController,
        handle: &mut ServerHandle,
        started: oneshot::Receiver<()>,
    ) -> HarnessResult<()> {
        match started.await {
            Ok(()) => debug!("workload start observed"),
            Err(_) => debug!("workload task ended without signalling; proceeding to kill"),
        }

        let delay = self.delay.pick();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        info!(port = handle.port(), ?delay, "injecting hard kill");
        controller.kill_hard(handle).await
    }
}
