use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::domain::FileRecord;
use crate::error::FetchError;
use crate::portal::PortalClient;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl WaitPolicy {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Restored,
    TimedOut,
    Failed(FetchError),
}

pub fn wait_for_restore<P, C>(
    portal: &P,
    clock: &C,
    policy: WaitPolicy,
    record: &FileRecord,
) -> Result<RestoreOutcome, FetchError>
where
    P: PortalClient + ?Sized,
    C: Clock + ?Sized,
{
    let started = clock.now();
    let ticket = match portal.request_restore(record) {
        Ok(ticket) => ticket,
        Err(err @ FetchError::Auth { .. }) => return Err(err),
        Err(err) => return Ok(RestoreOutcome::Failed(err)),
    };
    debug!(file_id = %ticket.file_id, "restore requested, polling");

    loop {
        let elapsed = clock.now().duration_since(started);
        if elapsed >= policy.max_wait {
            return Ok(RestoreOutcome::TimedOut);
        }
        clock.sleep(policy.poll_interval.min(policy.max_wait - elapsed));

        match portal.poll_status(&ticket) {
            Ok(status) if status.is_downloadable() => return Ok(RestoreOutcome::Restored),
            Ok(status) => {
                debug!(file_id = %ticket.file_id, %status, "restore still pending");
            }
            Err(err @ FetchError::Auth { .. }) => return Err(err),
            Err(FetchError::TransientNetwork(message)) => {
                warn!(file_id = %ticket.file_id, %message, "restore poll failed, will retry");
            }
            Err(err) => return Ok(RestoreOutcome::Failed(err)),
        }
    }
}
