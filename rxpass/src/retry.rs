//! Fire-until-acknowledged retry loop.
//!
//! Every request/response exchange of the handshake has the same shape: send
//! a request, poll the receive queue at a fine granularity, resend at a
//! coarse one, and give up after a fixed number of sends. [`resend_until`]
//! captures that shape once; each call site supplies its own budget
//! ([`RetryPolicy`]) and its own match predicate (the `poll` closure).
//!
//! Replies are matched by content, not by which send provoked them, so a late
//! reply to an early request still counts.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Default receive-queue poll granularity.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Attempt budget and timing for one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of times the request is sent.
    pub attempts: u32,
    /// Time between sends.
    pub resend_interval: Duration,
    /// Time between receive-queue polls.
    pub poll_interval: Duration,
}

impl RetryPolicy {
    /// Policy with the default 10 ms poll interval.
    pub const fn new(attempts: u32, resend_interval: Duration) -> Self {
        Self {
            attempts,
            resend_interval,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wall-clock time after which the exchange gives up.
    pub fn budget(&self) -> Duration {
        self.resend_interval * self.attempts
    }
}

/// Send, poll and resend until `poll` yields a value or the budget is spent.
///
/// Both closures get `ctx` (typically the link) so they can share it. `send`
/// also receives the 1-based attempt number. The last send still gets a full
/// `resend_interval` to be answered. Returns `Ok(None)` when the budget runs
/// out; errors from either closure abort immediately.
pub fn resend_until<C, T, S, P>(
    policy: &RetryPolicy,
    ctx: &mut C,
    mut send: S,
    mut poll: P,
) -> Result<Option<T>>
where
    C: ?Sized,
    S: FnMut(&mut C, u32) -> Result<()>,
    P: FnMut(&mut C) -> Result<Option<T>>,
{
    let mut attempt = 0;
    let mut last_send: Option<Instant> = None;

    loop {
        if last_send.is_none_or(|t| t.elapsed() >= policy.resend_interval) {
            if attempt >= policy.attempts {
                return Ok(None);
            }
            attempt += 1;
            send(ctx, attempt)?;
            last_send = Some(Instant::now());
        }

        thread::sleep(policy.poll_interval);

        if let Some(value) = poll(ctx)? {
            return Ok(Some(value));
        }
    }
}

/// Poll without sending until `poll` yields a value or `timeout` elapses.
pub fn poll_until<T, P>(timeout: Duration, poll_interval: Duration, mut poll: P) -> Result<Option<T>>
where
    P: FnMut() -> Result<Option<T>>,
{
    let start = Instant::now();
    loop {
        if let Some(value) = poll()? {
            return Ok(Some(value));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(poll_interval);
    }
}
