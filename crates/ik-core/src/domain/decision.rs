//! Decision model: what the dispatcher does after a pipeline failure.
//!
//! `Decider` is a pure function of the error and the message's redelivery
//! count. Carrying the decision out (lifecycle transitions, log
//! persistence, notifications, requeue) is the dispatcher's job.

use std::time::Duration;

use super::errors::TaskError;

/// Retry budget shared by every readiness-type failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Instruction handed back to the transport after a message was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryDirective {
    pub requeue: bool,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl RedeliveryDirective {
    /// Processing finished; drop the message.
    pub fn complete() -> Self {
        Self {
            requeue: false,
            delay: Duration::ZERO,
            max_attempts: 0,
        }
    }

    pub fn retry(policy: RetryPolicy) -> Self {
        Self {
            requeue: true,
            delay: policy.delay,
            max_attempts: policy.max_retries,
        }
    }
}

/// Next action after a pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Ask the transport to redeliver. `transition` says whether the
    /// entity moves through `make_retry` first.
    Retry {
        directive: RedeliveryDirective,
        transition: bool,
    },

    /// A retryable failure ran out of budget.
    TimedOut,

    /// Give up right away. `mark_failed` is false when the controller asked
    /// for the entity to be left as is.
    Fail { mark_failed: bool },
}

pub trait Decider: Send + Sync {
    /// `retries` is how many times the message was already redelivered.
    fn decide(&self, error: &TaskError, retries: u32) -> Decision;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn retry_or_time_out(&self, retries: u32, transition: bool) -> Decision {
        if retries >= self.policy.max_retries {
            Decision::TimedOut
        } else {
            Decision::Retry {
                directive: RedeliveryDirective::retry(self.policy),
                transition,
            }
        }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, error: &TaskError, retries: u32) -> Decision {
        match error {
            TaskError::ParentNotReady(_) | TaskError::ChildrenNotReady(_) => {
                self.retry_or_time_out(retries, true)
            }
            // The entity was never touched by this attempt, so there is
            // nothing to move back to ERROR.
            TaskError::WrongState(_) => self.retry_or_time_out(retries, false),
            TaskError::CannotProceed(_) | TaskError::Assertion(_) | TaskError::Unexpected(_) => {
                Decision::Fail { mark_failed: true }
            }
            TaskError::ExitWithoutSave(_) => Decision::Fail { mark_failed: false },
        }
    }
}
