//! Completion wait policies for DMA transfers.
//!
//! The wire protocol has no timeout: the device clears the descriptor when
//! it is done and never says anything otherwise. A policy decides how long
//! the caller keeps spinning and what it does between two polls.

/// Decides whether a DMA transfer keeps waiting after `polls` observations
/// of a still-pending descriptor.
pub trait PollPolicy {
    fn keep_waiting(&mut self, polls: u32) -> bool;
}

impl<P: PollPolicy + ?Sized> PollPolicy for &mut P {
    fn keep_waiting(&mut self, polls: u32) -> bool {
        (**self).keep_waiting(polls)
    }
}

/// Busy-wait with an optional poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spin {
    max_polls: Option<u32>,
}

impl Spin {
    /// Gives up once `max_polls` observations saw the transfer pending.
    pub const fn bounded(max_polls: u32) -> Self {
        Self {
            max_polls: Some(max_polls),
        }
    }

    /// Waits forever, as the bare protocol does.
    pub const fn unbounded() -> Self {
        Self { max_polls: None }
    }

    pub fn max_polls(&self) -> Option<u32> {
        self.max_polls
    }

    /// Runs `hook` between polls, e.g. a delay or a scheduler yield.
    pub fn with_hook<F: FnMut(u32)>(self, hook: F) -> WithHook<Self, F> {
        WithHook { inner: self, hook }
    }
}

impl PollPolicy for Spin {
    fn keep_waiting(&mut self, polls: u32) -> bool {
        if let Some(max) = self.max_polls {
            if polls >= max {
                return false;
            }
        }
        core::hint::spin_loop();
        true
    }
}

/// A policy that additionally calls a hook each time it decides to wait.
pub struct WithHook<P, F> {
    inner: P,
    hook: F,
}

impl<P: PollPolicy, F: FnMut(u32)> PollPolicy for WithHook<P, F> {
    fn keep_waiting(&mut self, polls: u32) -> bool {
        if !self.inner.keep_waiting(polls) {
            return false;
        }
        (self.hook)(polls);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_spin_stops_at_budget() {
        let mut spin = Spin::bounded(3);
        assert!(spin.keep_waiting(1));
        assert!(spin.keep_waiting(2));
        assert!(!spin.keep_waiting(3));
    }

    #[test]
    fn unbounded_spin_never_gives_up() {
        let mut spin = Spin::unbounded();
        assert!(spin.keep_waiting(u32::MAX));
    }

    #[test]
    fn hook_runs_only_while_waiting() {
        let mut calls = 0u32;
        {
            let mut policy = Spin::bounded(2).with_hook(|_| calls += 1);
            assert!(policy.keep_waiting(1));
            assert!(!policy.keep_waiting(2));
        }
        assert_eq!(calls, 1);
    }
}
