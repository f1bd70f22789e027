//! Scheduler-token discipline.
//!
//! The host runs its kernel on a single virtual CPU. Code entering from the
//! host holds that CPU and must give it up before anything that can block the
//! thread, then take it back before touching host state again. The guards in
//! this module tie the give-back to scope exit so no path can forget it.

/// The host's virtual-CPU token.
pub trait Scheduler: Send + Sync + 'static {
    /// Whatever `unschedule` hands back to be passed to `schedule` later.
    type Cookie: Send;

    /// Give up the CPU held by the calling thread.
    fn unschedule(&self) -> Self::Cookie;

    /// Take a CPU. `None` means the thread held none before (a helper thread).
    fn schedule(&self, cookie: Option<Self::Cookie>);

    /// Called once on a helper thread before it does anything else.
    fn enter_kthread(&self) {}

    /// Called once on a helper thread right before it exits.
    fn leave_kthread(&self) {}
}

/// Token released for the guard's lifetime; reacquired on drop.
#[must_use = "the token is reacquired as soon as the guard is dropped"]
pub struct Unscheduled<'s, S: Scheduler + ?Sized> {
    sched: &'s S,
    cookie: Option<S::Cookie>,
}

impl<S: Scheduler + ?Sized> Drop for Unscheduled<'_, S> {
    fn drop(&mut self) {
        self.sched.schedule(self.cookie.take());
    }
}

/// Token held for the guard's lifetime; released on drop.
///
/// Used by helper threads, which normally run without the token.
#[must_use = "the token is released as soon as the guard is dropped"]
pub struct Scheduled<'s, S: Scheduler + ?Sized> {
    sched: &'s S,
}

impl<S: Scheduler + ?Sized> Drop for Scheduled<'_, S> {
    fn drop(&mut self) {
        let _ = self.sched.unschedule();
    }
}

/// Scoped acquire/release on top of [`Scheduler`].
pub trait SchedulerExt: Scheduler {
    /// Release the token until the returned guard is dropped.
    fn release(&self) -> Unscheduled<'_, Self> {
        let cookie = self.unschedule();
        Unscheduled {
            sched: self,
            cookie: Some(cookie),
        }
    }

    /// Acquire the token until the returned guard is dropped.
    fn hold(&self) -> Scheduled<'_, Self> {
        self.schedule(None);
        Scheduled { sched: self }
    }
}

impl<S: Scheduler + ?Sized> SchedulerExt for S {}

/// For hosts without a token.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    type Cookie = ();

    fn unschedule(&self) {}

    fn schedule(&self, _cookie: Option<()>) {}
}
