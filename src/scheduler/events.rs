use crate::net::Marking;

/// Observer hooks called synchronously from inside a tick, while the
/// instance's lock is held. Implementations must not block.
pub trait SchedulerEvents: Send + Sync {
    /// A transition fired; `marking` is the marking after it.
    fn on_fire(&self, _instance: &str, _transition: &str, _marking: &Marking) {}

    fn on_complete(&self, _instance: &str, _marking: &Marking) {}

    /// An execute effect failed and the instance is now failed.
    fn on_error(&self, _instance: &str, _error: &str) {}

    /// A deadline elapsed and one token went to `target_place`.
    fn on_timeout(&self, _instance: &str, _transition: &str, _target_place: &str) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl SchedulerEvents for NoEvents {}
