//! Collaborator seams: the notification doorbell and platform power control.
//!
//! Both are implemented by hardware-specific code outside this crate; the
//! endpoint only depends on these call contracts.

use crate::msg::Timeout;
use crate::SmsgResult;
use std::time::Duration;

/// Outbound notification: tell the peer its inbound ring has data.
///
/// The inbound direction is the peer's upcall into
/// [`Endpoint::on_notified`](crate::Endpoint::on_notified), wired up by the
/// same hardware glue.
pub trait Doorbell: Send + Sync {
    fn ring(&self);
}

/// Platform power-management contract.
pub trait PowerControl: Send + Sync {
    /// Acquires the send permit, making the shared window accessible. The
    /// only bounded wait inside `send` happens here.
    fn request_tx(&self, timeout: Timeout) -> SmsgResult<()>;

    /// Releases the send permit; called on every send path, success or not.
    fn release_tx(&self);

    /// Defers low-power idle for `duration` so a consumer can run before
    /// the processor sleeps on freshly delivered records.
    fn hold(&self, duration: Duration);

    /// Drops an activity hold early once the consumer has caught up.
    fn release(&self);
}

/// Doorbell that drops notifications; for endpoints pumped by polling.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDoorbell;

impl Doorbell for NoopDoorbell {
    fn ring(&self) {}
}

/// Power control for platforms (and tests) without idle management; the
/// send permit is always available.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPower;

impl PowerControl for NoopPower {
    fn request_tx(&self, _timeout: Timeout) -> SmsgResult<()> {
        Ok(())
    }

    fn release_tx(&self) {}

    fn hold(&self, _duration: Duration) {}

    fn release(&self) {}
}
