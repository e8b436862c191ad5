//! Promise handles for asynchronous driver operations

use async_trait::async_trait;

use super::DriverError;

/// Completion handle for one issued driver operation.
///
/// Contract: every promise is waited exactly once and then released exactly
/// once. Use [`settle`] rather than calling the two halves by hand.
#[async_trait]
pub trait Promise: Send {
    /// Suspend until the operation completes
    async fn wait(&mut self) -> Result<(), DriverError>;

    /// Hand the promise back to the driver
    fn release(self: Box<Self>);
}

/// Wait for `promise` and release it, returning the operation's outcome.
///
/// This is the only suspension point per driver call. The promise is released
/// on both the success and the rejection path.
pub async fn settle(mut promise: Box<dyn Promise>) -> Result<(), DriverError> {
    let outcome = promise.wait().await;
    promise.release();
    outcome
}
