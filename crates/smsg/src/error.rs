use thiserror::Error;

/// Convenience result alias for channel operations.
pub type SmsgResult<T> = Result<T, SmsgError>;

/// Failure modes of the channel layer.
///
/// Nothing here is fatal to the endpoint as a whole: ring-full and
/// cache-full conditions recover locally as observable drops, lifecycle
/// errors roll the affected channel back, and at worst a single channel
/// becomes unusable.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SmsgError {
    #[error("channel {0} is not registered on this endpoint")]
    NotFound(u8),

    #[error("channel {0} is not in a state that allows this operation")]
    InvalidState(u8),

    #[error("resource is busy, retry later")]
    Busy,

    #[error("outbound ring is full")]
    RingFull,

    #[error("wait expired before a record arrived")]
    Timeout,

    #[error("channel was closed while waiting")]
    Closed,

    #[error("no record buffered")]
    NoData,

    #[error("endpoint is not initialised")]
    NoDevice,
}
