// Layerz Event Providers
// The boundary between the engine and the outside world.

pub mod device;
pub mod sim;
pub mod stdio;

pub use device::{DeviceError, DeviceProvider};
pub use sim::SimProvider;
pub use stdio::StdioProvider;

use crate::Event;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors on the provider boundary. All of these are fatal to the event
/// stream; recoverable conditions surface as `Ok(None)` from `read_event`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read: got {got} of {want} bytes (input stream corrupt)")]
    ShortRead { got: usize, want: usize },
}

/// The two operations the engine needs from the outside world.
///
/// `read_event` pulls the next event, or `None` on timeout or
/// end-of-stream; a `timeout_ms` of 0 means poll indefinitely.
/// `write_event` pushes one event downstream; failure is fatal.
pub trait EventProvider {
    fn read_event(&mut self, timeout_ms: u32) -> ProviderResult<Option<Event>>;
    fn write_event(&mut self, event: Event) -> ProviderResult<()>;
}
