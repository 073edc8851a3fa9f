mod error;
mod shutdown;

pub mod prelude {
    pub use crate::error::{ConfigurationError, ShutdownTimeoutError, TransportError};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
}
