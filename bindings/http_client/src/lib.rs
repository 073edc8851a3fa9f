mod client;

pub mod prelude {
    pub use crate::client::{http_transport, HttpClient};

    /// Re-export of the `stampede_runner` prelude.
    ///
    /// This is for convenience so that you can depend on a single crate for the runner in your scenarios.
    pub use stampede_runner::prelude::*;
}
