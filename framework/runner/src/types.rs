/// Recommended error type for your scenario `main` function and for the code that builds a
/// transport. You can use `?` on any error type in it, including [crate::prelude::ConfigurationError].
pub type StampedeResult<T> = anyhow::Result<T>;
