use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Docker API call `{operation}` failed: {source}")]
    Docker {
        operation: &'static str,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("Docker API call `{operation}` did not answer within {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
