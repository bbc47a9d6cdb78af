/// A rejected configuration value. Never fatal: the caller logs it and falls
/// back to the default.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`{var}`: `{value}` is not a positive integer")]
    NotAPositiveInteger { var: &'static str, value: String },
    #[error("`{var}`: `{value}` is not an integer")]
    NotAnInteger { var: &'static str, value: String },
    #[error("`{var}`: `{value}` is not a boolean (expected true or false)")]
    NotABoolean { var: &'static str, value: String },
    #[error("`{var}`: `{value}` is not a socket address: {source}")]
    InvalidAddress {
        var: &'static str,
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("`{var}`: `{value}` is not a unix socket (only `unix://` hosts are supported)")]
    UnsupportedDockerHost { var: &'static str, value: String },
    #[error("`{var}`: `{value}` is not a valid metric name prefix")]
    InvalidNamespace { var: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
