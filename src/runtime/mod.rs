//! Access to the container runtime.
//!
//! The collector only depends on the two traits below; [`docker`] implements
//! them with `bollard` against the Docker Engine API on a unix socket.
use std::future::Future;

pub mod docker;
mod error;
mod models;

pub use docker::{DockerClient, DockerConnector};
pub use error::{Error, Result};
pub use models::{
    ContainerConfig, ContainerDescriptor, ContainerState, ContainerSummary, HealthReport,
};

/// Opens connections to a container runtime.
pub trait RuntimeConnector: Send + Sync + 'static {
    type Runtime: ContainerRuntime;

    /// Establishes a connection, failing if the runtime is unreachable.
    fn connect(&self) -> impl Future<Output = Result<Self::Runtime>> + Send;
}

/// A connected container runtime.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Lists running containers, in the order reported by the runtime.
    fn list_running(&self) -> impl Future<Output = Result<Vec<ContainerSummary>>> + Send;

    /// Fetches the full descriptor of one container.
    fn inspect(&self, id: &str) -> impl Future<Output = Result<ContainerDescriptor>> + Send;
}
