use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{InspectContainerOptions, ListContainersOptions};

use super::{
    ContainerDescriptor, ContainerRuntime, ContainerSummary, Error, Result, RuntimeConnector,
};

/// Default location of the Docker daemon socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Creates [`DockerClient`]s for a daemon socket.
#[derive(Debug, Clone)]
pub struct DockerConnector {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DockerConnector {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }
}

impl RuntimeConnector for DockerConnector {
    type Runtime = DockerClient;

    async fn connect(&self) -> Result<DockerClient> {
        let path = self.socket_path.to_string_lossy().into_owned();
        let docker = Docker::connect_with_unix(
            &path,
            self.timeout.as_secs().max(1),
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|source| Error::Docker {
            operation: "connect",
            source,
        })?;

        let client = DockerClient {
            docker,
            timeout: self.timeout,
        };
        client.ping().await?;
        log::debug!("Docker daemon at `{path}` answered ping");
        Ok(client)
    }
}

/// Docker Engine API client bound to one daemon socket.
///
/// Every call is cut off after the configured timeout.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
    timeout: Duration,
}

impl DockerClient {
    /// Checks that the daemon answers `GET /_ping`.
    pub async fn ping(&self) -> Result<()> {
        self.call("ping", self.docker.ping()).await.map(|_| ())
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = std::result::Result<T, bollard::errors::Error>>,
    ) -> Result<T> {
        log::trace!("Docker API call `{operation}`");
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                timeout: self.timeout,
            })?
            .map_err(|source| Error::Docker { operation, source })
    }
}

impl ContainerRuntime for DockerClient {
    async fn list_running(&self) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self
            .call("list containers", self.docker.list_containers(Some(options)))
            .await?;
        Ok(summaries.into_iter().map(ContainerSummary::from).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDescriptor> {
        self.call(
            "inspect container",
            self.docker
                .inspect_container(id, None::<InspectContainerOptions>),
        )
        .await
        .map(ContainerDescriptor::from)
    }
}

/// Resolves a `DOCKER_HOST` style value to a socket path.
///
/// Accepts `unix:///path` and bare absolute paths; returns `None` for any other
/// scheme.
pub fn socket_path_from_host(host: &str) -> Option<PathBuf> {
    let host = host.trim();
    if let Some(path) = host.strip_prefix("unix://") {
        return (!path.is_empty()).then(|| PathBuf::from(path));
    }
    if host.starts_with('/') {
        return Some(PathBuf::from(host));
    }
    None
}
