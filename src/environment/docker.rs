//! Docker-backed [`ContainerRuntime`] using `bollard`.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use bollard::Docker;
use tracing::{debug, warn};

use super::runtime::{ContainerRuntime, EnvironmentSpec};
use crate::models::environment::EnvironmentInfo;
use crate::{AppError, Result};

/// Container runtime talking to the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    image: String,
}

impl DockerRuntime {
    /// Connect with the platform defaults (`DOCKER_HOST` or the local socket).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Container` if the client cannot be configured.
    pub fn connect(image: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            image: image.into(),
        })
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let filters = HashMap::from([("ancestor".to_owned(), vec![self.image.clone()])]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;
        Ok(summaries.into_iter().filter_map(|s| s.id).collect())
    }
}

/// Host ports from a container's configured bindings.
fn host_ports(response: &ContainerInspectResponse) -> Vec<u16> {
    let Some(bindings) = response
        .host_config
        .as_ref()
        .and_then(|hc| hc.port_bindings.as_ref())
    else {
        return Vec::new();
    };

    bindings
        .values()
        .flatten()
        .flatten()
        .filter_map(|binding| binding.host_port.as_deref())
        .filter_map(|port| port.parse().ok())
        .collect()
}

impl ContainerRuntime for DockerRuntime {
    fn list_bound_ports(&self) -> Pin<Box<dyn Future<Output = Result<BTreeSet<u16>>> + Send + '_>> {
        Box::pin(async move {
            let mut bound = BTreeSet::new();
            for id in self.list_ids().await? {
                match self
                    .docker
                    .inspect_container(&id, None::<InspectContainerOptions>)
                    .await
                {
                    Ok(response) => bound.extend(host_ports(&response)),
                    // Removed between list and inspect.
                    Err(err) => debug!(container_id = %id, %err, "skipping container"),
                }
            }
            Ok(bound)
        })
    }

    fn create(
        &self,
        spec: EnvironmentSpec,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let mut exposed_ports = HashMap::new();
            let mut port_bindings = HashMap::new();
            for (container_port, host_port) in &spec.port_bindings {
                let key = format!("{container_port}/tcp");
                exposed_ports.insert(key.clone(), HashMap::new());
                port_bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                );
            }

            let host_config = HostConfig {
                port_bindings: Some(port_bindings),
                extra_hosts: Some(vec!["host.docker.internal:host-gateway".to_owned()]),
                ..Default::default()
            };

            let config = Config {
                image: Some(spec.image.clone()),
                env: Some(spec.env.clone()),
                exposed_ports: Some(exposed_ports),
                host_config: Some(host_config),
                ..Default::default()
            };

            let options = CreateContainerOptions {
                name: spec.name.clone(),
                ..Default::default()
            };

            let response = self
                .docker
                .create_container(Some(options), config)
                .await
                .map_err(|e| match e {
                    DockerError::DockerResponseServerError {
                        status_code: 409,
                        message,
                    } => AppError::Conflict(format!("environment name {} in use: {message}", spec.name)),
                    other => AppError::Container(format!("create {}: {other}", spec.name)),
                })?;

            for warning in &response.warnings {
                warn!(container = %spec.name, %warning, "container created with warning");
            }
            Ok(response.id)
        })
    }

    fn start(&self, id: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move {
            self.docker
                .start_container(&id, None::<StartContainerOptions<String>>)
                .await?;
            Ok(())
        })
    }

    fn remove(&self, name_or_id: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name_or_id = name_or_id.to_owned();
        Box::pin(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            match self.docker.remove_container(&name_or_id, Some(options)).await {
                Ok(()) | Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
                Err(err) => Err(AppError::Container(format!("remove {name_or_id}: {err}"))),
            }
        })
    }

    fn inspect(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EnvironmentInfo>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move {
            let response = self
                .docker
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await?;

            let state = response.state.as_ref();
            let running = state.and_then(|s| s.running).unwrap_or(false);
            let status = state
                .and_then(|s| s.status)
                .map_or_else(|| "unknown".to_owned(), |s| s.to_string());

            Ok(EnvironmentInfo {
                id: response.id.clone().unwrap_or(id),
                running,
                status,
                host_ports: host_ports(&response),
            })
        })
    }
}
