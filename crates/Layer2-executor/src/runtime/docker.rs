//! Docker runtime over the daemon's HTTP API

use super::{
    ContainerRuntime, ContainerSpec, ExitStatus, LogChunk, ObjectKind, RuntimeError,
    RuntimeObject,
};
use async_stream::stream;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{DeviceRequest, HostConfig, Mount, MountTypeEnum};
use bollard::network::ListNetworksOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Seconds before a daemon request is abandoned
const CONNECT_TIMEOUT_SECS: u64 = 120;

const DEFAULT_TAG: &str = "latest";

/// Docker client shared by every shard on the node
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to `docker_host` (`unix://`, `tcp://` or `http://`), or to the
    /// local defaults when unset
    pub fn connect(docker_host: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match docker_host {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => {
                let address = host.replacen("tcp://", "http://", 1);
                Docker::connect_with_http(&address, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(Self { docker })
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        let mounts = spec
            .mounts
            .iter()
            .map(|m| Mount {
                typ: Some(MountTypeEnum::BIND),
                source: Some(m.source.to_string_lossy().into_owned()),
                target: Some(m.target.clone()),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let device_requests: Vec<DeviceRequest> = spec
            .limits
            .device_requests
            .iter()
            .map(|d| DeviceRequest {
                count: Some(i64::try_from(d.count).unwrap_or(i64::MAX)),
                capabilities: Some(d.capabilities.clone()),
                ..Default::default()
            })
            .collect();

        HostConfig {
            mounts: Some(mounts),
            memory: positive(spec.limits.memory_bytes),
            nano_cpus: positive(spec.limits.nano_cpus),
            device_requests: (!device_requests.is_empty()).then_some(device_requests),
            network_mode: (!spec.network_mode.is_empty()).then(|| spec.network_mode.clone()),
            ..Default::default()
        }
    }
}

/// Zero means "no limit" to the daemon; leave it unset instead
fn positive(value: i64) -> Option<i64> {
    (value > 0).then_some(value)
}

/// Split an image reference into `(repository, tag)`, defaulting the tag.
/// Digest references keep the digest as the tag.
pub fn split_image_reference(image: &str) -> (String, String) {
    if let Some((repo, digest)) = image.split_once('@') {
        return (repo.to_string(), digest.to_string());
    }
    // A colon after the last slash separates the tag; one before it is a registry port
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), DEFAULT_TAG.to_string()),
    }
}

fn map_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError { message, .. } => RuntimeError::Api(message),
        other => RuntimeError::Api(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (repository, tag) = split_image_reference(image);
        debug!(%repository, %tag, "Pulling image");

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };
        let mut progress = Box::pin(self.docker.create_image(Some(options), None, None));
        while let Some(info) = progress.next().await {
            let info = info.map_err(map_error)?;
            if let Some(message) = info.error {
                return Err(RuntimeError::Api(message));
            }
            trace!(status = ?info.status, "Pull progress");
        }
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, RuntimeError> {
        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
            env: Some(spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            labels: Some(spec.labels.clone()),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;
        for warning in &response.warnings {
            debug!(container = %response.id, %warning, "Create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    fn follow_logs(&self, id: &str) -> BoxStream<'static, Result<LogChunk, RuntimeError>> {
        let docker = self.docker.clone();
        let id = id.to_string();

        Box::pin(stream! {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut logs = Box::pin(docker.logs(&id, Some(options)));
            while let Some(item) = logs.next().await {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        yield Ok(LogChunk::Stdout(message.to_vec()));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        yield Ok(LogChunk::Stderr(message.to_vec()));
                    }
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => {
                        yield Err(map_error(e));
                        break;
                    }
                }
            }
        })
    }

    async fn wait_container(&self, id: &str) -> Result<ExitStatus, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut waits = Box::pin(self.docker.wait_container(id, Some(options)));

        match waits.next().await {
            Some(Ok(response)) => Ok(ExitStatus {
                code: response.status_code,
                error: response.error.and_then(|e| e.message),
            }),
            // Non-zero exits arrive as errors from the client
            Some(Err(BollardError::DockerContainerWaitError { error, code })) => Ok(ExitStatus {
                code,
                error: (!error.is_empty()).then_some(error),
            }),
            Some(Err(e)) => Err(map_error(e)),
            None => Err(RuntimeError::Api(format!(
                "wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    async fn list_objects(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<RuntimeObject>, RuntimeError> {
        let filter = HashMap::from([("label".to_string(), vec![format!("{}={}", key, value)])]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters: filter.clone(),
                ..Default::default()
            }))
            .await
            .map_err(map_error)?;
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions::<String> { filters: filter }))
            .await
            .map_err(map_error)?;

        let containers = containers.into_iter().filter_map(|c| {
            Some(RuntimeObject {
                kind: ObjectKind::Container,
                id: c.id?,
                labels: c.labels.unwrap_or_default(),
            })
        });
        let networks = networks.into_iter().filter_map(|n| {
            Some(RuntimeObject {
                kind: ObjectKind::Network,
                id: n.id?,
                labels: n.labels.unwrap_or_default(),
            })
        });
        Ok(containers.chain(networks).collect())
    }

    async fn remove_object(&self, kind: ObjectKind, id: &str) -> Result<(), RuntimeError> {
        match kind {
            ObjectKind::Container => self
                .docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(map_error),
            ObjectKind::Network => self.docker.remove_network(id).await.map_err(map_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounts::MountEntry;
    use crate::resources::{translate, ResourceRequirements};
    use std::path::PathBuf;

    #[test]
    fn test_split_image_reference() {
        let cases = [
            ("ubuntu", ("ubuntu", "latest")),
            ("ubuntu:22.04", ("ubuntu", "22.04")),
            ("localhost:5000/team/app", ("localhost:5000/team/app", "latest")),
            ("localhost:5000/team/app:v2", ("localhost:5000/team/app", "v2")),
            ("alpine@sha256:abcd", ("alpine", "sha256:abcd")),
        ];
        for (image, (repo, tag)) in cases {
            assert_eq!(
                split_image_reference(image),
                (repo.to_string(), tag.to_string()),
                "{}",
                image
            );
        }
    }

    #[test]
    fn test_host_config_translation() {
        let spec = ContainerSpec {
            image: "alpine".into(),
            mounts: vec![MountEntry {
                source: PathBuf::from("/host/in"),
                target: "/data/in".into(),
                read_only: true,
            }],
            limits: translate(&ResourceRequirements::new(0.5, 134_217_728, 1)),
            network_mode: "none".into(),
            ..Default::default()
        };

        let host = DockerRuntime::host_config(&spec);
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.memory, Some(134_217_728));
        assert_eq!(host.network_mode.as_deref(), Some("none"));

        let mounts = host.mounts.unwrap();
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::BIND));
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(mounts[0].source.as_deref(), Some("/host/in"));

        let devices = host.device_requests.unwrap();
        assert_eq!(devices[0].count, Some(1));
        assert_eq!(devices[0].device_ids, None);
    }

    #[test]
    fn test_no_limits_left_unset() {
        let host = DockerRuntime::host_config(&ContainerSpec::default());
        assert_eq!(host.nano_cpus, None);
        assert_eq!(host.memory, None);
        assert_eq!(host.device_requests, None);
    }

    #[test]
    fn test_not_found_mapping() {
        let err = map_error(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".into(),
        });
        assert!(err.is_not_found());

        let err = map_error(BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".into(),
        });
        assert_eq!(err, RuntimeError::Api("boom".into()));
    }
}
