//! Deployment manifests.
//!
//! A manifest is the operator-facing form of a `DesiredSpec`, read from a
//! YAML or TOML file. Replica counts are signed here so that a negative
//! value is reported as invalid instead of failing to parse.

use std::collections::BTreeMap;
use std::path::Path;

use converge_types::{DesiredSpec, ImageRef, InvalidSpec, ProbeConfig, ResourceRequirements};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, DaemonResult};

/// A workload declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    /// Workload name
    pub name: String,

    /// Desired number of instances
    pub replicas: i64,

    /// Image as `name[:tag]`; the tag defaults to `latest`
    pub image: String,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default = "ProbeConfig::readiness_default")]
    pub readiness: ProbeConfig,

    #[serde(default = "ProbeConfig::liveness_default")]
    pub liveness: ProbeConfig,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl DeploymentManifest {
    /// Read a manifest, choosing the format from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> DaemonResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn from_yaml(content: &str) -> DaemonResult<Self> {
        serde_yaml::from_str(content).map_err(|e| DaemonError::Manifest(e.to_string()))
    }

    pub fn from_toml(content: &str) -> DaemonResult<Self> {
        toml::from_str(content).map_err(|e| DaemonError::Manifest(e.to_string()))
    }

    /// Validated spec for this manifest.
    pub fn to_spec(&self) -> Result<DesiredSpec, InvalidSpec> {
        let mut spec = DesiredSpec::new(self.name.clone(), parse_image(&self.image), 0)
            .with_resources(self.resources)
            .with_readiness(self.readiness.clone())
            .with_liveness(self.liveness.clone())
            .scaled(self.replicas)?;
        spec.env = self.env.clone();
        spec.validate()?;
        Ok(spec)
    }
}

/// Split `registry:5000/app:1.2` into name and tag.
///
/// A colon only separates the tag when it comes after the last slash.
pub fn parse_image(image: &str) -> ImageRef {
    let name_start = image.rfind('/').map_or(0, |slash| slash + 1);
    match image[name_start..].rfind(':') {
        Some(colon) => {
            let split = name_start + colon;
            ImageRef::new(&image[..split], &image[split + 1..])
        }
        None => ImageRef::new(image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const YAML: &str = r#"
name: web
replicas: 3
image: registry.local:5000/web:1.4
env:
  LOG_FORMAT: json
readiness:
  path: /ready
  port: 8080
  initial_delay: 2000
  period: 5000
  timeout: 1000
  failure_threshold: 2
"#;

    #[test]
    fn test_yaml_manifest() {
        let manifest = DeploymentManifest::from_yaml(YAML).unwrap();
        let spec = manifest.to_spec().unwrap();

        assert_eq!(spec.replica_count, 3);
        assert_eq!(spec.image, ImageRef::new("registry.local:5000/web", "1.4"));
        assert_eq!(spec.readiness.initial_delay, Duration::from_secs(2));
        assert_eq!(spec.readiness.failure_threshold, 2);
        assert_eq!(spec.liveness, ProbeConfig::liveness_default());
        assert_eq!(spec.env.get("LOG_FORMAT").map(String::as_str), Some("json"));
    }

    #[test]
    fn test_toml_manifest_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
name = "worker"
replicas = 0
image = "worker"

[env]
QUEUE = "jobs"
"#
        )
        .unwrap();

        let manifest = DeploymentManifest::from_path(file.path()).unwrap();
        let spec = manifest.to_spec().unwrap();
        assert_eq!(spec.replica_count, 0);
        assert_eq!(spec.image.tag, "latest");
    }

    #[test]
    fn test_negative_replicas_rejected() {
        let manifest = DeploymentManifest {
            replicas: -1,
            ..DeploymentManifest::from_yaml(YAML).unwrap()
        };
        assert_eq!(
            manifest.to_spec(),
            Err(InvalidSpec::NegativeReplicaCount(-1))
        );
    }

    #[test]
    fn test_malformed_manifest() {
        let err = DeploymentManifest::from_yaml("name: [").unwrap_err();
        assert!(matches!(err, DaemonError::Manifest(_)));
    }

    #[test]
    fn test_parse_image() {
        assert_eq!(parse_image("nginx"), ImageRef::new("nginx", "latest"));
        assert_eq!(parse_image("nginx:1.25"), ImageRef::new("nginx", "1.25"));
        assert_eq!(
            parse_image("localhost:5000/team/app"),
            ImageRef::new("localhost:5000/team/app", "latest")
        );
    }
}
