//! OCI registry client for pulling disk artifacts.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GHCR, local registries). Unlike container images, disk
//! artifacts are plain files: every layer blob is written to a file named
//! by the layer's title annotation.

use std::io;
use std::path::{Path, PathBuf};

use gom_core::config::RegistryCredentials;
use gom_core::error::{MachineError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::reference::ArtifactReference;
use super::ArtifactSource;

/// Annotation carrying a layer's file name.
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    /// Use operator-supplied credentials, falling back to env vars, then anonymous.
    pub fn from_credentials(credentials: &RegistryCredentials) -> Self {
        match credentials.username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => Self::basic(
                username,
                credentials.password.clone().unwrap_or_default(),
            ),
            None => Self::from_env(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Pulls every layer of an artifact manifest into a directory.
pub struct ArtifactPuller {
    client: Client,
    auth: RegistryAuth,
}

impl ArtifactPuller {
    /// Create a new puller. `plain_http` disables TLS for the registry.
    pub fn new(auth: RegistryAuth, plain_http: bool) -> Self {
        let config = ClientConfig {
            protocol: if plain_http {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        };
        let client = Client::new(config);

        Self { client, auth }
    }

    /// Download all layers of `reference` into `dest_dir`.
    ///
    /// Each layer is written to `dest_dir/<title>`, overwriting any existing
    /// file. The first failure aborts the pull; files already written are
    /// left in place.
    pub async fn pull(
        &self,
        reference: &ArtifactReference,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        if !dest_dir.is_dir() {
            return Err(MachineError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("output directory {} does not exist", dest_dir.display()),
            )));
        }

        let oci_ref = self.to_oci_reference(reference);

        tracing::info!(
            reference = %reference,
            target = %dest_dir.display(),
            anonymous = self.auth.is_anonymous(),
            "Pulling artifact from registry"
        );

        // Authenticates on first use, then resolves the tag
        let auth = self.auth.to_oci_auth();
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| MachineError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to pull manifest: {}", e),
            })?;

        tracing::debug!(
            digest = %manifest_digest,
            layers = manifest.layers.len(),
            "Fetched artifact manifest"
        );

        // Reject unnamed layers before downloading anything
        let titles = manifest
            .layers
            .iter()
            .map(layer_title)
            .collect::<Result<Vec<&str>>>()?;

        let mut written = Vec::with_capacity(titles.len());
        for (layer, title) in manifest.layers.iter().zip(titles) {
            let dest = dest_dir.join(title);

            tracing::info!(
                file = title,
                size = %format_bytes(layer.size),
                digest = %layer.digest,
                "Downloading blob"
            );

            let write_err = |e: io::Error| MachineError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to write blob to {}: {}", dest.display(), e),
            };

            let mut file = tokio::fs::File::create(&dest).await.map_err(write_err)?;
            self.client
                .pull_blob(&oci_ref, layer, &mut file)
                .await
                .map_err(|e| MachineError::RegistryError {
                    registry: reference.registry.clone(),
                    message: format!("Failed to pull layer {}: {}", layer.digest, e),
                })?;
            file.flush().await.map_err(write_err)?;

            written.push(dest);
        }

        tracing::info!(
            reference = %reference,
            digest = %manifest_digest,
            files = written.len(),
            "Artifact pulled successfully"
        );

        Ok(written)
    }

    /// Convert an ArtifactReference to an oci-distribution Reference.
    ///
    /// Built from the parsed parts so the registry host is used as given,
    /// without Docker Hub normalization.
    fn to_oci_reference(&self, reference: &ArtifactReference) -> Reference {
        Reference::with_tag(
            reference.registry.clone(),
            reference.repository.clone(),
            reference.tag.clone(),
        )
    }
}

#[async_trait]
impl ArtifactSource for ArtifactPuller {
    async fn pull(&self, reference: &ArtifactReference, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        ArtifactPuller::pull(self, reference, dest_dir).await
    }
}

/// File name a layer is stored under.
///
/// The title must be a bare file name so a manifest cannot write outside
/// the destination directory.
pub fn layer_title(layer: &OciDescriptor) -> Result<&str> {
    let title = layer
        .annotations
        .as_ref()
        .and_then(|a| a.get(TITLE_ANNOTATION))
        .map(String::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            MachineError::ArtifactError(format!(
                "layer {} has no {} annotation",
                layer.digest, TITLE_ANNOTATION
            ))
        })?;

    let plain = Path::new(title).file_name().and_then(|n| n.to_str()) == Some(title)
        && !title.contains('\\');
    if !plain {
        return Err(MachineError::ArtifactError(format!(
            "layer {} title '{}' is not a plain file name",
            layer.digest, title
        )));
    }

    Ok(title)
}

/// Format a byte count with binary units, e.g. `1.5 MiB`.
fn format_bytes(bytes: i64) -> String {
    const UNIT: i64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let unit = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}iB", bytes as f64 / div as f64, unit)
}
