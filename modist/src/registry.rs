//! Registry adapter: pull and push artifacts via an OCI registry.
//!
//! The registry protocol handshake is [`oci_client`]'s job; this module
//! translates between its types and ours, gates unknown config media
//! types, and maps protocol errors onto the crate taxonomy. Layer blob
//! downloads bypass the buffered client and stream through the resumable
//! transport in `modist-http`, so a dropped connection mid-way through a
//! multi-gigabyte weight file costs a range request, not a restart.

use std::io::Read;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use oci_client::Reference as OciReference;
use oci_client::client::ClientConfig;
use oci_client::manifest::OciDescriptor;
use oci_client::secrets::RegistryAuth;
use serde::Deserialize;

use modist_http::{Request, ResumableClient, RoundTrip, UreqTransport};

use crate::artifact::Artifact;
use crate::progress::{LayerProgress, Message, ProgressSink};
use crate::{
    ConfigFile, Descriptor, Digest, Error, Layer, Manifest, MediaType, Reference, Result, mediatype,
};

/// Credentials for one registry.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Credential {
    /// HTTP basic authentication.
    Basic {
        /// Account name.
        username: String,
        /// Account password or token.
        password: String,
    },
}

/// Resolves per-registry credentials. Lookup lives outside the core; this
/// is only the seam.
pub trait Keychain: Send + Sync {
    /// Credentials for `registry`, or `None` for anonymous access.
    fn resolve(&self, registry: &str) -> Option<Credential>;
}

/// Keychain that always answers anonymously.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct AnonymousKeychain;

impl Keychain for AnonymousKeychain {
    fn resolve(&self, _registry: &str) -> Option<Credential> {
        None
    }
}

/// Keychain pinned to one explicit credential for every registry.
#[derive(Debug, Clone)]
pub struct BasicKeychain {
    credential: Credential,
}

impl BasicKeychain {
    /// Uses `username`/`password` for every registry.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credential: Credential::Basic {
                username: username.into(),
                password: password.into(),
            },
        }
    }
}

impl Keychain for BasicKeychain {
    fn resolve(&self, _registry: &str) -> Option<Credential> {
        Some(self.credential.clone())
    }
}

/// Manifest media types accepted when resolving a remote artifact.
const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    mediatype::MANIFEST,
    "application/vnd.docker.distribution.manifest.v2+json",
];

/// Registry client for model artifacts.
pub struct RegistryClient {
    oci: oci_client::Client,
    keychain: Arc<dyn Keychain>,
    http: ResumableClient<Box<dyn RoundTrip>>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient").finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Creates a client with the given keychain.
    pub fn new(keychain: Arc<dyn Keychain>) -> Self {
        Self::with_transport(keychain, Box::new(UreqTransport::new()))
    }

    /// Creates a client over a custom blob-download transport.
    pub fn with_transport(keychain: Arc<dyn Keychain>, transport: Box<dyn RoundTrip>) -> Self {
        Self {
            oci: oci_client::Client::new(ClientConfig::default()),
            keychain,
            http: ResumableClient::new(transport),
        }
    }

    fn auth_for(&self, reference: &Reference) -> RegistryAuth {
        match self.keychain.resolve(&reference.registry) {
            Some(Credential::Basic { username, password }) => {
                RegistryAuth::Basic(username, password)
            }
            None => RegistryAuth::Anonymous,
        }
    }

    /// Resolves `reference` into a remote artifact: raw manifest plus
    /// config fetched eagerly, layer blobs fetched lazily with resumption.
    pub async fn remote_artifact(&self, reference: &Reference) -> Result<RemoteArtifact> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference);

        let (raw_manifest, manifest_digest) = self
            .oci
            .pull_manifest_raw(&oci_ref, &auth, ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|e| map_registry_error(reference, &e.to_string()))?;
        tracing::debug!(reference = %reference, digest = %manifest_digest, "resolved manifest");

        let manifest = Manifest::from_slice(&raw_manifest)?;
        if manifest.config.media_type != MediaType::ModelConfig {
            return Err(Error::UnsupportedMediaType(
                manifest.config.media_type.to_string(),
            ));
        }

        let mut raw_config = Vec::with_capacity(manifest.config.size as usize);
        self.oci
            .pull_blob(&oci_ref, &to_oci_descriptor(&manifest.config), &mut raw_config)
            .await
            .map_err(|e| map_registry_error(reference, &e.to_string()))?;

        let fetch = Arc::new(BlobFetch {
            http: self.http.clone(),
            base: reference.api_base(),
            registry: reference.registry.clone(),
            repository: reference.repository.clone(),
            credential: self.keychain.resolve(&reference.registry),
            token: Mutex::new(None),
        });
        let layers = manifest
            .layers
            .iter()
            .map(|desc| {
                Arc::new(RemoteLayer {
                    descriptor: desc.clone(),
                    fetch: Arc::clone(&fetch),
                }) as Arc<dyn Layer>
            })
            .collect();

        Ok(RemoteArtifact {
            raw_manifest: raw_manifest.to_vec(),
            manifest,
            raw_config,
            layers,
        })
    }

    /// Pushes an artifact: every layer blob, the config blob, then the
    /// manifest. Uploads are one-shot; only downloads resume.
    pub async fn push(
        &self,
        artifact: &dyn Artifact,
        reference: &Reference,
        progress: &ProgressSink,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference);

        self.oci
            .auth(&oci_ref, &auth, oci_client::RegistryOperation::Push)
            .await
            .map_err(|e| map_registry_error(reference, &e.to_string()))?;

        let layers = artifact.layers()?;
        let mut total: u64 = 0;
        for layer in &layers {
            total += layer.size()?;
        }

        let mut pushed: u64 = 0;
        for layer in &layers {
            let digest = layer.digest()?;
            let size = layer.size()?;
            let mut data = Vec::with_capacity(size as usize);
            layer.open()?.read_to_end(&mut data)?;
            self.oci
                .push_blob(&oci_ref, data, &digest.to_string())
                .await
                .map_err(|e| map_registry_error(reference, &e.to_string()))?;
            pushed += size;
            progress.send(Message::Progress {
                message: format!("Uploaded: {}", crate::formats::humanize_bytes(pushed)),
                total,
                pulled: pushed,
                layer: Some(LayerProgress {
                    id: digest.to_string(),
                    size,
                    current: size,
                }),
            });
        }

        let raw_config = artifact.raw_config()?;
        let config_digest = Digest::sha256(&raw_config);
        self.oci
            .push_blob(&oci_ref, raw_config, &config_digest.to_string())
            .await
            .map_err(|e| map_registry_error(reference, &e.to_string()))?;

        let raw_manifest = artifact.raw_manifest()?;
        let manifest: oci_client::manifest::OciImageManifest =
            serde_json::from_slice(&raw_manifest)?;
        self.oci
            .push_manifest(&oci_ref, &oci_client::manifest::OciManifest::Image(manifest))
            .await
            .map_err(|e| map_registry_error(reference, &e.to_string()))?;

        tracing::info!(reference = %reference, "model pushed");
        Ok(())
    }
}

/// An artifact resolved from a registry. Layers stream on demand.
pub struct RemoteArtifact {
    raw_manifest: Vec<u8>,
    manifest: Manifest,
    raw_config: Vec<u8>,
    layers: Vec<Arc<dyn Layer>>,
}

impl std::fmt::Debug for RemoteArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteArtifact")
            .field("layers", &self.layers.len())
            .finish_non_exhaustive()
    }
}

impl Artifact for RemoteArtifact {
    fn layers(&self) -> Result<Vec<Arc<dyn Layer>>> {
        Ok(self.layers.clone())
    }

    fn config_file(&self) -> Result<ConfigFile> {
        ConfigFile::from_slice(&self.raw_config)
    }

    fn raw_config(&self) -> Result<Vec<u8>> {
        Ok(self.raw_config.clone())
    }

    fn config_media_type(&self) -> MediaType {
        self.manifest.config.media_type.clone()
    }

    fn manifest(&self) -> Result<Manifest> {
        Ok(self.manifest.clone())
    }

    fn raw_manifest(&self) -> Result<Vec<u8>> {
        Ok(self.raw_manifest.clone())
    }
}

/// A layer streamed from the registry blob endpoint.
struct RemoteLayer {
    descriptor: Descriptor,
    fetch: Arc<BlobFetch>,
}

impl Layer for RemoteLayer {
    fn media_type(&self) -> &MediaType {
        &self.descriptor.media_type
    }

    fn digest(&self) -> Result<Digest> {
        Ok(self.descriptor.digest.clone())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.descriptor.size)
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.fetch.open(&self.descriptor.digest)
    }
}

/// Shared blob-download state: resumable client plus a cached bearer token.
struct BlobFetch {
    http: ResumableClient<Box<dyn RoundTrip>>,
    base: String,
    registry: String,
    repository: String,
    credential: Option<Credential>,
    token: Mutex<Option<String>>,
}

impl BlobFetch {
    fn open(&self, digest: &Digest) -> Result<Box<dyn Read + Send>> {
        let url = format!("{}/{}/blobs/{}", self.base, self.repository, digest);
        let mut req = Request::get(url);
        if let Some(value) = self.authorization()? {
            req.headers.set("Authorization", &value);
        }

        tracing::debug!(digest = %digest, repository = %self.repository, "fetching blob");
        let resp = self.http.execute(req)?;
        match resp.status {
            s if (200..300).contains(&s) => Ok(resp.body),
            401 | 403 => Err(Error::Unauthorized(format!(
                "{}/{}",
                self.registry, self.repository
            ))),
            404 => Err(Error::ModelNotFound(format!(
                "{}/{}@{digest}",
                self.registry, self.repository
            ))),
            s => Err(Error::Registry(format!(
                "blob fetch for {digest} returned status {s}"
            ))),
        }
    }

    /// `Authorization` header value: a cached bearer token for registries
    /// with a known token endpoint, else the raw basic credential.
    fn authorization(&self) -> Result<Option<String>> {
        {
            let cached = self.token.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(token) = cached.as_ref() {
                return Ok(Some(format!("Bearer {token}")));
            }
        }

        let Some((realm, service)) = token_endpoint(&self.registry) else {
            return Ok(self.credential.as_ref().map(basic_header));
        };

        let scope = format!("repository:{}:pull", self.repository);
        let url = format!("{realm}?service={service}&scope={scope}");
        let mut req = Request::get(url);
        if let Some(credential) = &self.credential {
            req.headers.set("Authorization", &basic_header(credential));
        }
        let mut resp = self.http.execute(req)?;
        if !resp.is_success() {
            return Err(Error::Unauthorized(self.registry.clone()));
        }
        let mut body = Vec::new();
        resp.body.read_to_end(&mut body)?;

        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }
        let parsed: TokenResponse = serde_json::from_slice(&body)?;
        let header = format!("Bearer {}", parsed.token);
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(parsed.token);
        Ok(Some(header))
    }
}

/// Token endpoint (realm, service) for registries with a known auth flow.
fn token_endpoint(registry: &str) -> Option<(&'static str, &'static str)> {
    match registry {
        "index.docker.io" | "docker.io" => {
            Some(("https://auth.docker.io/token", "registry.docker.io"))
        }
        "ghcr.io" => Some(("https://ghcr.io/token", "ghcr.io")),
        _ => None,
    }
}

fn basic_header(credential: &Credential) -> String {
    let Credential::Basic { username, password } = credential;
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

/// Maps our canonical reference onto the registry client's type.
fn to_oci_reference(reference: &Reference) -> Result<OciReference> {
    reference
        .canonical()
        .parse()
        .map_err(|e: oci_client::ParseError| Error::InvalidReference(e.to_string()))
}

fn to_oci_descriptor(descriptor: &Descriptor) -> OciDescriptor {
    OciDescriptor {
        media_type: descriptor.media_type.to_string(),
        digest: descriptor.digest.to_string(),
        size: descriptor.size as i64,
        ..OciDescriptor::default()
    }
}

/// Maps registry protocol error strings onto the crate taxonomy.
///
/// The OCI client surfaces protocol failures as strings; the registry's
/// error code is matched by substring.
fn map_registry_error(reference: &Reference, message: &str) -> Error {
    if message.contains("UNAUTHORIZED") {
        Error::Unauthorized(reference.to_string())
    } else if message.contains("MANIFEST_UNKNOWN") || message.contains("NAME_UNKNOWN") {
        Error::ModelNotFound(reference.to_string())
    } else {
        Error::Registry(message.to_owned())
    }
}
