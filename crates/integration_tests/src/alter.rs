//! Archive removal operations driven through `swh alter`.
//!
//! A [`RemovalOperation`] removes a set of origins (and every object only
//! they reference) into an encrypted recovery bundle, and can restore them
//! from it. [`AlterCompanion`] checks the presence or absence of objects in
//! each storage backend afterwards.

use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::compose::ComposeSession;
use crate::error::HarnessError;
use crate::host::{shell_quote, ServiceHost};
use crate::swhid::{ObjectType, Swhid};

#[cfg(test)]
#[path = "alter_tests.rs"]
mod tests;

/// age identities able to decrypt recovery bundles in the test environment.
pub const AGE_IDENTITIES: &str = "/srv/softwareheritage/age-identities.txt";

/// Number of removed contents whose data is extracted from a bundle.
pub const CONTENT_SAMPLE_SIZE: usize = 5;

/// Objects swh-alter never removes; removing every origin referencing them
/// leaves them as the only referenced objects.
pub const NEVER_REMOVABLE: [&str; 3] = [
    // empty content
    "swh:1:cnt:e69de29bb2d1d6434b8b29ae775ad8c2e48c5391",
    // GPLv3
    "swh:1:cnt:94a9ed024d3859793618152ea559a168bbcbb5e2",
    // directory holding an empty __init__.py
    "swh:1:dir:9d1dcfdaf1a6857c5f83dc27019c7600e1ffaff8",
];

/// Manifest of a recovery bundle, as dumped by
/// `swh alter recovery-bundle info --dump-manifest`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecoveryManifest {
    #[serde(deserialize_with = "deserialize_version")]
    pub version: u32,
    #[serde(default)]
    pub removal_identifier: Option<String>,
    pub swhids: Vec<Swhid>,
    /// Origins requested for removal, from version 3.
    #[serde(default)]
    pub requested: Vec<String>,
    /// Kept objects referencing removed ones, from version 3.
    #[serde(default)]
    pub referencing: Vec<Swhid>,
}

impl RecoveryManifest {
    pub fn parse(yaml: &str) -> Result<Self, HarnessError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Number(u32),
        Text(String),
    }

    match Version::deserialize(deserializer)? {
        Version::Number(version) => Ok(version),
        Version::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// One `swh alter remove` run and what it removed.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalOperation {
    pub identifier: String,
    pub bundle_path: String,
    pub origins: Vec<String>,
    pub removed_swhids: Vec<Swhid>,
    pub referencing: Vec<Swhid>,
    removed_content_sha1s: Option<Vec<String>>,
}

impl RemovalOperation {
    pub fn new<I, S>(identifier: impl Into<String>, bundle_path: impl Into<String>, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifier: identifier.into(),
            bundle_path: bundle_path.into(),
            origins: origins.into_iter().map(Into::into).collect(),
            removed_swhids: Vec::new(),
            referencing: Vec::new(),
            removed_content_sha1s: None,
        }
    }

    /// Remove the origins from `host` and record what the bundle holds.
    pub async fn run_in(&mut self, host: &ServiceHost) -> Result<(), HarnessError> {
        let output = host.check_output(&self.remove_command()).await?;
        debug!(identifier = %self.identifier, output = %output, "Removal done");

        let dump = host.check_output(&self.manifest_command()).await?;
        let manifest = RecoveryManifest::parse(&dump)?;
        debug!(identifier = %self.identifier, manifest = ?manifest, "Recovery bundle manifest");
        self.apply_manifest(manifest)
    }

    /// Record the objects listed by `manifest`.
    ///
    /// From version 3 on, the manifest must request exactly the origins of
    /// this operation.
    pub fn apply_manifest(&mut self, manifest: RecoveryManifest) -> Result<(), HarnessError> {
        self.removed_swhids = manifest.swhids;
        if manifest.version >= 3 {
            if manifest.requested != self.origins {
                return Err(HarnessError::ManifestMismatch {
                    identifier: self.identifier.clone(),
                    requested: manifest.requested,
                    origins: self.origins.clone(),
                });
            }
            self.referencing = manifest.referencing;
        }
        Ok(())
    }

    /// Put the removed objects back from the recovery bundle.
    pub async fn restore(&self, host: &ServiceHost) -> Result<(), HarnessError> {
        host.check_output(&self.restore_command()).await.map(|_| ())
    }

    /// SHA1 of the data of a random sample of removed contents.
    ///
    /// Extracting contents from a bundle is slow, so at most
    /// [`CONTENT_SAMPLE_SIZE`] of them are picked; the sample is computed
    /// once and reused afterwards.
    pub async fn removed_content_sha1s(
        &mut self,
        host: &ServiceHost,
    ) -> Result<Vec<String>, HarnessError> {
        if let Some(sha1s) = &self.removed_content_sha1s {
            return Ok(sha1s.clone());
        }

        let sample: Vec<Swhid> = {
            let contents: Vec<&Swhid> = self
                .removed_swhids
                .iter()
                .filter(|s| s.object_type() == ObjectType::Content)
                .collect();
            let mut rng = rand::thread_rng();
            contents
                .choose_multiple(&mut rng, CONTENT_SAMPLE_SIZE.min(contents.len()))
                .map(|s| (*s).clone())
                .collect()
        };

        let mut sha1s = Vec::with_capacity(sample.len());
        for swhid in &sample {
            let command = self.extract_content_command(swhid);
            let output = host.run(&command).await?;
            if !output.succeeded() {
                return Err(HarnessError::CommandFailed {
                    command,
                    status: output.status,
                    stdout: String::new(),
                    stderr: output.stderr,
                });
            }
            let sha1 = hex::encode(Sha1::digest(&output.stdout));
            debug!(swhid = %swhid, sha1 = %sha1, "Extracted content");
            sha1s.push(sha1);
        }

        self.removed_content_sha1s = Some(sha1s.clone());
        Ok(sha1s)
    }

    pub fn remove_command(&self) -> String {
        let origins: Vec<String> = self.origins.iter().map(|o| shell_quote(o)).collect();
        format!(
            "echo y | swh alter remove --identifier {} --recovery-bundle {} {}",
            shell_quote(&self.identifier),
            shell_quote(&self.bundle_path),
            origins.join(" ")
        )
    }

    pub fn manifest_command(&self) -> String {
        format!(
            "swh alter recovery-bundle info --dump-manifest {}",
            shell_quote(&self.bundle_path)
        )
    }

    pub fn restore_command(&self) -> String {
        format!(
            "swh alter recovery-bundle restore {} --identity {}",
            shell_quote(&self.bundle_path),
            AGE_IDENTITIES
        )
    }

    fn extract_content_command(&self, swhid: &Swhid) -> String {
        format!(
            "swh alter recovery-bundle extract-content --identity {} --output - {} {}",
            AGE_IDENTITIES,
            shell_quote(&self.bundle_path),
            swhid
        )
    }
}

/// Objstorage served behind nginx.
pub const PRIMARY_OBJSTORAGE_URL: &str = "http://nginx/rpc/objstorage";
/// Objstorage fed by the content replayer.
pub const EXTRA_OBJSTORAGE_URL: &str = "http://swh-extra-objstorage:5003";

/// Backend queried by the companion script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Postgresql,
    Cassandra,
    Kafka,
    /// Queried by origin URL rather than SWHID.
    Elasticsearch,
    Objstorage { url: String },
}

impl Backend {
    pub fn objstorage(url: impl Into<String>) -> Self {
        Self::Objstorage { url: url.into() }
    }

    fn command(&self) -> &'static str {
        match self {
            Self::Postgresql => "query-postgresql",
            Self::Cassandra => "query-cassandra",
            Self::Kafka => "query-kafka",
            Self::Elasticsearch => "query-elasticsearch",
            Self::Objstorage { .. } => "query-objstorage",
        }
    }
}

/// Runs `/src/alter_companion.py` in the `swh-alter` service.
///
/// The script exits with an error unless every identifier is present (with
/// `--presence`) or absent (without it) from the backend.
#[derive(Debug, Clone, Copy)]
pub struct AlterCompanion<'a> {
    session: &'a ComposeSession,
}

impl<'a> AlterCompanion<'a> {
    pub fn new(session: &'a ComposeSession) -> Self {
        Self { session }
    }

    /// Fail unless all `ids` are found in `backend`.
    pub async fn assert_present<T: ToString>(
        &self,
        backend: &Backend,
        ids: &[T],
    ) -> Result<(), HarnessError> {
        self.query(backend, true, ids).await
    }

    /// Fail unless none of `ids` is found in `backend`.
    pub async fn assert_absent<T: ToString>(
        &self,
        backend: &Backend,
        ids: &[T],
    ) -> Result<(), HarnessError> {
        self.query(backend, false, ids).await
    }

    async fn query<T: ToString>(
        &self,
        backend: &Backend,
        presence: bool,
        ids: &[T],
    ) -> Result<(), HarnessError> {
        let args = companion_args(backend, presence, ids);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.session.check_compose_output(&args).await.map(|_| ())
    }
}

/// Compose arguments of one companion query.
pub fn companion_args<T: ToString>(backend: &Backend, presence: bool, ids: &[T]) -> Vec<String> {
    let mut args: Vec<String> = ["exec", "-T", "swh-alter", "python", "/src/alter_companion.py"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(backend.command().to_string());
    if presence {
        args.push("--presence".to_string());
    }
    if let Backend::Objstorage { url } = backend {
        args.push("--objstorage-url".to_string());
        args.push(url.clone());
    }
    args.extend(ids.iter().map(ToString::to_string));
    args
}
