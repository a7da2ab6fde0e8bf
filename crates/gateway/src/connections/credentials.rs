use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pk_domain::AppKey;

pub const CERT_FILE: &str = "cer.pem";
pub const KEY_FILE: &str = "key.pem";

/// Client certificate chain and private key, both PEM.
#[derive(Clone)]
pub struct Credentials {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credentials for {app} in {dir}")]
    Missing { app: AppKey, dir: PathBuf },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where per-app client certificates come from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load(&self, app: &AppKey) -> Result<Credentials, CredentialError>;

    /// Whether credentials for `app` are present, without reading them.
    fn has(&self, app: &AppKey) -> bool;

    /// Every app (in each environment) with credentials installed.
    fn installed(&self) -> Vec<AppKey>;
}

/// Credentials laid out on disk as
/// `<root>/<bundle>/{production,develop}/{cer.pem,key.pem}`.
pub struct FsCredentials {
    root: PathBuf,
}

impl FsCredentials {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, app: &AppKey) -> PathBuf {
        self.root.join(app.bundle()).join(app.environment())
    }
}

#[async_trait]
impl CredentialSource for FsCredentials {
    async fn load(&self, app: &AppKey) -> Result<Credentials, CredentialError> {
        if !self.has(app) {
            return Err(CredentialError::Missing {
                app: app.clone(),
                dir: self.dir(app),
            });
        }
        let dir = self.dir(app);
        let read = |name: &'static str| {
            let path = dir.join(name);
            async move {
                tokio::fs::read(&path)
                    .await
                    .map_err(|source| CredentialError::Io { path, source })
            }
        };
        Ok(Credentials {
            cert_pem: read(CERT_FILE).await?,
            key_pem: read(KEY_FILE).await?,
        })
    }

    fn has(&self, app: &AppKey) -> bool {
        let dir = self.dir(app);
        dir.join(CERT_FILE).is_file() && dir.join(KEY_FILE).is_file()
    }

    fn installed(&self) -> Vec<AppKey> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "cannot list credential directory");
                return Vec::new();
            }
        };
        let mut apps = Vec::new();
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            for sandbox in [false, true] {
                match AppKey::new(name.as_str(), sandbox) {
                    Ok(app) if self.has(&app) => apps.push(app),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(entry = %name, error = %e, "skipping credential entry");
                        break;
                    }
                }
            }
        }
        apps.sort();
        apps
    }
}
