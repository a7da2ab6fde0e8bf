use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Suffix appended to the bundle id of sandboxed apps.
pub const SANDBOX_SUFFIX: &str = "_dev";

/// Identity of one application in one gateway environment.
///
/// The string form is the bundle id, suffixed with `_dev` for the sandbox
/// variant. Production and sandbox variants of the same bundle are distinct
/// keys with their own connection, queues and log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppKey {
    bundle: String,
    sandbox: bool,
}

impl AppKey {
    pub fn new(bundle: impl Into<String>, sandbox: bool) -> Result<Self> {
        let bundle = bundle.into();
        validate_bundle(&bundle)?;
        Ok(Self { bundle, sandbox })
    }

    pub fn production(bundle: impl Into<String>) -> Result<Self> {
        Self::new(bundle, false)
    }

    pub fn sandbox(bundle: impl Into<String>) -> Result<Self> {
        Self::new(bundle, true)
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn is_sandbox(&self) -> bool {
        self.sandbox
    }

    /// The same bundle in the other environment.
    pub fn with_sandbox(&self, sandbox: bool) -> Self {
        Self {
            bundle: self.bundle.clone(),
            sandbox,
        }
    }

    /// Directory name of the credential bundle for this environment.
    pub fn environment(&self) -> &'static str {
        if self.sandbox {
            "develop"
        } else {
            "production"
        }
    }
}

fn validate_bundle(bundle: &str) -> Result<()> {
    if bundle.trim().is_empty() {
        return Err(Error::InvalidAppKey("bundle id must not be empty".into()));
    }
    if bundle.ends_with(SANDBOX_SUFFIX) {
        return Err(Error::InvalidAppKey(format!(
            "bundle id must not end with {SANDBOX_SUFFIX}: {bundle}"
        )));
    }
    if let Some(c) = bundle
        .chars()
        .find(|c| c.is_control() || c.is_whitespace() || matches!(c, '/' | '\\'))
    {
        return Err(Error::InvalidAppKey(format!(
            "bundle id contains forbidden character {c:?}: {bundle}"
        )));
    }
    Ok(())
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sandbox {
            write!(f, "{}{SANDBOX_SUFFIX}", self.bundle)
        } else {
            f.write_str(&self.bundle)
        }
    }
}

impl FromStr for AppKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_suffix(SANDBOX_SUFFIX) {
            Some(bundle) => Self::new(bundle, true),
            None => Self::new(s, false),
        }
    }
}

impl Serialize for AppKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AppKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
