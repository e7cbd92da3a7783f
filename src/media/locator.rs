use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Why a locator was rejected. Maps to HTTP 400.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("source locator is missing")]
    Missing,

    #[error("source locator is not a valid URL: {0}")]
    Malformed(String),

    #[error("unsupported locator scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("source locator has no host")]
    MissingHost,
}

/// Validated HTTP(S) address of a remote video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceLocator(Url);

impl SourceLocator {
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::Missing);
        }
        let url = Url::parse(trimmed).map_err(|e| LocatorError::Malformed(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(LocatorError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(LocatorError::MissingHost);
        }
        Ok(Self(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl TryFrom<String> for SourceLocator {
    type Error = LocatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceLocator> for String {
    fn from(locator: SourceLocator) -> Self {
        locator.0.into()
    }
}

impl std::str::FromStr for SourceLocator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
