use crate::{DataverseError, Result};
use core::time::Duration;

/// Web API version used when none is given.
pub const DEFAULT_API_VERSION: &str = "9.2";

/// Where and how to reach a Dataverse organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataverseConfig {
    /// Organization root, e.g. `https://contoso.crm.dynamics.com`.
    pub org_url: String,
    pub api_version: String,
    /// OAuth bearer token. Requests are sent unauthenticated without one.
    pub token: Option<String>,
    /// Per-request HTTP timeout.
    pub request_timeout: Option<Duration>,
}

impl DataverseConfig {
    pub fn new(org_url: impl Into<String>) -> Self {
        Self {
            org_url: org_url.into().trim_end_matches('/').to_owned(),
            api_version: DEFAULT_API_VERSION.to_owned(),
            token: None,
            request_timeout: None,
        }
    }

    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Web API service root, always ending in `/`.
    pub fn service_root(&self) -> String {
        format!("{}/api/data/v{}/", self.org_url, self.api_version)
    }

    /// # Errors
    ///
    /// Returns [`DataverseError::InvalidConfig`] for a non-HTTP(S) URL, an
    /// empty API version or a blank token.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| DataverseError::InvalidConfig {
            reason: reason.to_owned(),
        };

        let host = self
            .org_url
            .strip_prefix("https://")
            .or_else(|| self.org_url.strip_prefix("http://"))
            .ok_or_else(|| invalid("organization URL must start with http:// or https://"))?;
        if host.is_empty() {
            return Err(invalid("organization URL has no host"));
        }
        if self.api_version.trim().is_empty() {
            return Err(invalid("API version must not be empty"));
        }
        if self.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(invalid("token must not be blank"));
        }
        Ok(())
    }
}
