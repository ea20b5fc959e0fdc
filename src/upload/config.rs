use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::options::DEFAULT_REQUEST_TIMEOUT;

pub const ACCOUNT_ENV: &str = "STREAM_ACCOUNT";
pub const API_KEY_ENV: &str = "STREAM_API_KEY";
pub const ENDPOINT_ENV: &str = "CLOUDFLARE_URL";

pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Clone)]
pub struct UploadConfig {
    pub account_id: String,
    pub api_token: String,
    pub endpoint_override: Option<Url>,
    pub chunk_size: u64,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("UploadConfig")
            .field("account_id", &self.account_id)
            .field("api_token", &"<redacted>")
            .field("endpoint_override", &self.endpoint_override)
            .field("chunk_size", &self.chunk_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl UploadConfig {
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            api_token: api_token.into(),
            endpoint_override: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Builds the configuration from `STREAM_ACCOUNT`, `STREAM_API_KEY` and the
    /// optional `CLOUDFLARE_URL`, looked up through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::config(format!("set the {key} environment variable")))
        };

        let mut config = Self::new(required(ACCOUNT_ENV)?, required(API_KEY_ENV)?);

        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|value| !value.trim().is_empty()) {
            let endpoint = Url::parse(endpoint.trim())
                .map_err(|err| Error::config(format!("invalid {ENDPOINT_ENV} `{endpoint}`: {err}")))?;
            config.endpoint_override = Some(endpoint);
        }

        Ok(config)
    }

    /// Sets the chunk size from a number of MiB.
    pub fn with_chunk_size_mib(mut self, mib: u64) -> Result<Self> {
        self.chunk_size = mib
            .checked_mul(1024 * 1024)
            .ok_or_else(|| Error::config(format!("chunk size of {mib} MiB is too large")))?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(Error::config("an account id is required to upload"));
        }
        if self.api_token.trim().is_empty() {
            return Err(Error::config("an API token is required to upload"));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk size must be greater than zero"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Url> {
        match &self.endpoint_override {
            Some(endpoint) => Ok(endpoint.clone()),
            None => {
                let endpoint = format!(
                    "https://api.cloudflare.com/client/v4/accounts/{}/stream",
                    self.account_id
                );
                Url::parse(&endpoint)
                    .map_err(|err| Error::config(format!("invalid endpoint `{endpoint}`: {err}")))
            }
        }
    }

    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.api_token)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_credentials_and_default_endpoint() {
        let config =
            UploadConfig::from_lookup(lookup(&[(ACCOUNT_ENV, "acc123"), (API_KEY_ENV, "secret")]))
                .unwrap();

        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.authorization(), "Bearer secret");
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "https://api.cloudflare.com/client/v4/accounts/acc123/stream"
        );
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn endpoint_override_wins() {
        let config = UploadConfig::from_lookup(lookup(&[
            (ACCOUNT_ENV, "acc123"),
            (API_KEY_ENV, "secret"),
            (ENDPOINT_ENV, "http://localhost:8080/files"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint().unwrap().as_str(), "http://localhost:8080/files");
    }

    #[test]
    fn missing_credentials_are_config_errors() {
        let err = UploadConfig::from_lookup(lookup(&[(API_KEY_ENV, "secret")])).unwrap_err();
        assert!(err.to_string().contains(ACCOUNT_ENV));

        let err = UploadConfig::from_lookup(lookup(&[(ACCOUNT_ENV, "acc"), (API_KEY_ENV, " ")]))
            .unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn chunk_size_in_mib() {
        let config = UploadConfig::new("acc", "secret").with_chunk_size_mib(8).unwrap();
        assert_eq!(config.chunk_size, 8 * 1024 * 1024);

        let err = UploadConfig::new("acc", "secret")
            .with_chunk_size_mib(u64::MAX)
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut config = UploadConfig::new("acc", "token");
        config.chunk_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }
}
