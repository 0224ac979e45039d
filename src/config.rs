use std::fmt;

use anyhow::{Context, Result, bail};
use url::Url;

pub const DEFAULT_APP_NAME: &str = "Hello World Snapp";
pub const DEFAULT_BRIDGE_SERVER_URL: &str = "https://bridge.snappjack.com/";

const SNAPP_ID_VAR: &str = "SNAPP_ID";
const SNAPP_API_KEY_VAR: &str = "SNAPP_API_KEY";
const BRIDGE_SERVER_URL_VAR: &str = "SNAPPJACK_BRIDGE_SERVER_URL";
const APP_NAME_VAR: &str = "SNAPP_APP_NAME";

/// Snapp-level credentials. The API key never leaves the server process.
#[derive(Clone, PartialEq, Eq)]
pub struct SnappCredentials {
    pub snapp_id: String,
    pub api_key: String,
}

impl fmt::Debug for SnappCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnappCredentials")
            .field("snapp_id", &self.snapp_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub credentials: SnappCredentials,
    pub app_name: String,
    /// Only set when running against a non-default (e.g. local) bridge server.
    pub bridge_server_url: Option<Url>,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| match std::env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => bail!("{name} must be valid UTF-8"),
        })
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let snapp_id = required(&lookup, SNAPP_ID_VAR)?;
        let api_key = required(&lookup, SNAPP_API_KEY_VAR)?;
        let app_name = optional(&lookup, APP_NAME_VAR)?.unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        let bridge_server_url = optional(&lookup, BRIDGE_SERVER_URL_VAR)?
            .map(|raw| parse_bridge_url(&raw))
            .transpose()?;

        Ok(Self {
            credentials: SnappCredentials { snapp_id, api_key },
            app_name,
            bridge_server_url,
        })
    }

    /// Base URL for upstream authority calls.
    pub fn authority_base_url(&self) -> Result<Url> {
        match &self.bridge_server_url {
            Some(url) => Ok(url.clone()),
            None => Url::parse(DEFAULT_BRIDGE_SERVER_URL).context("invalid default bridge URL"),
        }
    }
}

fn required<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Result<Option<String>>,
{
    match optional(lookup, name)? {
        Some(value) => Ok(value),
        None => bail!("{name} is required"),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Result<Option<String>>,
{
    Ok(lookup(name)?
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

fn parse_bridge_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).with_context(|| format!("invalid {BRIDGE_SERVER_URL_VAR} '{raw}'"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("{BRIDGE_SERVER_URL_VAR} must use http or https");
    }
    if url.host_str().is_none() {
        bail!("{BRIDGE_SERVER_URL_VAR} must include a host");
    }
    // Url::join drops the last segment unless the base ends with a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
