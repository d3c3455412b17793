//! Client configuration
//!
//! [`ClientConfig`] is assembled with a builder, from a TOML file, or from
//! the environment. Environment variables (and a `.env` file) override
//! file values:
//!
//! * `ODATA_SERVICE_ROOT`
//! * `ODATA_VERSION` (`3.0` or `4.0`)
//! * `ODATA_USERNAME` / `ODATA_PASSWORD`

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::codec::{CodecOptions, Format, UnknownPropertyPolicy};
use crate::api::constants::{ODataVersion, media};
use crate::api::request::RequestOptions;

pub const ENV_SERVICE_ROOT: &str = "ODATA_SERVICE_ROOT";
pub const ENV_VERSION: &str = "ODATA_VERSION";
pub const ENV_USERNAME: &str = "ODATA_USERNAME";
pub const ENV_PASSWORD: &str = "ODATA_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write config file {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("no service root configured; set {ENV_SERVICE_ROOT} or service_root in the config file")]
    MissingServiceRoot,
}

/// Basic authentication credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Settings of one client, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub service_root: String,
    pub version: ODataVersion,
    pub default_format: Format,
    /// `Accept` of batch requests
    pub batch_accept_format: String,
    pub unknown_properties: UnknownPropertyPolicy,
    pub prefer_representation: bool,
    pub ieee754_compatible: bool,
    pub tunnel_methods: bool,
    pub credentials: Option<Credentials>,
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Create a new builder for ClientConfig
    pub fn builder(service_root: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(service_root)
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            version: self.version,
            default_format: self.default_format,
            prefer_representation: self.prefer_representation,
            ieee754_compatible: self.ieee754_compatible,
            tunnel_methods: self.tunnel_methods,
        }
    }

    pub fn codec_options(&self) -> CodecOptions {
        CodecOptions::new(self.version)
            .with_unknown_properties(self.unknown_properties)
            .with_ieee754_compatible(self.ieee754_compatible)
    }

    /// Load from `path`, or the default location when it exists, then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        ConfigFile::discover(path)?.into_config()
    }
}

/// Builder for ClientConfig
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new(service_root: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                service_root: service_root.into(),
                version: ODataVersion::V4,
                default_format: Format::default(),
                batch_accept_format: media::MULTIPART_MIXED.to_string(),
                unknown_properties: UnknownPropertyPolicy::default(),
                prefer_representation: false,
                ieee754_compatible: false,
                tunnel_methods: false,
                credentials: None,
                timeout: Some(Duration::from_secs(60)),
            },
        }
    }

    /// Set the protocol version
    pub fn version(mut self, version: ODataVersion) -> Self {
        self.config.version = version;
        self
    }

    /// Set the payload format used when a request names none
    pub fn default_format(mut self, format: Format) -> Self {
        self.config.default_format = format;
        self
    }

    /// Set the `Accept` header of batch requests
    pub fn batch_accept_format(mut self, accept: impl Into<String>) -> Self {
        self.config.batch_accept_format = accept.into();
        self
    }

    pub fn unknown_properties(mut self, policy: UnknownPropertyPolicy) -> Self {
        self.config.unknown_properties = policy;
        self
    }

    /// Ask for created and updated entities in responses
    pub fn prefer_representation(mut self, enabled: bool) -> Self {
        self.config.prefer_representation = enabled;
        self
    }

    pub fn ieee754_compatible(mut self, enabled: bool) -> Self {
        self.config.ieee754_compatible = enabled;
        self
    }

    /// Send PUT, PATCH, MERGE and DELETE as POST with `X-HTTP-Method`
    pub fn tunnel_methods(mut self, enabled: bool) -> Self {
        self.config.tunnel_methods = enabled;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the request timeout; `None` waits indefinitely
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// On-disk form of the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub service_root: Option<String>,
    /// `3.0` or `4.0`
    pub version: Option<String>,
    pub format: Option<Format>,
    pub batch_accept: Option<String>,
    pub retain_unknown_properties: Option<bool>,
    pub prefer_representation: Option<bool>,
    pub ieee754_compatible: Option<bool>,
    pub tunnel_methods: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// `<config dir>/odata-cli/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("odata-cli").join("config.toml"))
    }

    /// Read `path` or the default file, then apply `.env` and process environment overrides
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let file = match path {
            Some(path) => ConfigFile::read(path)?,
            None => match ConfigFile::default_path() {
                Some(path) if path.exists() => ConfigFile::read(&path)?,
                _ => ConfigFile::default(),
            },
        };
        Ok(file.with_env(|name| std::env::var(name).ok()))
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |message: String| ConfigError::Write {
            path: path.to_path_buf(),
            message,
        };
        let text = toml::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        std::fs::write(path, text).map_err(|e| write_error(e.to_string()))
    }

    /// Override fields from environment variables looked up through `var`
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = var(ENV_SERVICE_ROOT) {
            self.service_root = Some(root);
        }
        if let Some(version) = var(ENV_VERSION) {
            self.version = Some(version);
        }
        if let Some(username) = var(ENV_USERNAME) {
            self.username = Some(username);
        }
        if let Some(password) = var(ENV_PASSWORD) {
            self.password = Some(password);
        }
        self
    }

    pub fn into_config(self) -> Result<ClientConfig, ConfigError> {
        let root = self
            .service_root
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConfigError::MissingServiceRoot)?;
        let mut builder = ClientConfig::builder(root);

        if let Some(version) = self.version {
            let version = version
                .parse::<ODataVersion>()
                .map_err(|message| ConfigError::InvalidValue { field: "version", message })?;
            builder = builder.version(version);
        }
        if let Some(format) = self.format {
            builder = builder.default_format(format);
        }
        if let Some(accept) = self.batch_accept {
            builder = builder.batch_accept_format(accept);
        }
        if self.retain_unknown_properties == Some(true) {
            builder = builder.unknown_properties(UnknownPropertyPolicy::Retain);
        }
        if let Some(enabled) = self.prefer_representation {
            builder = builder.prefer_representation(enabled);
        }
        if let Some(enabled) = self.ieee754_compatible {
            builder = builder.ieee754_compatible(enabled);
        }
        if let Some(enabled) = self.tunnel_methods {
            builder = builder.tunnel_methods(enabled);
        }
        match (self.username, self.password) {
            (Some(username), Some(password)) => builder = builder.credentials(username, password),
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    field: "password",
                    message: "a username requires a password".to_string(),
                });
            }
            _ => {}
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder("http://host/svc").build();
        assert_eq!(config.version, ODataVersion::V4);
        assert_eq!(config.batch_accept_format, "multipart/mixed");
        assert_eq!(config.unknown_properties, UnknownPropertyPolicy::Drop);
        assert!(config.credentials.is_none());

        let options = config.request_options();
        assert!(!options.tunnel_methods);
        assert_eq!(options.default_format, Format::default());
    }

    #[test]
    fn test_file_roundtrip_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odata-cli").join("config.toml");
        let file = ConfigFile {
            service_root: Some("http://file/svc".into()),
            version: Some("3.0".into()),
            format: Some(Format::Atom),
            batch_accept: Some("application/octet-stream".into()),
            tunnel_methods: Some(true),
            timeout_secs: Some(5),
            ..Default::default()
        };
        file.write(&path).unwrap();

        let env: HashMap<&str, &str> = [(ENV_SERVICE_ROOT, "http://env/svc"), (ENV_USERNAME, "odata"), (ENV_PASSWORD, "secret")]
            .into_iter()
            .collect();
        let config = ConfigFile::read(&path)
            .unwrap()
            .with_env(|name| env.get(name).map(|v| v.to_string()))
            .into_config()
            .unwrap();

        assert_eq!(config.service_root, "http://env/svc");
        assert_eq!(config.version, ODataVersion::V3);
        assert_eq!(config.default_format, Format::Atom);
        assert_eq!(config.batch_accept_format, "application/octet-stream");
        assert!(config.tunnel_methods);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.credentials.unwrap().username, "odata");
    }

    #[test]
    fn test_invalid_values() {
        let missing = ConfigFile::default().into_config();
        assert!(matches!(missing, Err(ConfigError::MissingServiceRoot)));

        let bad_version = ConfigFile {
            service_root: Some("http://host".into()),
            version: Some("2.0".into()),
            ..Default::default()
        };
        assert!(matches!(
            bad_version.into_config(),
            Err(ConfigError::InvalidValue { field: "version", .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "service_root = [").unwrap();
        assert!(matches!(ConfigFile::read(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_credentials_hidden_in_debug() {
        let config = ClientConfig::builder("http://host").credentials("u", "p").build();
        let text = format!("{:?}", config);
        assert!(text.contains("***"));
        assert!(!text.contains("\"p\""));
    }
}
