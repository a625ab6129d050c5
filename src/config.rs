use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use ::config::{
    builder::DefaultState, Config as Sources, ConfigBuilder, Environment as EnvVars, File,
};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::seal::{SealError, SealKey};

const DEFAULT_ADDR: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);
const DEFAULT_PORT: u16 = 8080;

const DEFAULT_COOKIE_NAME: &str = "_porch_session";

const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_STATIC_DIR: &str = "static";

/// Optional configuration file, without extension.
const CONFIG_FILE: &str = "porch";
const ENV_PREFIX: &str = "PORCH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid secret key: {0}")]
    SecretKey(#[from] SealError),
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "development")]
    Dev,
    #[default]
    #[serde(alias = "production")]
    Prod,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_addr")]
    pub ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of the site, used to build the OIDC redirect URL.
    pub site_url: Url,
    pub database_url: String,
    /// Base64 encoded 32 byte key for sealing sessions and login state.
    pub secret_key: String,
    #[serde(default = "default_cookie_config")]
    pub cookie: CookieConfig,
    pub oidc: OidcConfig,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
pub struct CookieConfig {
    pub name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct OidcConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// The provider's end session endpoint, if logging out should also end
    /// the session with the provider.
    #[serde(default)]
    pub logout_url: Option<Url>,
}

impl Config {
    /// Load the configuration from `porch.toml`, if present, overridden by
    /// `PORCH_*` environment variables. Nested keys are separated by `__`,
    /// as in `PORCH_OIDC__CLIENT_ID`.
    pub fn try_env() -> Result<Self, ConfigError> {
        Self::from_sources(
            Sources::builder()
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(env_vars()),
        )
    }

    fn from_sources(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.secret_key()?;

        Ok(config)
    }

    pub fn is_dev(&self) -> bool {
        self.environment == Environment::Dev
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn secret_key(&self) -> Result<SealKey, SealError> {
        SealKey::from_base64(&self.secret_key)
    }
}

fn env_vars() -> EnvVars {
    EnvVars::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

const fn default_addr() -> IpAddr {
    DEFAULT_ADDR
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cookie_config() -> CookieConfig {
    CookieConfig {
        name: DEFAULT_COOKIE_NAME.to_string(),
    }
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TEMPLATES_DIR)
}

fn default_static_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATIC_DIR)
}

#[cfg(test)]
impl Config {
    pub(crate) fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::from_sources(
            Sources::builder().add_source(File::from_str(toml, ::config::FileFormat::Toml)),
        )
    }
}
