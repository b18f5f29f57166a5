//! Credentials and authentication helpers.
//!
//! The connection asks a [`CredentialSource`] for a secret each time the
//! server issues a password-based challenge. How that secret is obtained
//! (static value, environment, an identity provider) is the source's
//! business. Sources are resolved by name through a [`CredentialRegistry`].

use std::collections::HashMap;

use super::connection::Config;
use super::scram::ScramClient;
use crate::error::{Error, Result};

/// Supplies the secret for a password, MD5 or SASL challenge.
pub trait CredentialSource: Send {
    fn password(&self) -> Result<Vec<u8>>;
}

/// A fixed password.
pub struct StaticPassword(Vec<u8>);

impl StaticPassword {
    pub fn new(password: impl Into<Vec<u8>>) -> Self {
        Self(password.into())
    }
}

impl CredentialSource for StaticPassword {
    fn password(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Reads the password from an environment variable at challenge time.
pub struct EnvPassword {
    pub var: String,
}

impl CredentialSource for EnvPassword {
    fn password(&self) -> Result<Vec<u8>> {
        std::env::var_os(&self.var)
            .map(|v| v.to_string_lossy().into_owned().into_bytes())
            .ok_or_else(|| {
                Error::Interface(format!(
                    "server requested a password but {} is not set",
                    self.var
                ))
            })
    }
}

/// No secret available; any password challenge fails.
pub struct NoPassword;

impl CredentialSource for NoPassword {
    fn password(&self) -> Result<Vec<u8>> {
        Err(Error::Interface(
            "server requested password-based authentication, but no password was provided"
                .to_string(),
        ))
    }
}

pub type CredentialFactory = fn(&Config) -> Result<Box<dyn CredentialSource>>;

/// Named credential source factories.
pub struct CredentialRegistry {
    factories: HashMap<String, CredentialFactory>,
}

impl CredentialRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with `password` (from `Config::password`) and `env`
    /// (`PGPASSWORD`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("password", |config| {
            Ok(match &config.password {
                Some(p) => Box::new(StaticPassword::new(p.as_bytes())),
                None => Box::new(NoPassword),
            })
        });
        registry.register("env", |_| {
            Ok(Box::new(EnvPassword {
                var: "PGPASSWORD".to_string(),
            }))
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: CredentialFactory) {
        self.factories.insert(name.to_ascii_lowercase(), factory);
    }

    pub fn resolve(&self, name: &str, config: &Config) -> Result<Box<dyn CredentialSource>> {
        let factory = self
            .factories
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Error::Interface(format!("unknown credential provider {:?}", name)))?;
        factory(config)
    }
}

impl Default for CredentialRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Client side of a SASL exchange (client-first, server-first,
/// client-final, server-final).
pub trait SaslClient: Send {
    fn mechanism(&self) -> &str;

    fn client_first(&mut self) -> Vec<u8>;

    /// Consume server-first, produce client-final.
    fn server_first(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Verify server-final.
    fn server_final(&mut self, data: &[u8]) -> Result<()>;
}

/// Creates a SASL client for `(user, password)`.
pub type SaslFactory = fn(&str, &[u8]) -> Box<dyn SaslClient>;

pub fn scram_sha_256(user: &str, password: &[u8]) -> Box<dyn SaslClient> {
    Box::new(ScramClient::new(user, password))
}

/// `"md5" + md5(md5(password + user) + salt)`, hex encoded.
pub fn md5_password(user: &str, password: &[u8], salt: &[u8; 4]) -> Vec<u8> {
    let mut inner = password.to_vec();
    inner.extend_from_slice(user.as_bytes());
    let inner_hex = format!("{:x}", md5::compute(&inner));

    let mut outer = inner_hex.into_bytes();
    outer.extend_from_slice(salt);
    format!("md5{:x}", md5::compute(&outer)).into_bytes()
}
