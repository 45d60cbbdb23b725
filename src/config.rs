use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    FileNotFound(String),

    #[error("failed to write config file at {0}: {1}")]
    FailedToWrite(String, String),

    #[error("failed to parse config at {0}: {1}")]
    ParseError(String, String),
}

/// Digest-auth credentials registered with the coordination store before connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

/// ACL entry applied to membership nodes and the election parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub scheme: String,
    pub id: String,
    pub permissions: Permissions,
}

impl AclEntry {
    pub fn world_readable() -> Self {
        Self {
            scheme: "world".to_string(),
            id: "anyone".to_string(),
            permissions: Permissions::READ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions(pub u8);

impl Permissions {
    pub const READ: Permissions = Permissions(1 << 0);
    pub const WRITE: Permissions = Permissions(1 << 1);
    pub const CREATE: Permissions = Permissions(1 << 2);
    pub const DELETE: Permissions = Permissions(1 << 3);
    pub const ADMIN: Permissions = Permissions(1 << 4);
    pub const ALL: Permissions = Permissions(0b11111);
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;
    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

/// Connection-level inputs to the coordination client factory (spec §4.1, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub store_url: String,
    #[serde(with = "duration_millis")]
    pub session_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub blocking_connect_timeout: Duration,
    pub default_acl: Vec<AclEntry>,
    pub credentials: Option<DigestCredentials>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store_url: "127.0.0.1:2181".to_string(),
            session_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            blocking_connect_timeout: Duration::from_secs(15),
            default_acl: Vec::new(),
            credentials: None,
        }
    }
}

/// Election-specific inputs: this candidate's identity and the shared base path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub candidate_id: String,
    pub election_path: String,
}

impl ElectionConfig {
    /// The latch operates under a sibling subpath so it coexists with
    /// legacy election records stored directly under `election_path`.
    pub fn curator_path(&self) -> String {
        format!("{}-curator", self.election_path)
    }
}

impl ClientConfig {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound(display.clone()))?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError(display, e.to_string()))
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::ParseError(display.clone(), e.to_string()))?;
        fs::write(path, contents).map_err(|e| ConfigError::FailedToWrite(display, e.to_string()))
    }

    pub fn write_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::default();
        config.write(path)?;
        Ok(config)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
