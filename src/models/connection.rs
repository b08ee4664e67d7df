//! Connection-related data models.
//!
//! This module defines the datasource settings delivered by the host and the
//! connection string derived from them.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    #[serde(alias = "postgresql")]
    Postgres,
    /// Includes MariaDB
    #[serde(alias = "mariadb")]
    MySql,
    SQLite,
}

impl DatabaseType {
    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::SQLite => None,
        }
    }

    /// Statement returning the server's current timestamp.
    pub fn health_check_sql(&self) -> &'static str {
        match self {
            Self::Postgres | Self::SQLite => "SELECT CURRENT_TIMESTAMP",
            // Without a precision MySQL truncates to whole seconds
            Self::MySql => "SELECT CURRENT_TIMESTAMP(6)",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Unencrypted datasource options (the host's `jsonData`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceOptions {
    #[serde(default)]
    pub host: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub driver: DatabaseType,
}

/// Accept `"50000"` as well as `50000`; hosts are not consistent about it.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Port::deserialize(deserializer)? {
        Port::Text(s) => s,
        Port::Number(n) => n.to_string(),
    })
}

/// Settings for one configured datasource instance, as delivered by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceInstanceSettings {
    #[serde(default)]
    pub id: i64,
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub json_data: serde_json::Value,
    /// Contains secrets - never log
    #[serde(default, skip_serializing)]
    pub decrypted_secure_json_data: HashMap<String, String>,
    pub updated: DateTime<Utc>,
}

impl DataSourceInstanceSettings {
    /// Decode the unencrypted options.
    pub fn options(&self) -> DbResult<DataSourceOptions> {
        if self.json_data.is_null() {
            return Ok(DataSourceOptions::default());
        }
        serde_json::from_value(self.json_data.clone()).map_err(|e| {
            DbError::settings(format!(
                "Invalid jsonData for datasource '{}': {}",
                self.name, e
            ))
        })
    }

    /// The decrypted password, or an empty string when none was configured.
    pub fn password(&self) -> &str {
        self.decrypted_secure_json_data
            .get("password")
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Identifies the caller of an invocation and carries its instance settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginContext {
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub data_source_instance_settings: Option<DataSourceInstanceSettings>,
}

/// Keyword/value pairs carried by a [`ConnectionString`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionKeywords {
    pub hostname: String,
    pub port: String,
    pub database: String,
    pub uid: String,
    pub pwd: String,
}

/// Driver connection string: `HOSTNAME=<h>;PORT=<p>;DATABASE=<d>;UID=<u>;PWD=<secret>`.
///
/// Built once per datasource instance. The password is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString(String);

impl ConnectionString {
    /// Build the connection string from its parts.
    pub fn new(host: &str, port: &str, database: &str, user: &str, password: &str) -> Self {
        Self(format!(
            "HOSTNAME={};PORT={};DATABASE={};UID={};PWD={}",
            host, port, database, user, password
        ))
    }

    /// Build the connection string from delivered settings.
    pub fn from_settings(settings: &DataSourceInstanceSettings) -> DbResult<Self> {
        let options = settings.options()?;
        Ok(Self::new(
            &options.host,
            &options.port,
            &options.database,
            &options.user,
            settings.password(),
        ))
    }

    /// The exact string handed to the driver (contains the password).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A display-safe version with the password masked.
    pub fn masked(&self) -> String {
        match self.0.find("PWD=") {
            Some(idx) => format!("{}PWD=****", &self.0[..idx]),
            None => self.0.clone(),
        }
    }

    /// Split the string back into its keywords.
    ///
    /// `PWD` is always last, so a password may itself contain `;` or `=`.
    pub fn keywords(&self) -> ConnectionKeywords {
        let mut keywords = ConnectionKeywords::default();
        let (head, pwd) = match self.0.find("PWD=") {
            Some(idx) => (&self.0[..idx], &self.0[idx + 4..]),
            None => (self.0.as_str(), ""),
        };
        keywords.pwd = pwd.to_string();

        for pair in head.split(';').filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.to_string();
            match key.to_ascii_uppercase().as_str() {
                "HOSTNAME" => keywords.hostname = value,
                "PORT" => keywords.port = value,
                "DATABASE" => keywords.database = value,
                "UID" => keywords.uid = value,
                _ => {}
            }
        }
        keywords
    }
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionString")
            .field(&self.masked())
            .finish()
    }
}
