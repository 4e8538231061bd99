use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use sems_model::domain::Credentials;
use serde::Deserialize;
use time::{macros::format_description, UtcOffset};

use crate::{sinks::InfluxDbTarget, sources::DEFAULT_LOGIN_URL, transform::path};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SemsConfig {
    pub username: String,
    pub password: String,
    pub plant_id: String,
    /// Polling interval in seconds.
    pub period: u64,
    pub login_url: String,
    pub request_timeout_secs: u64,
    pub session_max_age_secs: u64,
    pub max_session_retries: u32,
    /// Offset of the plant's local clock, e.g. `+02:00`.
    pub utc_offset: String,
}

impl Default for SemsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            plant_id: String::new(),
            period: 60,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            request_timeout_secs: 30,
            session_max_age_secs: 3600,
            max_session_retries: 2,
            utc_offset: "+00:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfluxDbConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub create_database: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub organization: Option<String>,
    pub bucket: Option<String>,
    pub token: Option<String>,
    pub measurement: String,
    pub request_timeout_secs: u64,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 8086,
            database: None,
            create_database: true,
            username: None,
            password: None,
            organization: None,
            bucket: None,
            token: None,
            measurement: "sems".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl InfluxDbConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// A token selects the 2.x write API; otherwise a 1.x database is required.
    pub fn target(&self) -> Result<InfluxDbTarget, ConfigError> {
        if let Some(token) = self.token.clone().filter(|t| !t.is_empty()) {
            let organization = self
                .organization
                .clone()
                .ok_or_else(|| invalid("influxdb.organization is required with a token"))?;
            let bucket = self
                .bucket
                .clone()
                .or_else(|| self.database.clone())
                .ok_or_else(|| invalid("influxdb.bucket is required with a token"))?;
            return Ok(InfluxDbTarget::V2 {
                organization,
                bucket,
                token,
            });
        }

        let database = self
            .database
            .clone()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| invalid("influxdb.database is required"))?;
        Ok(InfluxDbTarget::V1 {
            database,
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sems: SemsConfig,
    pub influxdb: InfluxDbConfig,
    /// Extra metric name to JMESPath expression, e.g. `pv_voltage_4 = "inverter[0].d.vpv4"`.
    pub fields: BTreeMap<String, String>,
    pub archive: Option<ArchiveConfig>,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load an explicit path, or fall back to `config.toml` when present and
    /// to an empty configuration otherwise.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply `CONFIG_SEMS__*` and `CONFIG_INFLUXDB__*` variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| invalid(format!("{key} is not a valid number: {value:?}")))
        }

        fn boolean(key: &str, value: String) -> Result<bool, ConfigError> {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(invalid(format!("{key} is not a valid boolean: {value:?}"))),
            }
        }

        let sems = &mut self.sems;
        if let Some(v) = lookup("CONFIG_SEMS__USERNAME") {
            sems.username = v;
        }
        if let Some(v) = lookup("CONFIG_SEMS__PASSWORD") {
            sems.password = v;
        }
        if let Some(v) = lookup("CONFIG_SEMS__PLANT_ID") {
            sems.plant_id = v;
        }
        if let Some(v) = lookup("CONFIG_SEMS__PERIOD") {
            sems.period = number("CONFIG_SEMS__PERIOD", v)?;
        }
        if let Some(v) = lookup("CONFIG_SEMS__LOGIN_URL") {
            sems.login_url = v;
        }
        if let Some(v) = lookup("CONFIG_SEMS__REQUEST_TIMEOUT_SECS") {
            sems.request_timeout_secs = number("CONFIG_SEMS__REQUEST_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("CONFIG_SEMS__SESSION_MAX_AGE_SECS") {
            sems.session_max_age_secs = number("CONFIG_SEMS__SESSION_MAX_AGE_SECS", v)?;
        }
        if let Some(v) = lookup("CONFIG_SEMS__MAX_SESSION_RETRIES") {
            sems.max_session_retries = number("CONFIG_SEMS__MAX_SESSION_RETRIES", v)?;
        }
        if let Some(v) = lookup("CONFIG_SEMS__UTC_OFFSET") {
            sems.utc_offset = v;
        }

        let influx = &mut self.influxdb;
        if let Some(v) = lookup("CONFIG_INFLUXDB__SCHEME") {
            influx.scheme = v;
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__HOST") {
            influx.host = v;
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__PORT") {
            influx.port = number("CONFIG_INFLUXDB__PORT", v)?;
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__DATABASE") {
            influx.database = Some(v);
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__CREATE_DATABASE") {
            influx.create_database = boolean("CONFIG_INFLUXDB__CREATE_DATABASE", v)?;
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__USERNAME") {
            influx.username = Some(v);
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__PASSWORD") {
            influx.password = Some(v);
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__ORGANIZATION") {
            influx.organization = Some(v);
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__BUCKET") {
            influx.bucket = Some(v);
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__TOKEN") {
            influx.token = Some(v);
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__MEASUREMENT") {
            influx.measurement = v;
        }
        if let Some(v) = lookup("CONFIG_INFLUXDB__REQUEST_TIMEOUT_SECS") {
            influx.request_timeout_secs = number("CONFIG_INFLUXDB__REQUEST_TIMEOUT_SECS", v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sems = &self.sems;
        for (name, value) in [
            ("sems.username", &sems.username),
            ("sems.password", &sems.password),
            ("sems.plant_id", &sems.plant_id),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("{name} is required")));
            }
        }
        if sems.period == 0 {
            return Err(invalid("sems.period must be at least 1 second"));
        }
        if sems.request_timeout_secs == 0 || self.influxdb.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be at least 1 second"));
        }
        if sems.session_max_age_secs == 0 {
            return Err(invalid("sems.session_max_age_secs must be at least 1 second"));
        }
        self.utc_offset()?;

        if self.influxdb.measurement.trim().is_empty() {
            return Err(invalid("influxdb.measurement is required"));
        }
        self.influxdb.target()?;

        for (name, field_path) in &self.fields {
            if name.trim().is_empty() {
                return Err(invalid("fields: empty metric name"));
            }
            path::validate(field_path).map_err(|e| invalid(format!("fields.{name}: {e}")))?;
        }

        if let Some(archive) = &self.archive {
            if !archive.dir.is_dir() {
                return Err(invalid(format!(
                    "archive.dir {} is not a directory",
                    archive.dir.display()
                )));
            }
        }

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            account: self.sems.username.clone(),
            password: self.sems.password.clone(),
            plant_id: self.sems.plant_id.clone(),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.sems.period)
    }

    pub fn utc_offset(&self) -> Result<UtcOffset, ConfigError> {
        let raw = self.sems.utc_offset.trim();
        if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
            return Ok(UtcOffset::UTC);
        }
        UtcOffset::parse(raw, format_description!("[offset_hour sign:mandatory]:[offset_minute]"))
            .map_err(|e| invalid(format!("sems.utc_offset {raw:?}: {e}")))
    }
}
