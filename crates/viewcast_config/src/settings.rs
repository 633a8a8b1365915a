use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Fully merged configuration. Connection endpoints stay optional here and
/// are only required by the process views that need them.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    /// Broker URL, e.g. `ws://broker:5672`
    pub rabbit: Option<String>,
    pub dbhost: Option<String>,
    pub dbname: Option<String>,
    pub videos_dir: PathBuf,
}

/// Address an HTTP or broker listener binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Operational limits of the broker process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub max_connections: usize,
    /// Seconds an unacknowledged delivery may stay outstanding before requeue.
    pub ack_timeout_secs: u64,
    pub max_redeliveries: u32,
}

/// What `viewcast broker` needs.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerProcessSettings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
}

/// What `viewcast streaming` needs.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingSettings {
    pub server: ServerSettings,
    pub broker_url: String,
    pub videos_dir: PathBuf,
}

/// What `viewcast recommendations` needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationsSettings {
    pub server: ServerSettings,
    pub broker_url: String,
    pub db_host: String,
    pub db_name: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("please specify the {what} with the environment variable {var}")]
    Missing {
        var: &'static str,
        what: &'static str,
    },
}

/// Partial configuration settings loaded from files or environment.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub rabbit: Option<String>,
    pub dbhost: Option<String>,
    pub dbname: Option<String>,
    pub broker: Option<PartialBrokerSettings>,
    pub videos: Option<PartialVideoSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub ack_timeout_secs: Option<u64>,
    pub max_redeliveries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialVideoSettings {
    pub dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            broker: BrokerSettings {
                max_connections: 1000,
                ack_timeout_secs: 30,
                max_redeliveries: 5,
            },
            rabbit: None,
            dbhost: None,
            dbname: None,
            videos_dir: PathBuf::from("./videos"),
        }
    }
}

impl Settings {
    /// Merge whatever was provided over the defaults.
    pub fn from_partial(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let broker = partial.broker.unwrap_or_default();

        Self {
            server: ServerSettings {
                host: partial.host.unwrap_or(default.server.host),
                port: partial.port.unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(default.broker.max_connections),
                ack_timeout_secs: broker
                    .ack_timeout_secs
                    .unwrap_or(default.broker.ack_timeout_secs),
                max_redeliveries: broker
                    .max_redeliveries
                    .unwrap_or(default.broker.max_redeliveries),
            },
            rabbit: non_empty(partial.rabbit),
            dbhost: non_empty(partial.dbhost),
            dbname: non_empty(partial.dbname),
            videos_dir: partial
                .videos
                .and_then(|v| v.dir)
                .unwrap_or(default.videos_dir),
        }
    }

    pub fn broker(&self) -> BrokerProcessSettings {
        BrokerProcessSettings {
            server: self.server.clone(),
            broker: self.broker.clone(),
        }
    }

    pub fn streaming(&self) -> Result<StreamingSettings, SettingsError> {
        Ok(StreamingSettings {
            server: self.server.clone(),
            broker_url: self.require_broker_url()?,
            videos_dir: self.videos_dir.clone(),
        })
    }

    pub fn recommendations(&self) -> Result<RecommendationsSettings, SettingsError> {
        let broker_url = self.require_broker_url()?;
        let db_host = self.dbhost.clone().ok_or(SettingsError::Missing {
            var: "DBHOST",
            what: "database host",
        })?;
        let db_name = self.dbname.clone().ok_or(SettingsError::Missing {
            var: "DBNAME",
            what: "name of the database",
        })?;

        Ok(RecommendationsSettings {
            server: self.server.clone(),
            broker_url,
            db_host,
            db_name,
        })
    }

    fn require_broker_url(&self) -> Result<String, SettingsError> {
        self.rabbit.clone().ok_or(SettingsError::Missing {
            var: "RABBIT",
            what: "broker URL",
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
