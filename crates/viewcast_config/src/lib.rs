//! Configuration loading for the viewcast processes.
//!
//! Settings come from an optional `config/default.*` file, then from the
//! environment (a `.env` file is loaded first). The flat variables `PORT`,
//! `HOST`, `RABBIT`, `DBHOST` and `DBNAME` map to top level keys; nested keys
//! use a double underscore, e.g. `BROKER__ACK_TIMEOUT_SECS` or `VIDEOS__DIR`.
//!
//! Loading never fails because a value is absent. Each process asks for its
//! own view (`Settings::broker`, `Settings::streaming`,
//! `Settings::recommendations`), which is where required values are enforced.

pub mod settings;


use crate::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerProcessSettings, BrokerSettings, RecommendationsSettings, ServerSettings, Settings,
    SettingsError, StreamingSettings,
};

pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("__"));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::from_partial(partial))
}
