//! Configuration loader and validator for the CI relay bot.
use crate::model::ServerInfo;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub ci: Ci,
    pub servers: Vec<ServerInfo>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Address the build webhook listens on.
    pub listen: String,
    /// Optional file with one code-quality quip per line.
    #[serde(default)]
    pub quips_file: Option<String>,
}

/// Telegram bot settings.
///
/// The bot's group privacy mode must be disabled so it sees every message
/// in the build channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Users allowed to run `/ci` commands.
    pub admins: Vec<i64>,
}

/// CI service endpoint and shared secrets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ci {
    pub base_url: String,
    /// Secret the CI service must present on build callbacks.
    pub incoming_api_key: String,
    /// Secret sent to the CI service on outgoing requests.
    pub outgoing_api_key: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Quip lines, from `app.quips_file` when set, else the bundled list.
    pub fn quips(&self) -> Result<Vec<String>, ConfigError> {
        let content = match &self.app.quips_file {
            Some(path) => fs::read_to_string(path)?,
            None => crate::quality::BUNDLED_QUIPS.to_string(),
        };
        let quips: Vec<String> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_owned)
            .collect();
        if quips.is_empty() {
            return Err(ConfigError::Invalid("quips file must contain at least one line"));
        }
        Ok(quips)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.listen.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("app.listen must be a socket address"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    if reqwest::Url::parse(&cfg.ci.base_url).is_err() {
        return Err(ConfigError::Invalid("ci.base_url must be a valid URL"));
    }
    if cfg.ci.incoming_api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("ci.incoming_api_key must be non-empty"));
    }
    if cfg.ci.outgoing_api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("ci.outgoing_api_key must be non-empty"));
    }

    for server in &cfg.servers {
        if server.id.trim().is_empty() || server.short_name.trim().is_empty() {
            return Err(ConfigError::Invalid("servers[].id and short_name must be non-empty"));
        }
        if server.tgs.trim().is_empty() {
            return Err(ConfigError::Invalid("servers[].tgs must be non-empty"));
        }
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  listen: "127.0.0.1:8090"

# Disable the bot's privacy mode (BotFather /setprivacy) so it sees all
# group messages; channel posts are always delivered to channel admins.
telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  admins:
    - 123456789

ci:
  base_url: "http://127.0.0.1:3000"
  incoming_api_key: "INCOMING_SECRET"
  outgoing_api_key: "OUTGOING_SECRET"

servers:
  - id: "main1"
    short_name: "Goon 1"
    tgs: "main1"
    aliases: ["1"]
    categories: ["standard", "main"]
  - id: "main2"
    short_name: "Goon 2"
    tgs: "main2"
    aliases: ["2"]
    categories: ["standard", "main"]
  - id: "main3"
    short_name: "Goon 3 RP"
    tgs: "main3"
    aliases: ["3", "rp"]
    categories: ["rp"]
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.servers.len(), 3);
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.telegram.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_ci_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ci.base_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("ci.base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ci.incoming_api_key = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ci.outgoing_api_key = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_listen_and_servers() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.listen = "localhost".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.servers[0].tgs = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn quips_from_file_skip_blank_lines() {
        let td = tempdir().unwrap();
        let p = td.path().join("quips.txt");
        let mut f = fs::File::create(&p).unwrap();
        writeln!(f, "Solid work\n\nShips it").unwrap();
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.quips_file = Some(p.to_string_lossy().to_string());
        assert_eq!(cfg.quips().unwrap(), vec!["Solid work", "Ships it"]);

        cfg.app.quips_file = None;
        assert!(!cfg.quips().unwrap().is_empty());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.telegram.admins, vec![123456789]);
    }
}
