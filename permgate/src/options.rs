use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Persisted defaults for flags the user would otherwise repeat on every
/// invocation. Unset fields fall back to files under the home directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_db: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Address>,
}

const OPTIONS_CONFIG_FILE: &str = ".options_config.json";

/// Sender used when neither a flag nor the options file names one.
pub const DEFAULT_ACCOUNT: Address = Address::new([0x01; 20]);

/// Global home directory path, initialized once on first access
static HOME_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    if let Ok(home_path) = std::env::var("PERMGATE_HOME") {
        return PathBuf::from(home_path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".permgate")
});

/// Must run before anything reads the home directory.
pub fn initialize_home_directory(home_directory_path: &Path) {
    std::env::set_var(
        "PERMGATE_HOME",
        home_directory_path.to_string_lossy().to_string(),
    );
}

pub fn get_home_directory() -> &'static PathBuf {
    &HOME_DIR
}

/// Returns defaults if the file doesn't exist or can't be parsed.
pub async fn load_options_config() -> OptionsConfig {
    let config_path = HOME_DIR.join(OPTIONS_CONFIG_FILE);

    match tokio::fs::read_to_string(&config_path).await {
        Ok(contents) => match serde_json::from_str::<OptionsConfig>(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("failed to parse {}: {e}", config_path.display());
                OptionsConfig::default()
            }
        },
        Err(_) => {
            debug!("no options file at {}", config_path.display());
            OptionsConfig::default()
        }
    }
}

pub async fn save_options_config(config: &OptionsConfig) -> Result<PathBuf, std::io::Error> {
    let config_path = HOME_DIR.join(OPTIONS_CONFIG_FILE);

    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let contents = serde_json::to_string_pretty(config)?;
    tokio::fs::write(&config_path, contents).await?;
    Ok(config_path)
}

/// Effective locations and identity for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub cache_path: PathBuf,
    pub chain_path: PathBuf,
    pub mirror_db: PathBuf,
    pub account: Address,
}

impl OptionsConfig {
    /// Command-line values win over the options file, which wins over the
    /// defaults under `home`.
    pub fn resolve(&self, overrides: &OptionsConfig, home: &Path) -> Resolved {
        let pick = |flag: &Option<PathBuf>, saved: &Option<PathBuf>, default: &str| {
            flag.clone()
                .or_else(|| saved.clone())
                .unwrap_or_else(|| home.join(default))
        };
        Resolved {
            cache_path: pick(&overrides.cache_path, &self.cache_path, "deployments.json"),
            chain_path: pick(&overrides.chain_path, &self.chain_path, "chain.json"),
            mirror_db: pick(&overrides.mirror_db, &self.mirror_db, "mirror.db"),
            account: overrides
                .account
                .or(self.account)
                .unwrap_or(DEFAULT_ACCOUNT),
        }
    }

    /// `self` with every field set in `overrides` replaced.
    pub fn merged(&self, overrides: &OptionsConfig) -> OptionsConfig {
        OptionsConfig {
            cache_path: overrides.cache_path.clone().or_else(|| self.cache_path.clone()),
            chain_path: overrides.chain_path.clone().or_else(|| self.chain_path.clone()),
            mirror_db: overrides.mirror_db.clone().or_else(|| self.mirror_db.clone()),
            account: overrides.account.or(self.account),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_saved_options() {
        let home = Path::new("/home/op/.permgate");
        let saved = OptionsConfig {
            cache_path: Some(PathBuf::from("/srv/deployments.json")),
            account: Some(Address::repeat_byte(0xaa)),
            ..Default::default()
        };
        let flags = OptionsConfig {
            account: Some(Address::repeat_byte(0xbb)),
            ..Default::default()
        };

        let resolved = saved.resolve(&flags, home);
        assert_eq!(resolved.cache_path, PathBuf::from("/srv/deployments.json"));
        assert_eq!(resolved.chain_path, home.join("chain.json"));
        assert_eq!(resolved.mirror_db, home.join("mirror.db"));
        assert_eq!(resolved.account, Address::repeat_byte(0xbb));
    }

    #[test]
    fn test_defaults() {
        let resolved = OptionsConfig::default().resolve(&OptionsConfig::default(), Path::new("/h"));
        assert_eq!(resolved.account, DEFAULT_ACCOUNT);
        assert_eq!(resolved.cache_path, PathBuf::from("/h/deployments.json"));
    }

    #[test]
    fn test_partial_file_parses() {
        let parsed: OptionsConfig =
            serde_json::from_str(r#"{ "mirror_db": "/var/mirror.db" }"#).unwrap();
        assert_eq!(parsed.mirror_db, Some(PathBuf::from("/var/mirror.db")));
        assert_eq!(parsed.account, None);

        let merged = parsed.merged(&OptionsConfig {
            account: Some(Address::repeat_byte(3)),
            ..Default::default()
        });
        assert_eq!(merged.mirror_db, Some(PathBuf::from("/var/mirror.db")));
        assert_eq!(merged.account, Some(Address::repeat_byte(3)));
    }
}
