use std::path::Path;

use anyhow::{Result, anyhow};
use blobsnap_library::{
    DiskStoreConfig, StoreConfig, constant::DEFAULT_PREFIX, snapshot::validate_prefix,
};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "BLOBSNAP_";

const DEFAULT_STORE_PATH: &str = "blobsnap_storage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub prefix: String,
    pub retention: usize,
    pub prune_concurrency: usize,
    pub compress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            retention: 3,
            prune_concurrency: 4,
            compress: false,
        }
    }
}

impl Config {
    /// Layers defaults, the optional TOML file and `BLOBSNAP_*` environment
    /// variables, in that order. Nested keys use `__`, e.g.
    /// `BLOBSNAP_STORE__DISK__PATH`.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(anyhow!("config file {} does not exist", path.display()));
            }

            figment = figment.merge(Toml::file(path));
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config.with_default_store())
    }

    fn with_default_store(mut self) -> Self {
        if self.store.s3.is_none() && self.store.disk.is_none() {
            self.store.disk = Some(DiskStoreConfig {
                path: DEFAULT_STORE_PATH.to_string(),
            });
        }

        self
    }

    /// A store path given on the command line replaces whichever backend the
    /// configuration selected.
    pub fn override_store_path(&mut self, path: String) {
        self.store = StoreConfig {
            s3: None,
            disk: Some(DiskStoreConfig { path }),
        };
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.s3.is_some() && self.store.disk.is_some() {
            return Err(anyhow!("cannot specify both s3 and disk blob storage"));
        }
        if self.store.s3.is_none() && self.store.disk.is_none() {
            return Err(anyhow!("must specify one of s3 or disk blob storage"));
        }
        if self.retention == 0 {
            return Err(anyhow!("retention must be at least 1"));
        }
        if self.prune_concurrency == 0 {
            return Err(anyhow!("prune_concurrency must be at least 1"));
        }
        validate_prefix(&self.prefix)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use blobsnap_library::S3Config;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_defaults_use_disk_store() -> Result<()> {
        let config = Config::default().with_default_store();

        config.validate()?;
        assert_eq!(config.retention, 3);
        assert_eq!(
            config.store.disk,
            Some(DiskStoreConfig {
                path: DEFAULT_STORE_PATH.to_string()
            })
        );

        Ok(())
    }

    #[test]
    fn test_file_selects_s3_without_disk_default() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("blobsnap.toml");
        fs::write(
            &path,
            r#"
retention = 7
prefix = "nightly"

[store.s3]
bucket = "backups"
region = "eu-west-1"
"#,
        )?;

        let config = Config::load(Some(&path))?;

        config.validate()?;
        assert_eq!(config.retention, 7);
        assert_eq!(config.prefix, "nightly");
        assert_eq!(config.store.disk, None);
        assert_eq!(
            config.store.s3,
            Some(S3Config {
                bucket: "backups".to_string(),
                region: "eu-west-1".to_string(),
            })
        );

        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let config = Config {
            retention: 0,
            ..Config::default().with_default_store()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_escaped_prefix() {
        let config = Config {
            prefix: "team#1".to_string(),
            ..Config::default().with_default_store()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_path_override_replaces_s3() {
        let mut config = Config {
            store: StoreConfig {
                s3: Some(S3Config {
                    bucket: "b".to_string(),
                    region: "r".to_string(),
                }),
                disk: None,
            },
            ..Config::default()
        };

        config.override_store_path("/tmp/store".to_string());

        assert!(config.validate().is_ok());
        assert_eq!(config.store.s3, None);
    }
}
