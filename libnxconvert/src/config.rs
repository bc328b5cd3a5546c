use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::definitions::DefinitionStore;
use super::error::{ConfigError, SchemaError};
use super::hdf_writer::{WriteOptions, DEFAULT_CHUNK_TARGET_BYTES, DEFAULT_COMPRESSION_STRENGTH};
use super::validator::ValidationOptions;
use super::yaml_reader::YAML_READER_NAME;

/// Structure representing one conversion. Contains the definition, the reader and
/// its inputs, the destination and the knobs of validation and writing.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml;
/// fields missing from a file take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub nxdl: String,
    pub reader: String,
    pub input_paths: Vec<PathBuf>,
    pub output_path: PathBuf,
    /// Root of the NeXus definitions; NEXUS_DEF_PATH is used when not set
    pub definitions_path: Option<PathBuf>,
    pub validate: bool,
    pub skip_verify: bool,
    pub fair: bool,
    pub chunk_target_bytes: usize,
    pub compression_strength: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nxdl: String::from(""),
            reader: String::from(YAML_READER_NAME),
            input_paths: Vec::new(),
            output_path: PathBuf::from("output.nxs"),
            definitions_path: None,
            validate: true,
            skip_verify: false,
            fair: false,
            chunk_target_bytes: DEFAULT_CHUNK_TARGET_BYTES,
            compression_strength: DEFAULT_COMPRESSION_STRENGTH,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check that the configuration describes a conversion which can be attempted
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.nxdl.is_empty() {
            return Err(ConfigError::MissingValue("nxdl"));
        }
        if self.reader.is_empty() {
            return Err(ConfigError::MissingValue("reader"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingValue("output_path"));
        }
        if self.compression_strength > 9 {
            return Err(ConfigError::InvalidValue {
                field: "compression_strength",
                reason: format!("{} is outside of 0 to 9", self.compression_strength),
            });
        }
        if self.chunk_target_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunk_target_bytes",
                reason: String::from("must be at least one byte"),
            });
        }
        if let Some(missing) = self.input_paths.iter().find(|p| !p.exists()) {
            return Err(ConfigError::BadFilePath(missing.clone()));
        }
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::BadFilePath(parent.to_path_buf()));
            }
        }
        if let Some(definitions) = &self.definitions_path {
            if !definitions.is_dir() {
                return Err(ConfigError::BadFilePath(definitions.clone()));
            }
        }
        Ok(())
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            chunk_target_bytes: self.chunk_target_bytes,
            default_strength: self.compression_strength,
        }
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions { fair: self.fair }
    }

    /// The store NXDL files are loaded from
    pub fn definition_store(&self) -> Result<DefinitionStore, SchemaError> {
        match &self.definitions_path {
            Some(path) => Ok(DefinitionStore::new(path)),
            None => DefinitionStore::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            nxdl: String::from("NXmpes"),
            input_paths: vec![PathBuf::from("eln.yaml")],
            fair: true,
            ..Default::default()
        };
        config.write_config_file(&path).unwrap();
        assert_eq!(Config::read_config_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "nxdl: NXtest\nskip_verify: true\n").unwrap();
        let config = Config::read_config_file(&path).unwrap();
        assert_eq!(config.nxdl, "NXtest");
        assert!(config.skip_verify);
        assert_eq!(config.reader, YAML_READER_NAME);
        assert_eq!(config.compression_strength, 9);
        assert!(config.validate);
    }

    #[test]
    fn test_bad_file_path() {
        assert!(matches!(
            Config::read_config_file(Path::new("/does/not/exist.yml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_check() {
        let mut config = Config::default();
        assert!(matches!(config.check(), Err(ConfigError::MissingValue("nxdl"))));
        config.nxdl = String::from("NXtest");
        assert!(config.check().is_ok());
        config.compression_strength = 10;
        assert!(matches!(
            config.check(),
            Err(ConfigError::InvalidValue {
                field: "compression_strength",
                ..
            })
        ));
        config.compression_strength = 4;
        config.input_paths.push(PathBuf::from("/does/not/exist.yaml"));
        assert!(matches!(config.check(), Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_options() {
        let config = Config {
            chunk_target_bytes: 4096,
            compression_strength: 3,
            fair: true,
            ..Default::default()
        };
        assert_eq!(config.write_options().chunk_target_bytes, 4096);
        assert_eq!(config.write_options().default_strength, 3);
        assert!(config.validation_options().fair);
    }
}
