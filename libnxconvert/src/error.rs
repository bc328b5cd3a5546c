use std::path::PathBuf;
use thiserror::Error;

use super::validator::ValidationReport;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to parse NXDL XML: {0}")]
    Xml(String),
    #[error("NXDL document does not have a <definition> root element")]
    MissingDefinition,
    #[error("NXDL element <{element}> is missing the required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },
    #[error("Unknown NXDL type token '{0}'")]
    UnknownType(String),
    #[error("Unknown NXDL unit category '{0}'")]
    UnknownUnitCategory(String),
    #[error("Invalid value '{value}' for NXDL attribute '{attribute}'")]
    InvalidAttribute { attribute: String, value: String },
    #[error("Enumeration declared on '{name}' which has type {nx_type}; enumerations require NX_CHAR")]
    EnumerationOnNonChar { name: String, nx_type: String },
    #[error("The name '{name}' is declared more than once inside {parent}")]
    NameCollision { parent: String, name: String },
    #[error("Base class inheritance cycle detected: {0}")]
    Cycle(String),
    #[error("Could not find the NXDL definition {0} beneath {1:?}")]
    DefinitionNotFound(String, PathBuf),
    #[error("No NeXus definitions directory is configured; set NEXUS_DEF_PATH or definitions_path")]
    NoDefinitionsPath,
    #[error("Schema compiler failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Template path is empty")]
    Empty,
    #[error("Template path '{0}' is not absolute")]
    NotAbsolute(String),
    #[error("Template path '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("Template path '{0}' contains a malformed class marker")]
    MalformedClassMarker(String),
    #[error("Template path '{0}' has an attribute segment which is not the last segment")]
    AttributeNotLast(String),
    #[error("Template path '{path}' has {needed} wildcard(s) but only {given} index(es) were given")]
    NotEnoughIndices {
        path: String,
        needed: usize,
        given: usize,
    },
    #[error("Cannot assign a value to the wildcard path '{0}'; substitute the wildcard first")]
    Wildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("Malformed unit expression '{0}'")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Reader {0} returned an empty template")]
    Empty(String),
    #[error("No reader is registered under the name '{0}'")]
    UnknownReader(String),
    #[error("Reader {reader} does not support the application definition {nxdl}")]
    UnsupportedDefinition { reader: String, nxdl: String },
    #[error("Reader {0} was not given any input file it can read")]
    NoInputs(String),
    #[error("Reader failed to read {file:?}: {reason}")]
    Malformed { file: PathBuf, reason: String },
    #[error("Reader failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Reader failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Reader produced an invalid template path: {0}")]
    PathError(#[from] PathError),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("HDF5Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("HDF5Writer could not move the finished file into place: {0}")]
    PersistError(#[from] tempfile::PathPersistError),
    #[error("HDF5Writer failed to encode a string: {0}")]
    StringError(String),
    #[error("HDF5Writer was asked to write {0} twice")]
    DuplicatePath(String),
    #[error("HDF5Writer cannot write {0} because its parent is not a group")]
    ParentNotGroup(String),
    #[error("HDF5Writer cannot store the value at {0} as an attribute")]
    UnsupportedAttributeValue(String),
    #[error("HDF5Writer was given compression strength {1} at {0}; the valid range is 0 to 9")]
    InvalidStrength(String, u8),
    #[error("HDF5Writer does not know the compression filter '{1}' requested at {0}")]
    UnknownFilter(String, String),
    #[error("HDF5Writer cannot write the unsubstituted wildcard path {0}")]
    WildcardPath(String),
    #[error("HDF5Writer cannot build the virtual dataset {path}: {reason}")]
    VirtualDataset { path: String, reason: String },
    #[error("HDF5Writer was cancelled; the partial file was removed")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config is missing a value for {0}")]
    MissingValue(&'static str),
    #[error("Config value for {field} is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Conversion failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Conversion failed due to schema error: {0}")]
    SchemaError(#[from] SchemaError),
    #[error("Conversion failed due to Reader error: {0}")]
    ReaderError(#[from] ReaderError),
    #[error("Conversion failed due to validation error: {0}")]
    ValidationError(ValidationReport),
    #[error("Conversion failed due to HDF5Writer error: {0}")]
    WriterError(#[from] WriterError),
}

impl ConvertError {
    /// The process exit code the command line front end reports for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ReaderError(ReaderError::UnknownReader(_))
            | Self::ReaderError(ReaderError::UnsupportedDefinition { .. }) => 5,
            Self::ReaderError(_) => 1,
            Self::ValidationError(_) => 2,
            Self::WriterError(_) => 3,
            Self::SchemaError(_) => 4,
            Self::ConfigError(_) => 5,
        }
    }
}
