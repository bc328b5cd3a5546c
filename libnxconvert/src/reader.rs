//! The reader interface and the table of built-in readers.
//!
//! A reader receives the empty template of the requested application definition
//! and hands it back populated. Readers are looked up by name in a
//! [`ReaderRegistry`] which is filled once at startup.
use std::any::Any;
use std::path::PathBuf;

use super::error::ReaderError;
use super::template::Template;
use super::yaml_reader::YamlReader;

/// Matches any application definition in `supported_nxdls`
pub const ANY_NXDL: &str = "*";

pub trait Reader: Send + Sync {
    /// The name the reader is registered under, e.g. `yaml`
    fn name(&self) -> &str;

    /// Application definitions this reader can fill. [`ANY_NXDL`] matches all.
    fn supported_nxdls(&self) -> &[&str];

    /// Populate the template from the input files and optional in-memory objects
    fn read(
        &self,
        template: Template,
        file_paths: &[PathBuf],
        objects: Option<&[Box<dyn Any>]>,
    ) -> Result<Template, ReaderError>;

    fn supports(&self, nxdl: &str) -> bool {
        self.supported_nxdls()
            .iter()
            .any(|s| *s == ANY_NXDL || *s == nxdl)
    }
}

type ReaderFactory = fn() -> Box<dyn Reader>;

fn yaml_reader() -> Box<dyn Reader> {
    Box::new(YamlReader)
}

/// Readers compiled into the converter
const BUILTIN_READERS: [ReaderFactory; 1] = [yaml_reader];

/// Name keyed table of readers
#[derive(Default)]
pub struct ReaderRegistry {
    readers: Vec<Box<dyn Reader>>,
}

impl ReaderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_readers() -> Self {
        let mut registry = Self::new();
        for factory in BUILTIN_READERS {
            registry.register(factory());
        }
        registry
    }

    /// Add a reader, replacing any reader already registered under the same name
    pub fn register(&mut self, reader: Box<dyn Reader>) {
        self.readers.retain(|r| r.name() != reader.name());
        self.readers.push(reader);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Reader, ReaderError> {
        self.readers
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ReaderError::UnknownReader(name.to_string()))
    }

    /// Find a reader and check it can fill the given application definition
    pub fn reader_for(&self, name: &str, nxdl: &str) -> Result<&dyn Reader, ReaderError> {
        let reader = self.get(name)?;
        if !reader.supports(nxdl) {
            return Err(ReaderError::UnsupportedDefinition {
                reader: name.to_string(),
                nxdl: nxdl.to_string(),
            });
        }
        Ok(reader)
    }

    /// Registered names with the definitions each supports
    pub fn names(&self) -> Vec<(String, Vec<String>)> {
        self.readers
            .iter()
            .map(|r| {
                (
                    r.name().to_string(),
                    r.supported_nxdls().iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }
}

/// Run a reader. A reader handing back a template without any path at all has
/// failed; one which merely left every value missing is left to the validator.
pub fn read_into(
    reader: &dyn Reader,
    template: Template,
    file_paths: &[PathBuf],
    objects: Option<&[Box<dyn Any>]>,
) -> Result<Template, ReaderError> {
    let populated = reader.read(template, file_paths, objects)?;
    if populated.is_empty() {
        return Err(ReaderError::Empty(reader.name().to_string()));
    }
    log::info!(
        "Reader {} populated {} path(s)",
        reader.name(),
        populated.populated().count()
    );
    Ok(populated)
}
