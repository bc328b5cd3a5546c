//! Locating NXDL documents by name.
//!
//! The compiler asks a [`DefinitionSource`] for base classes while it expands
//! groups. On disk the NeXus definitions repository keeps one `<name>.nxdl.xml`
//! file per definition spread over a few sub directories; [`DefinitionStore`]
//! searches those. Tests use an in-memory map instead.
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;

use super::error::SchemaError;

/// Environment variable pointing at a checkout of the NeXus definitions
pub const DEFINITIONS_ENV: &str = "NEXUS_DEF_PATH";

const SEARCH_DIRS: [&str; 3] = ["applications", "contributed_definitions", "base_classes"];
const NXDL_SUFFIX: &str = ".nxdl.xml";

/// Anything which can hand out the NXDL source of a definition by name
pub trait DefinitionSource {
    /// Ok(None) when the source does not know the definition
    fn definition(&self, name: &str) -> Result<Option<String>, SchemaError>;

    /// Where the source looks, for error messages
    fn location(&self) -> PathBuf {
        PathBuf::new()
    }
}

impl DefinitionSource for FxHashMap<String, String> {
    fn definition(&self, name: &str) -> Result<Option<String>, SchemaError> {
        Ok(self.get(name).cloned())
    }
}

/// A source which knows no definitions, so every base class stays opaque
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBaseClasses;

impl DefinitionSource for NoBaseClasses {
    fn definition(&self, _name: &str) -> Result<Option<String>, SchemaError> {
        Ok(None)
    }
}

/// NXDL files beneath a NeXus definitions directory
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    root: PathBuf,
}

impl DefinitionStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Build the store from `NEXUS_DEF_PATH`
    pub fn from_env() -> Result<Self, SchemaError> {
        match std::env::var_os(DEFINITIONS_ENV) {
            Some(root) if !root.is_empty() => Ok(Self::new(Path::new(&root))),
            _ => Err(SchemaError::NoDefinitionsPath),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the file of a definition. Application definitions shadow contributed
    /// ones, which shadow base classes.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_name = format!("{name}{NXDL_SUFFIX}");
        SEARCH_DIRS
            .iter()
            .map(|dir| self.root.join(dir).join(&file_name))
            .chain(std::iter::once(self.root.join(&file_name)))
            .find(|candidate| candidate.is_file())
    }

    /// Read an application definition, which may be given either by name or as a
    /// path to an `.nxdl.xml` file.
    pub fn load(&self, name: &str) -> Result<String, SchemaError> {
        let direct = Path::new(name);
        if name.ends_with(NXDL_SUFFIX) && direct.is_file() {
            return Ok(std::fs::read_to_string(direct)?);
        }
        match self.locate(name) {
            Some(path) => {
                log::debug!("Loading NXDL {} from {}", name, path.display());
                Ok(std::fs::read_to_string(path)?)
            }
            None => Err(SchemaError::DefinitionNotFound(
                name.to_string(),
                self.root.clone(),
            )),
        }
    }
}

impl DefinitionSource for DefinitionStore {
    fn definition(&self, name: &str) -> Result<Option<String>, SchemaError> {
        match self.load(name) {
            Ok(source) => Ok(Some(source)),
            Err(SchemaError::DefinitionNotFound(..)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn location(&self) -> PathBuf {
        self.root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_search_order() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["applications", "base_classes"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        std::fs::write(
            dir.path().join("applications").join("NXtest.nxdl.xml"),
            "<definition name=\"NXtest\"/>",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("base_classes").join("NXuser.nxdl.xml"),
            "<definition name=\"NXuser\"/>",
        )
        .unwrap();

        let store = DefinitionStore::new(dir.path());
        assert!(store.locate("NXtest").is_some());
        assert!(store.load("NXtest").unwrap().contains("NXtest"));
        assert!(store.definition("NXuser").unwrap().is_some());
        assert!(store.definition("NXmissing").unwrap().is_none());
        assert!(matches!(
            store.load("NXmissing"),
            Err(SchemaError::DefinitionNotFound(..))
        ));
    }

    #[test]
    fn test_load_direct_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("NXlocal.nxdl.xml");
        std::fs::write(&file, "<definition name=\"NXlocal\"/>").unwrap();
        let store = DefinitionStore::new(Path::new("/nonexistent"));
        let source = store.load(&file.to_string_lossy()).unwrap();
        assert!(source.contains("NXlocal"));
    }

    #[test]
    fn test_map_source() {
        let mut map = FxHashMap::default();
        map.insert(String::from("NXuser"), String::from("<definition/>"));
        assert!(map.definition("NXuser").unwrap().is_some());
        assert!(NoBaseClasses.definition("NXuser").unwrap().is_none());
    }
}
