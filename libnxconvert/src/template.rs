//! The template: the contract between readers and the rest of the engine
use std::collections::BTreeMap;
use std::fmt;

use fxhash::FxHashMap;

use super::error::PathError;
use super::path::{ConceptPath, TemplatePath};
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    Required,
    Recommended,
    Optional,
    LoneGroup,
}

impl Partition {
    pub const ALL: [Partition; 4] = [
        Partition::Required,
        Partition::Recommended,
        Partition::Optional,
        Partition::LoneGroup,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Recommended => "recommended",
            Self::Optional => "optional",
            Self::LoneGroup => "lone_groups",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateEntry {
    /// None for paths a reader added which the generator did not declare
    pub partition: Option<Partition>,
    pub value: Value,
}

/// Partitioned map from template paths to values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    definition: String,
    version: Option<String>,
    entries: BTreeMap<TemplatePath, TemplateEntry>,
    group_classes: FxHashMap<ConceptPath, String>,
}

impl Template {
    pub fn new(definition: &str, version: Option<&str>) -> Self {
        Self {
            definition: definition.to_string(),
            version: version.map(str::to_string),
            ..Default::default()
        }
    }

    /// Name of the application definition the template was built from
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Record a schema path. A path keeps the first partition it is declared with.
    pub fn declare(&mut self, path: TemplatePath, partition: Partition) {
        self.entries.entry(path).or_insert(TemplateEntry {
            partition: Some(partition),
            value: Value::Missing,
        });
    }

    pub fn declare_group_class(&mut self, concept: ConceptPath, class: &str) {
        self.group_classes.insert(concept, class.to_string());
    }

    /// The NeXus class of the group at a concept path
    pub fn group_class(&self, concept: &ConceptPath) -> Option<&str> {
        self.group_classes.get(concept).map(String::as_str)
    }

    /// Assign a value at a path given as a string
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), PathError> {
        self.set_path(path.parse()?, value.into())
    }

    /// Assign a value. Wildcard paths must be substituted first.
    pub fn set_path(&mut self, path: TemplatePath, value: Value) -> Result<(), PathError> {
        if path.has_wildcard() && !value.is_missing() {
            return Err(PathError::Wildcard(path.to_string()));
        }
        self.entries.entry(path).or_default().value = value;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let path: TemplatePath = path.parse().ok()?;
        self.get_path(&path)
    }

    pub fn get_path(&self, path: &TemplatePath) -> Option<&Value> {
        self.entries.get(path).map(|e| &e.value)
    }

    pub fn entry(&self, path: &TemplatePath) -> Option<&TemplateEntry> {
        self.entries.get(path)
    }

    /// True when the path carries a value other than Missing
    pub fn is_set(&self, path: &TemplatePath) -> bool {
        self.get_path(path).is_some_and(|v| !v.is_missing())
    }

    /// All entries in path order, which places every parent before its descendants
    pub fn entries(&self) -> impl Iterator<Item = (&TemplatePath, &TemplateEntry)> {
        self.entries.iter()
    }

    /// The declared paths of one partition
    pub fn partition(&self, partition: Partition) -> impl Iterator<Item = &TemplatePath> {
        self.entries
            .iter()
            .filter(move |(_, e)| e.partition == Some(partition))
            .map(|(p, _)| p)
    }

    /// Entries holding a value
    pub fn populated(&self) -> impl Iterator<Item = (&TemplatePath, &Value)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.value.is_missing())
            .map(|(p, e)| (p, &e.value))
    }

    pub fn is_populated(&self) -> bool {
        self.populated().next().is_some()
    }

    /// Populated paths which realize the concept
    pub fn variations(&self, concept: &ConceptPath) -> Vec<TemplatePath> {
        super::path::variations(concept, self.populated().map(|(p, _)| p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// YAML document listing the declared paths by partition, each mapped to null,
    /// ready to be filled in as an ELN file.
    pub fn skeleton(&self) -> Result<String, serde_yaml::Error> {
        let mut document = serde_yaml::Mapping::new();
        for partition in Partition::ALL {
            let mut paths = serde_yaml::Mapping::new();
            for path in self.partition(partition) {
                paths.insert(
                    serde_yaml::Value::String(path.to_string()),
                    serde_yaml::Value::Null,
                );
            }
            document.insert(
                serde_yaml::Value::String(partition.key().to_string()),
                serde_yaml::Value::Mapping(paths),
            );
        }
        serde_yaml::to_string(&document)
    }
}
