//! The compiled, immutable form of an NXDL application definition
use std::fmt;
use std::str::FromStr;

use super::path::ConceptPath;
use super::units::UnitCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Cardinality {
    #[default]
    Required,
    Recommended,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Multiplicity {
    #[default]
    Single,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DefinitionCategory {
    #[default]
    Application,
    Base,
}

/// NeXus primitive type tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NxType {
    #[default]
    Char,
    Int,
    UInt,
    PosInt,
    Float,
    Number,
    Complex,
    Boolean,
    Binary,
    DateTime,
    CharOrNumber,
}

impl NxType {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Char => "NX_CHAR",
            Self::Int => "NX_INT",
            Self::UInt => "NX_UINT",
            Self::PosInt => "NX_POSINT",
            Self::Float => "NX_FLOAT",
            Self::Number => "NX_NUMBER",
            Self::Complex => "NX_COMPLEX",
            Self::Boolean => "NX_BOOLEAN",
            Self::Binary => "NX_BINARY",
            Self::DateTime => "NX_DATE_TIME",
            Self::CharOrNumber => "NX_CHAR_OR_NUMBER",
        }
    }
}

impl FromStr for NxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NX_CHAR" => Ok(Self::Char),
            "NX_INT" => Ok(Self::Int),
            "NX_UINT" => Ok(Self::UInt),
            "NX_POSINT" => Ok(Self::PosInt),
            "NX_FLOAT" => Ok(Self::Float),
            "NX_NUMBER" => Ok(Self::Number),
            "NX_COMPLEX" => Ok(Self::Complex),
            "NX_BOOLEAN" => Ok(Self::Boolean),
            "NX_BINARY" => Ok(Self::Binary),
            "NX_DATE_TIME" | "ISO8601" => Ok(Self::DateTime),
            "NX_CHAR_OR_NUMBER" => Ok(Self::CharOrNumber),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for NxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimSize {
    Fixed(usize),
    Symbol(String),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dimension {
    /// 1-based axis index as written in the NXDL
    pub index: usize,
    pub size: DimSize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    pub rank: Option<usize>,
    pub dims: Vec<Dimension>,
}

impl Shape {
    /// The declared rank, or the highest dimension index when no rank is given
    pub fn effective_rank(&self) -> Option<usize> {
        self.rank
            .or_else(|| self.dims.iter().map(|d| d.index).max())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeNode {
    pub name: String,
    pub nx_type: NxType,
    pub cardinality: Cardinality,
    pub enumeration: Option<Vec<String>>,
    pub doc: Option<String>,
}

impl AttributeNode {
    pub fn concept_name(&self) -> String {
        format!("@{}", self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldNode {
    pub name: String,
    pub nx_type: NxType,
    pub units: Option<UnitCategory>,
    pub shape: Option<Shape>,
    pub cardinality: Cardinality,
    pub enumeration: Option<Vec<String>>,
    pub attributes: Vec<AttributeNode>,
    pub doc: Option<String>,
}

impl FieldNode {
    /// Uppercase field names stand for a user chosen name
    pub fn is_variadic(&self) -> bool {
        is_variadic_name(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeNode> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupNode {
    /// NeXus class, e.g. `NXentry`
    pub class: String,
    pub name: Option<String>,
    pub cardinality: Cardinality,
    pub multiplicity: Multiplicity,
    pub groups: Vec<GroupNode>,
    pub fields: Vec<FieldNode>,
    pub attributes: Vec<AttributeNode>,
    pub doc: Option<String>,
}

impl GroupNode {
    /// The name this group contributes to a concept path: its fixed name, or the
    /// class marker (`NXuser` gives `USER`) for unnamed groups.
    pub fn concept_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => class_marker(&self.class),
        }
    }

    pub fn group(&self, concept: &str) -> Option<&GroupNode> {
        self.groups.iter().find(|g| g.concept_name() == concept)
    }

    pub fn field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeNode> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Borrowed view of any node of the tree
#[derive(Debug, Clone, Copy)]
pub enum SchemaNode<'a> {
    Group(&'a GroupNode),
    Field(&'a FieldNode),
    Attribute(&'a AttributeNode),
}

impl SchemaNode<'_> {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::Group(g) => g.cardinality,
            Self::Field(f) => f.cardinality,
            Self::Attribute(a) => a.cardinality,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaTree {
    pub name: String,
    pub version: Option<String>,
    pub category: DefinitionCategory,
    /// The file level group; its children are the top level groups (usually `NXentry`)
    pub root: GroupNode,
}

impl SchemaTree {
    /// Find the node a concept path such as `/ENTRY/USER/name/@units` refers to
    pub fn lookup(&self, concept: &ConceptPath) -> Option<SchemaNode<'_>> {
        let mut current = SchemaNode::Group(&self.root);
        for name in concept.names() {
            current = match (current, name.strip_prefix('@')) {
                (SchemaNode::Group(group), Some(attr)) => {
                    SchemaNode::Attribute(group.attribute(attr)?)
                }
                (SchemaNode::Field(field), Some(attr)) => {
                    SchemaNode::Attribute(field.attribute(attr)?)
                }
                (SchemaNode::Group(group), None) => match group.group(name) {
                    Some(child) => SchemaNode::Group(child),
                    None => SchemaNode::Field(group.field(name)?),
                },
                _ => return None,
            };
        }
        Some(current)
    }

    /// Every group concept path of the tree paired with its NeXus class
    pub fn group_classes(&self) -> Vec<(ConceptPath, String)> {
        fn walk(group: &GroupNode, path: &ConceptPath, out: &mut Vec<(ConceptPath, String)>) {
            for child in group.groups.iter() {
                let child_path = path.join(&child.concept_name());
                out.push((child_path.clone(), child.class.clone()));
                walk(child, &child_path, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &ConceptPath::root(), &mut out);
        out
    }
}

/// `NXuser` -> `USER`
pub fn class_marker(class: &str) -> String {
    class.strip_prefix("NX").unwrap_or(class).to_uppercase()
}

/// A name with uppercase letters and no lowercase letters, e.g. `DATA` or `AXISNAME`
pub fn is_variadic_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase()) && !name.chars().any(|c| c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchemaTree {
        let name = FieldNode {
            name: String::from("name"),
            attributes: vec![AttributeNode {
                name: String::from("role"),
                cardinality: Cardinality::Optional,
                ..Default::default()
            }],
            ..Default::default()
        };
        let user = GroupNode {
            class: String::from("NXuser"),
            multiplicity: Multiplicity::Many,
            fields: vec![name],
            ..Default::default()
        };
        let entry = GroupNode {
            class: String::from("NXentry"),
            groups: vec![user],
            attributes: vec![AttributeNode {
                name: String::from("default"),
                cardinality: Cardinality::Optional,
                ..Default::default()
            }],
            ..Default::default()
        };
        SchemaTree {
            name: String::from("NXtest"),
            root: GroupNode {
                class: String::from("NXroot"),
                groups: vec![entry],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_type_tokens() {
        assert_eq!("NX_FLOAT".parse::<NxType>(), Ok(NxType::Float));
        assert_eq!("ISO8601".parse::<NxType>(), Ok(NxType::DateTime));
        assert_eq!(NxType::PosInt.to_string(), "NX_POSINT");
        assert!("NX_QUATERNION".parse::<NxType>().is_err());
    }

    #[test]
    fn test_class_marker() {
        assert_eq!(class_marker("NXuser"), "USER");
        assert_eq!(class_marker("NXsample_component"), "SAMPLE_COMPONENT");
        assert!(is_variadic_name("DATA"));
        assert!(!is_variadic_name("AXISNAME_indices"));
        assert!(!is_variadic_name("data"));
    }

    #[test]
    fn test_lookup() {
        let tree = sample();
        let concept = |s: &str| s.parse::<ConceptPath>().unwrap();
        assert!(matches!(
            tree.lookup(&concept("/ENTRY/USER")),
            Some(SchemaNode::Group(g)) if g.class == "NXuser"
        ));
        assert!(matches!(
            tree.lookup(&concept("/ENTRY/USER/name")),
            Some(SchemaNode::Field(f)) if f.name == "name"
        ));
        assert!(matches!(
            tree.lookup(&concept("/ENTRY/USER/name/@role")),
            Some(SchemaNode::Attribute(a)) if a.name == "role"
        ));
        assert!(matches!(
            tree.lookup(&concept("/ENTRY/@default")),
            Some(SchemaNode::Attribute(_))
        ));
        assert!(tree.lookup(&concept("/ENTRY/SAMPLE")).is_none());
        assert!(tree.lookup(&concept("/ENTRY/USER/name/@role/x")).is_none());
    }

    #[test]
    fn test_group_classes() {
        let classes = sample().group_classes();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[1].0.to_string(), "/ENTRY/USER");
        assert_eq!(classes[1].1, "NXuser");
    }
}
