//! The NXDL schema compiler.
//!
//! Compilation happens in two passes. The XML is first read with quick-xml into a
//! light [`Element`] tree. Groups are then expanded in place from their base class
//! definitions (explicit members inherit what they leave out, base class only
//! members are added as optional), and finally the element tree is converted into
//! the typed [`SchemaTree`].
use fxhash::{FxHashMap, FxHashSet};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::definitions::DefinitionSource;
use super::error::SchemaError;
use super::schema::{
    class_marker, AttributeNode, Cardinality, DefinitionCategory, DimSize, Dimension, FieldNode,
    GroupNode, Multiplicity, NxType, SchemaTree, Shape,
};
use super::units::UnitCategory;

const ROOT_CLASS: &str = "NXroot";
const INHERITED_ATTRIBUTES: [&str; 2] = ["type", "units"];
const INHERITED_CHILDREN: [&str; 3] = ["dimensions", "enumeration", "doc"];
const CARDINALITY_ATTRIBUTES: [&str; 4] = ["minOccurs", "required", "recommended", "optional"];

/// A parsed XML element. Namespace prefixes are dropped from element and attribute names.
#[derive(Debug, Clone, Default, PartialEq)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, SchemaError> {
        let mut element = Element {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in start.attributes() {
            let attr = attr.map_err(|e| SchemaError::Xml(e.to_string()))?;
            if attr.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| SchemaError::Xml(e.to_string()))?;
            element.attributes.push((key, value.trim().to_string()));
        }
        Ok(element)
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set_attr(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((key.to_string(), value.to_string())),
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Key under which a group, field or attribute is known inside its parent
    fn member_key(&self) -> Option<String> {
        match self.name.as_str() {
            "group" => Some(match self.attr("name") {
                Some(name) => name.to_string(),
                None => class_marker(self.attr("type").unwrap_or_default()),
            }),
            "field" => self.attr("name").map(str::to_string),
            "attribute" => self.attr("name").map(|n| format!("@{n}")),
            _ => None,
        }
    }

    fn member_keys(&self) -> FxHashSet<String> {
        self.children.iter().filter_map(Element::member_key).collect()
    }

    fn find_member(&self, key: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.member_key().as_deref() == Some(key))
    }

    /// Force this element and everything it declares to be optional
    fn mark_optional(&mut self) {
        if self.member_key().is_some() {
            self.attributes
                .retain(|(k, _)| !CARDINALITY_ATTRIBUTES.contains(&k.as_str()));
            self.set_attr("optional", "true");
        }
        for child in self.children.iter_mut() {
            child.mark_optional();
        }
    }
}

/// Read an XML document into an element tree
fn parse_xml(source: &str) -> Result<Element, SchemaError> {
    let mut reader = Reader::from_str(source);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(Element::from_start(&e)?),
            Ok(Event::Empty(e)) => {
                let element = Element::from_start(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SchemaError::Xml(String::from("unbalanced end tag")))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = stack.last_mut() {
                    let text = e.unescape().map_err(|e| SchemaError::Xml(e.to_string()))?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SchemaError::Xml(e.to_string())),
            _ => (),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(SchemaError::Xml(String::from("unexpected end of document")));
    }
    root.ok_or(SchemaError::MissingDefinition)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    /// Expansion of a group from its base class: shallow, new members are optional
    BaseClass,
    /// `extends` inheritance: deep, new members keep their cardinality
    Extends,
}

/// Fill `target` in from `source`
fn merge_members(target: &mut Element, source: &Element, mode: Merge) {
    for child in target.children.iter_mut() {
        let Some(key) = child.member_key() else {
            continue;
        };
        if let Some(inherited) = source.find_member(&key) {
            inherit(child, inherited);
            if mode == Merge::Extends {
                merge_members(child, inherited, mode);
            }
        }
    }

    let mut known = target.member_keys();
    for member in source.children.iter() {
        let Some(key) = member.member_key() else {
            continue;
        };
        if !known.insert(key) {
            continue;
        }
        let mut added = member.clone();
        if mode == Merge::BaseClass {
            added.mark_optional();
        }
        target.children.push(added);
    }
}

/// Copy the type information `target` leaves out from the same named `source` member
fn inherit(target: &mut Element, source: &Element) {
    for key in INHERITED_ATTRIBUTES {
        if target.attr(key).is_none() {
            if let Some(value) = source.attr(key) {
                target.set_attr(key, value);
            }
        }
    }
    for name in INHERITED_CHILDREN {
        if target.child(name).is_none() {
            if let Some(child) = source.child(name) {
                target.children.push(child.clone());
            }
        }
    }
    if target.name == "field" {
        let known = target.member_keys();
        for attribute in source.children_named("attribute") {
            if attribute
                .member_key()
                .is_some_and(|key| !known.contains(&key))
            {
                let mut added = attribute.clone();
                added.mark_optional();
                target.children.push(added);
            }
        }
    }
}

/// Compiles NXDL documents, caching the base classes it resolves
pub struct Compiler<'a> {
    classes: &'a dyn DefinitionSource,
    cache: FxHashMap<String, Option<Element>>,
}

impl<'a> Compiler<'a> {
    pub fn new(classes: &'a dyn DefinitionSource) -> Self {
        Self {
            classes,
            cache: FxHashMap::default(),
        }
    }

    pub fn compile(&mut self, source: &str) -> Result<SchemaTree, SchemaError> {
        let mut root = parse_xml(source)?;
        if root.name != "definition" {
            return Err(SchemaError::MissingDefinition);
        }
        let name = required_attr(&root, "name")?.to_string();
        let category = match root.attr("category") {
            Some("base") => DefinitionCategory::Base,
            None | Some("application") | Some("contributed") => DefinitionCategory::Application,
            Some(other) => {
                return Err(SchemaError::InvalidAttribute {
                    attribute: String::from("category"),
                    value: other.to_string(),
                })
            }
        };

        if let Some(parent) = root.attr("extends").map(str::to_string) {
            let mut chain = vec![name.clone()];
            match self.base_class(&parent, &mut chain)? {
                Some(parent_def) if parent_def.attr("category") != Some("base") => {
                    log::debug!("{name} extends the application definition {parent}");
                    merge_members(&mut root, &parent_def, Merge::Extends);
                }
                _ => (),
            }
        }

        for child in root.children.iter_mut().filter(|c| c.name == "group") {
            self.expand_group(child)?;
        }

        let mut tree_root = GroupNode {
            class: match category {
                DefinitionCategory::Application => String::from(ROOT_CLASS),
                DefinitionCategory::Base => name.clone(),
            },
            doc: doc_text(&root),
            ..Default::default()
        };
        convert_members(&root, category, &mut tree_root, "/")?;

        log::info!(
            "Compiled {} ({} top level group(s))",
            name,
            tree_root.groups.len()
        );
        Ok(SchemaTree {
            name,
            version: root.attr("version").map(str::to_string),
            category,
            root: tree_root,
        })
    }

    /// Resolve a definition by name, with its `extends` chain merged in. `chain`
    /// holds the definitions currently being resolved.
    fn base_class(
        &mut self,
        name: &str,
        chain: &mut Vec<String>,
    ) -> Result<Option<Element>, SchemaError> {
        if chain.iter().any(|c| c == name) {
            return Err(SchemaError::Cycle(format!("{} -> {}", chain.join(" -> "), name)));
        }
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.clone());
        }
        let Some(source) = self.classes.definition(name)? else {
            log::debug!("No definition found for {name}; keeping it opaque");
            self.cache.insert(name.to_string(), None);
            return Ok(None);
        };
        let mut definition = parse_xml(&source)?;
        if definition.name != "definition" {
            return Err(SchemaError::MissingDefinition);
        }
        if let Some(parent) = definition.attr("extends").map(str::to_string) {
            chain.push(name.to_string());
            let resolved = self.base_class(&parent, chain);
            chain.pop();
            if let Some(parent_def) = resolved? {
                merge_members(&mut definition, &parent_def, Merge::Extends);
            }
        }
        self.cache.insert(name.to_string(), Some(definition.clone()));
        Ok(Some(definition))
    }

    /// Expand an explicitly declared group from its base class, then its explicit subgroups
    fn expand_group(&mut self, group: &mut Element) -> Result<(), SchemaError> {
        let base = match group.attr("type").map(str::to_string) {
            Some(class) => self.base_class(&class, &mut Vec::new())?,
            None => None,
        };
        for child in group.children.iter_mut().filter(|c| c.name == "group") {
            self.expand_group(child)?;
        }
        if let Some(base) = base {
            merge_members(group, &base, Merge::BaseClass);
        }
        Ok(())
    }
}

/// Compile an NXDL document. `classes` supplies base classes for group expansion.
pub fn compile(source: &str, classes: &dyn DefinitionSource) -> Result<SchemaTree, SchemaError> {
    Compiler::new(classes).compile(source)
}

fn required_attr<'e>(element: &'e Element, key: &str) -> Result<&'e str, SchemaError> {
    element
        .attr(key)
        .ok_or_else(|| SchemaError::MissingAttribute {
            element: element.name.clone(),
            attribute: key.to_string(),
        })
}

fn bool_attr(element: &Element, key: &str) -> Result<Option<bool>, SchemaError> {
    match element.attr(key) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(invalid(key, other)),
    }
}

fn invalid(attribute: &str, value: &str) -> SchemaError {
    SchemaError::InvalidAttribute {
        attribute: attribute.to_string(),
        value: value.to_string(),
    }
}

fn cardinality(
    element: &Element,
    category: DefinitionCategory,
) -> Result<Cardinality, SchemaError> {
    let optional = bool_attr(element, "optional")?;
    let required = bool_attr(element, "required")?;
    let recommended = bool_attr(element, "recommended")?;
    let min_occurs = match element.attr("minOccurs") {
        Some(value) => Some(
            value
                .parse::<usize>()
                .map_err(|_| invalid("minOccurs", value))?,
        ),
        None => None,
    };

    if recommended == Some(true) {
        return Ok(Cardinality::Recommended);
    }
    let cardinality = match category {
        DefinitionCategory::Application => {
            if optional == Some(true) || required == Some(false) || min_occurs == Some(0) {
                Cardinality::Optional
            } else {
                Cardinality::Required
            }
        }
        DefinitionCategory::Base => {
            if min_occurs.is_some_and(|n| n >= 1)
                || required == Some(true)
                || optional == Some(false)
            {
                Cardinality::Required
            } else {
                Cardinality::Optional
            }
        }
    };
    Ok(cardinality)
}

fn multiplicity(element: &Element) -> Result<Multiplicity, SchemaError> {
    match element.attr("maxOccurs") {
        None => Ok(Multiplicity::Single),
        Some("unbounded") => Ok(Multiplicity::Many),
        Some(value) => match value.parse::<usize>() {
            Ok(n) if n > 1 => Ok(Multiplicity::Many),
            Ok(_) => Ok(Multiplicity::Single),
            Err(_) => Err(invalid("maxOccurs", value)),
        },
    }
}

fn nx_type(element: &Element) -> Result<NxType, SchemaError> {
    match element.attr("type") {
        None => Ok(NxType::Char),
        Some(token) => token
            .parse::<NxType>()
            .map_err(SchemaError::UnknownType),
    }
}

fn doc_text(element: &Element) -> Option<String> {
    element
        .child("doc")
        .map(|doc| doc.text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn enumeration(
    element: &Element,
    name: &str,
    nx_type: NxType,
) -> Result<Option<Vec<String>>, SchemaError> {
    let Some(enumeration) = element.child("enumeration") else {
        return Ok(None);
    };
    if nx_type != NxType::Char {
        return Err(SchemaError::EnumerationOnNonChar {
            name: name.to_string(),
            nx_type: nx_type.to_string(),
        });
    }
    let items = enumeration
        .children_named("item")
        .map(|item| required_attr(item, "value").map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(items))
}

fn shape(element: &Element) -> Result<Option<Shape>, SchemaError> {
    let Some(dimensions) = element.child("dimensions") else {
        return Ok(None);
    };
    let rank = dimensions.attr("rank").and_then(|r| r.parse::<usize>().ok());
    let mut dims = Vec::new();
    for dim in dimensions.children_named("dim") {
        let index_text = required_attr(dim, "index")?;
        let index = index_text
            .parse::<usize>()
            .map_err(|_| invalid("index", index_text))?;
        let size = match dim.attr("value") {
            Some(value) => match value.parse::<usize>() {
                Ok(n) => DimSize::Fixed(n),
                Err(_) if !value.is_empty() => DimSize::Symbol(value.to_string()),
                Err(_) => DimSize::Any,
            },
            None => DimSize::Any,
        };
        dims.push(Dimension { index, size });
    }
    dims.sort_by_key(|d| d.index);
    Ok(Some(Shape { rank, dims }))
}

fn convert_attribute(
    element: &Element,
    category: DefinitionCategory,
) -> Result<AttributeNode, SchemaError> {
    let name = required_attr(element, "name")?.to_string();
    let nx_type = nx_type(element)?;
    Ok(AttributeNode {
        enumeration: enumeration(element, &name, nx_type)?,
        cardinality: cardinality(element, category)?,
        doc: doc_text(element),
        name,
        nx_type,
    })
}

fn convert_field(element: &Element, category: DefinitionCategory) -> Result<FieldNode, SchemaError> {
    let name = required_attr(element, "name")?.to_string();
    let nx_type = nx_type(element)?;
    let units = match element.attr("units") {
        Some(token) => Some(
            token
                .parse::<UnitCategory>()
                .map_err(SchemaError::UnknownUnitCategory)?,
        ),
        None => None,
    };
    let mut attributes = Vec::new();
    let mut seen = FxHashSet::default();
    for attribute in element.children_named("attribute") {
        let node = convert_attribute(attribute, category)?;
        if !seen.insert(node.name.clone()) {
            return Err(SchemaError::NameCollision {
                parent: name.clone(),
                name: node.concept_name(),
            });
        }
        attributes.push(node);
    }
    Ok(FieldNode {
        enumeration: enumeration(element, &name, nx_type)?,
        shape: shape(element)?,
        cardinality: cardinality(element, category)?,
        doc: doc_text(element),
        units,
        attributes,
        name,
        nx_type,
    })
}

fn convert_group(
    element: &Element,
    category: DefinitionCategory,
    parent_path: &str,
) -> Result<GroupNode, SchemaError> {
    let mut group = GroupNode {
        class: required_attr(element, "type")?.to_string(),
        name: element.attr("name").map(str::to_string),
        cardinality: cardinality(element, category)?,
        multiplicity: multiplicity(element)?,
        doc: doc_text(element),
        ..Default::default()
    };
    let path = format!("{}{}/", parent_path, group.concept_name());
    convert_members(element, category, &mut group, &path)?;
    Ok(group)
}

/// Convert the groups, fields and attributes declared by `element` into `group`
fn convert_members(
    element: &Element,
    category: DefinitionCategory,
    group: &mut GroupNode,
    path: &str,
) -> Result<(), SchemaError> {
    let mut names = FxHashSet::default();
    let mut attribute_names = FxHashSet::default();
    let collision = |name: String| SchemaError::NameCollision {
        parent: path.to_string(),
        name,
    };
    for child in element.children.iter() {
        match child.name.as_str() {
            "group" => {
                let node = convert_group(child, category, path)?;
                if !names.insert(node.concept_name()) {
                    return Err(collision(node.concept_name()));
                }
                group.groups.push(node);
            }
            "field" => {
                let node = convert_field(child, category)?;
                if !names.insert(node.name.clone()) {
                    return Err(collision(node.name));
                }
                group.fields.push(node);
            }
            "attribute" => {
                let node = convert_attribute(child, category)?;
                if !attribute_names.insert(node.name.clone()) {
                    return Err(collision(node.concept_name()));
                }
                group.attributes.push(node);
            }
            _ => (),
        }
    }
    Ok(())
}
