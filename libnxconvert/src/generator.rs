//! Flattening a schema tree into a template
use super::path::{ConceptPath, Segment, TemplatePath, WILDCARD};
use super::schema::{
    AttributeNode, Cardinality, FieldNode, GroupNode, Multiplicity, SchemaTree,
};
use super::template::{Partition, Template};
use super::units::UnitCategory;

/// Requiredness of the chain of ancestors above a node
#[derive(Debug, Clone, Copy)]
struct Lineage {
    all_required: bool,
    any_optional: bool,
}

impl Lineage {
    const ROOT: Lineage = Lineage {
        all_required: true,
        any_optional: false,
    };

    fn child(&self, cardinality: Cardinality) -> Self {
        Self {
            all_required: self.all_required && cardinality == Cardinality::Required,
            any_optional: self.any_optional || cardinality == Cardinality::Optional,
        }
    }

    fn partition(&self, cardinality: Cardinality) -> Partition {
        if self.all_required && cardinality == Cardinality::Required {
            Partition::Required
        } else if !self.any_optional && cardinality != Cardinality::Optional {
            Partition::Recommended
        } else {
            Partition::Optional
        }
    }
}

/// `NXuser` -> `user`, or `user*` for groups which may repeat
fn default_instance(group: &GroupNode) -> String {
    let suffix = group
        .class
        .strip_prefix("NX")
        .unwrap_or(&group.class)
        .to_lowercase();
    match group.multiplicity {
        Multiplicity::Single => suffix,
        Multiplicity::Many => format!("{suffix}{WILDCARD}"),
    }
}

fn group_segment(group: &GroupNode) -> Segment {
    match &group.name {
        Some(name) => Segment::Named(name.clone()),
        None => Segment::Class {
            concept: group.concept_name(),
            instance: default_instance(group),
        },
    }
}

pub(crate) fn field_segment(field: &FieldNode) -> Segment {
    if field.is_variadic() {
        Segment::Class {
            concept: field.name.clone(),
            instance: field.name.to_lowercase(),
        }
    } else {
        Segment::Named(field.name.clone())
    }
}

/// True when some leaf below the group would land in the required partition
fn has_required_leaf(group: &GroupNode) -> bool {
    let required = |c: Cardinality| c == Cardinality::Required;
    group.fields.iter().any(|f| required(f.cardinality))
        || group.attributes.iter().any(|a| required(a.cardinality))
        || group
            .groups
            .iter()
            .any(|g| required(g.cardinality) && has_required_leaf(g))
}

fn declare_attributes(
    attributes: &[AttributeNode],
    owner: &TemplatePath,
    lineage: Lineage,
    template: &mut Template,
) {
    for attribute in attributes {
        template.declare(
            owner.join(Segment::Attribute(attribute.name.clone())),
            lineage.partition(attribute.cardinality),
        );
    }
}

fn declare_field(field: &FieldNode, path: TemplatePath, lineage: Lineage, template: &mut Template) {
    let partition = lineage.partition(field.cardinality);
    if let Some(units) = field.units {
        if units != UnitCategory::Unitless {
            template.declare(path.units(), partition);
        }
    }
    declare_attributes(
        &field.attributes,
        &path,
        lineage.child(field.cardinality),
        template,
    );
    template.declare(path, partition);
}

fn walk(
    group: &GroupNode,
    path: &TemplatePath,
    concept: &ConceptPath,
    lineage: Lineage,
    template: &mut Template,
) {
    declare_attributes(&group.attributes, path, lineage, template);

    for field in group.fields.iter() {
        declare_field(field, path.join(field_segment(field)), lineage, template);
    }

    for child in group.groups.iter() {
        let child_path = path.join(group_segment(child));
        let child_concept = concept.join(&child.concept_name());
        let child_lineage = lineage.child(child.cardinality);
        template.declare_group_class(child_concept.clone(), &child.class);
        walk(child, &child_path, &child_concept, child_lineage, template);
        if child_lineage.all_required && !has_required_leaf(child) {
            template.declare(child_path, Partition::LoneGroup);
        }
    }
}

/// Build the template of an application definition
pub fn build_template(tree: &SchemaTree) -> Template {
    let mut template = Template::new(&tree.name, tree.version.as_deref());
    walk(
        &tree.root,
        &TemplatePath::root(),
        &ConceptPath::root(),
        Lineage::ROOT,
        &mut template,
    );
    log::debug!(
        "Built template for {} with {} required, {} recommended, {} optional path(s) and {} lone group(s)",
        tree.name,
        template.partition(Partition::Required).count(),
        template.partition(Partition::Recommended).count(),
        template.partition(Partition::Optional).count(),
        template.partition(Partition::LoneGroup).count(),
    );
    template
}
