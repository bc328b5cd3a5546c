//! Checking a populated template against the schema it was built from.
//!
//! The validator never touches the template. Findings are collected into a
//! [`ValidationReport`]; whether errors stop the conversion is up to the caller.
use std::fmt;

use fxhash::{FxHashMap, FxHashSet};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::OffsetDateTime;

use super::generator::field_segment;
use super::path::{ConceptPath, Segment, TemplatePath};
use super::schema::{
    Cardinality, DimSize, FieldNode, GroupNode, NxType, SchemaNode, SchemaTree, Shape,
};
use super::template::{Partition, Template};
use super::units::{self, UnitCategory};
use super::value::{ElementKind, NdValue, Scalar, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    /// Treat missing recommended paths as errors
    pub fair: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    MissingRequired,
    IncompleteGroup,
    EmptyLoneGroup,
    LoneGroupWaived,
    MissingRecommended,
    TypeMismatch,
    NotInEnumeration,
    UnitMismatch,
    MissingUnits,
    EmptyUnits,
    UnitsWithoutField,
    ShapeMismatch,
    UnknownPath,
    UnsubstitutedWildcard,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingRequired => "missing_required",
            Self::IncompleteGroup => "incomplete_group",
            Self::EmptyLoneGroup => "empty_lone_group",
            Self::LoneGroupWaived => "lone_group_waived",
            Self::MissingRecommended => "missing_recommended",
            Self::TypeMismatch => "type_mismatch",
            Self::NotInEnumeration => "not_in_enumeration",
            Self::UnitMismatch => "unit_mismatch",
            Self::MissingUnits => "missing_units",
            Self::EmptyUnits => "empty_units",
            Self::UnitsWithoutField => "units_without_field",
            Self::ShapeMismatch => "shape_mismatch",
            Self::UnknownPath => "unknown_path",
            Self::UnsubstitutedWildcard => "unsubstituted_wildcard",
        };
        write!(f, "{name}")
    }
}

/// One validation finding
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub path: String,
    pub reason: String,
    /// Summary of the offending value, if there is one
    pub value: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.path, self.reason)?;
        if let Some(value) = &self.value {
            write!(f, " (value: {value})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Emit one log record per finding
    pub fn log(&self) {
        for warning in self.warnings.iter() {
            log::warn!(
                "kind={} path={} reason={}",
                warning.kind,
                warning.path,
                warning.reason
            );
        }
        for error in self.errors.iter() {
            log::error!(
                "kind={} path={} reason={}{}",
                error.kind,
                error.path,
                error.reason,
                error
                    .value
                    .as_ref()
                    .map(|v| format!(" value={v}"))
                    .unwrap_or_default()
            );
        }
    }

    /// Downgrade every error to a warning, used when writing despite errors
    pub fn into_warnings(self) -> Vec<Diagnostic> {
        let mut all = self.warnings;
        all.extend(self.errors.into_iter().map(|mut e| {
            e.severity = Severity::Warning;
            e
        }));
        all
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s), {} warning(s)", self.errors.len(), self.warnings.len())?;
        for error in self.errors.iter() {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

struct Validator<'a> {
    template: &'a Template,
    tree: &'a SchemaTree,
    options: &'a ValidationOptions,
    populated: Vec<(&'a TemplatePath, &'a Value, ConceptPath)>,
    report: ValidationReport,
    /// Paths already reported as missing
    missing: FxHashSet<String>,
    /// Sizes bound to symbolic dimensions, per entry
    bindings: FxHashMap<(String, String), usize>,
}

impl<'a> Validator<'a> {
    fn new(template: &'a Template, tree: &'a SchemaTree, options: &'a ValidationOptions) -> Self {
        let populated = template
            .populated()
            .map(|(path, value)| (path, value, path.concept()))
            .collect();
        Self {
            template,
            tree,
            options,
            populated,
            report: ValidationReport::default(),
            missing: FxHashSet::default(),
            bindings: FxHashMap::default(),
        }
    }

    fn error(&mut self, kind: DiagnosticKind, path: &TemplatePath, reason: String, value: Option<&Value>) {
        self.report.errors.push(Diagnostic {
            kind,
            severity: Severity::Error,
            path: path.to_string(),
            reason,
            value: value.map(Value::summary),
        });
    }

    fn warning(&mut self, kind: DiagnosticKind, path: &TemplatePath, reason: String) {
        self.report.warnings.push(Diagnostic {
            kind,
            severity: Severity::Warning,
            path: path.to_string(),
            reason,
            value: None,
        });
    }

    fn missing_error(&mut self, kind: DiagnosticKind, path: &TemplatePath, reason: String) {
        if self.missing.insert(path.to_string()) {
            self.error(kind, path, reason, None);
        }
    }

    fn has_variation(&self, concept: &ConceptPath) -> bool {
        self.populated.iter().any(|(_, _, c)| c == concept)
    }

    /// True when something below the concept carries a value
    fn has_descendant(&self, concept: &ConceptPath) -> bool {
        self.populated
            .iter()
            .any(|(_, _, c)| c.starts_with(concept) && c != concept)
    }

    fn check_required(&mut self) {
        let required: Vec<TemplatePath> = self
            .template
            .partition(Partition::Required)
            .filter(|p| !p.is_units())
            .cloned()
            .collect();
        for path in required {
            if !self.has_variation(&path.concept()) {
                self.missing_error(
                    DiagnosticKind::MissingRequired,
                    &path,
                    String::from("required path has no value"),
                );
            }
        }
    }

    /// Every populated group instance needs all of its own required children
    fn check_group_completeness(&mut self) {
        let tree = self.tree;
        let mut instances = Vec::new();
        let mut seen = FxHashSet::default();
        let mut children = FxHashSet::default();
        for (path, _, _) in self.populated.iter() {
            if path.has_wildcard() {
                continue;
            }
            if let (Some(parent), Some(last)) = (path.parent(), path.last()) {
                children.insert((parent, last.concept_name()));
            }
            for len in 1..path.len() {
                let prefix = path.prefix(len);
                if !seen.insert(prefix.clone()) {
                    continue;
                }
                if let Some(SchemaNode::Group(group)) = tree.lookup(&prefix.concept()) {
                    instances.push((prefix, group));
                }
            }
        }

        for (instance, group) in instances {
            let has = |name: String| children.contains(&(instance.clone(), name));
            let mut absent: Vec<TemplatePath> = group
                .fields
                .iter()
                .filter(|f| f.cardinality == Cardinality::Required && !has(f.name.clone()))
                .map(|f| instance.join(field_segment(f)))
                .collect();
            absent.extend(
                group
                    .attributes
                    .iter()
                    .filter(|a| a.cardinality == Cardinality::Required && !has(a.concept_name()))
                    .map(|a| instance.join(Segment::Attribute(a.name.clone()))),
            );
            for path in absent {
                self.missing_error(
                    DiagnosticKind::IncompleteGroup,
                    &path,
                    format!("required by the populated group {instance}"),
                );
            }
        }
    }

    fn check_lone_groups(&mut self) {
        let lone: Vec<TemplatePath> = self
            .template
            .partition(Partition::LoneGroup)
            .cloned()
            .collect();
        for path in lone {
            let concept = path.concept();
            if self.has_variation(&concept) || self.has_descendant(&concept) {
                continue;
            }
            let waived = concept
                .parent()
                .and_then(|parent| match self.tree.lookup(&parent) {
                    Some(SchemaNode::Group(group)) => Some((parent, group)),
                    _ => None,
                })
                .is_some_and(|(parent, group)| self.optional_sibling_populated(&parent, group, &concept));
            if waived {
                self.warning(
                    DiagnosticKind::LoneGroupWaived,
                    &path,
                    String::from("required group is empty but an optional sibling is populated"),
                );
            } else {
                self.missing_error(
                    DiagnosticKind::EmptyLoneGroup,
                    &path,
                    String::from("required group has no populated descendant"),
                );
            }
        }
    }

    fn optional_sibling_populated(
        &self,
        parent: &ConceptPath,
        group: &GroupNode,
        concept: &ConceptPath,
    ) -> bool {
        let optional_groups = group
            .groups
            .iter()
            .filter(|g| g.cardinality == Cardinality::Optional)
            .map(|g| parent.join(&g.concept_name()));
        let optional_fields = group
            .fields
            .iter()
            .filter(|f| f.cardinality == Cardinality::Optional)
            .map(|f| parent.join(&f.name));
        optional_groups
            .chain(optional_fields)
            .filter(|sibling| sibling != concept)
            .any(|sibling| self.has_variation(&sibling) || self.has_descendant(&sibling))
    }

    fn check_recommended(&mut self) {
        let recommended: Vec<TemplatePath> = self
            .template
            .partition(Partition::Recommended)
            .filter(|p| !p.is_units())
            .cloned()
            .collect();
        for path in recommended {
            if self.has_variation(&path.concept()) {
                continue;
            }
            let reason = String::from("recommended path has no value");
            if self.options.fair {
                self.missing_error(DiagnosticKind::MissingRecommended, &path, reason);
            } else {
                self.warning(DiagnosticKind::MissingRecommended, &path, reason);
            }
        }
    }

    fn check_values(&mut self) {
        let tree = self.tree;
        let populated = std::mem::take(&mut self.populated);
        for &(path, value, ref concept) in populated.iter() {
            if path.has_wildcard() {
                self.error(
                    DiagnosticKind::UnsubstitutedWildcard,
                    path,
                    String::from("path still contains a wildcard"),
                    Some(value),
                );
                continue;
            }
            if path.is_units() {
                let field_set = path.parent().is_some_and(|p| self.template.is_set(&p));
                if !field_set {
                    self.error(
                        DiagnosticKind::UnitsWithoutField,
                        path,
                        String::from("units are given for a field without a value"),
                        Some(value),
                    );
                }
                continue;
            }
            match tree.lookup(concept) {
                None => self.warning(
                    DiagnosticKind::UnknownPath,
                    path,
                    format!("not part of {}", tree.name),
                ),
                Some(_) if value.is_link() => (),
                Some(SchemaNode::Group(_)) => self.error(
                    DiagnosticKind::TypeMismatch,
                    path,
                    String::from("a group can only hold a link"),
                    Some(value),
                ),
                Some(SchemaNode::Field(field)) => {
                    self.check_type(path, value, field.nx_type);
                    self.check_enumeration(path, value, field.enumeration.as_deref());
                    if let Some(category) = field.units {
                        self.check_units(path, category);
                    }
                    if let Some(shape) = &field.shape {
                        self.check_shape(path, value, field, shape);
                    }
                }
                Some(SchemaNode::Attribute(attribute)) => {
                    self.check_type(path, value, attribute.nx_type);
                    self.check_enumeration(path, value, attribute.enumeration.as_deref());
                }
            }
        }
        self.populated = populated;
    }

    fn check_type(&mut self, path: &TemplatePath, value: &Value, expected: NxType) {
        if let Err(reason) = type_compatible(expected, value) {
            self.error(DiagnosticKind::TypeMismatch, path, reason, Some(value));
        }
    }

    fn check_enumeration(&mut self, path: &TemplatePath, value: &Value, items: Option<&[String]>) {
        let (Some(items), Some(strings)) = (items, value.strings()) else {
            return;
        };
        for s in strings {
            if !items.iter().any(|item| item == s) {
                self.error(
                    DiagnosticKind::NotInEnumeration,
                    path,
                    format!("'{}' is not one of [{}]", s, items.join(", ")),
                    Some(value),
                );
                return;
            }
        }
    }

    fn check_units(&mut self, path: &TemplatePath, category: UnitCategory) {
        let template = self.template;
        let units_path = path.units();
        let units = template
            .get_path(&units_path)
            .filter(|v| !v.is_missing());
        let text = units.and_then(Value::as_str);
        match (category, units, text) {
            (UnitCategory::Any, _, Some(t)) if t.trim().is_empty() => self.warning(
                DiagnosticKind::EmptyUnits,
                &units_path,
                String::from("NX_ANY field has empty units"),
            ),
            (UnitCategory::Any, _, _) => (),
            (UnitCategory::Unitless, None, _) => (),
            (UnitCategory::Unitless, Some(_), Some(t)) if t.trim().is_empty() => (),
            (UnitCategory::Unitless, Some(v), _) => self.error(
                DiagnosticKind::UnitMismatch,
                &units_path,
                String::from("NX_UNITLESS fields must not carry units"),
                Some(v),
            ),
            (UnitCategory::Dimensionless, None, _) => (),
            (_, None, _) => self.error(
                DiagnosticKind::MissingUnits,
                &units_path,
                format!("units are required for a field of category {category}"),
                None,
            ),
            (_, Some(v), None) => self.error(
                DiagnosticKind::UnitMismatch,
                &units_path,
                String::from("units must be a string"),
                Some(v),
            ),
            (_, Some(v), Some(t)) => {
                if !units::matches(category, t) {
                    let actual = match units::parse_unit(t) {
                        Ok(dims) => format!("has dimensionality {dims}"),
                        Err(e) => e.to_string(),
                    };
                    let expected = category
                        .dimensionality()
                        .map(|d| d.to_string())
                        .unwrap_or_default();
                    self.error(
                        DiagnosticKind::UnitMismatch,
                        &units_path,
                        format!("unit '{t}' {actual} but {category} requires {expected}"),
                        Some(v),
                    );
                }
            }
        }
    }

    fn check_shape(&mut self, path: &TemplatePath, value: &Value, field: &FieldNode, shape: &Shape) {
        let Some(mut actual) = value.shape() else {
            return;
        };
        if let Some(rank) = shape.effective_rank() {
            if actual.is_empty() && rank == 1 {
                actual = vec![1];
            }
            if actual.len() != rank {
                self.error(
                    DiagnosticKind::ShapeMismatch,
                    path,
                    format!("{} expects rank {} but the value has rank {}", field.name, rank, actual.len()),
                    Some(value),
                );
                return;
            }
        }
        let entry = path.prefix(1).to_string();
        for dim in shape.dims.iter() {
            let Some(size) = dim.index.checked_sub(1).and_then(|i| actual.get(i)).copied() else {
                continue;
            };
            match &dim.size {
                DimSize::Fixed(n) if *n != size => {
                    self.error(
                        DiagnosticKind::ShapeMismatch,
                        path,
                        format!("dimension {} must have size {} but has {}", dim.index, n, size),
                        Some(value),
                    );
                }
                DimSize::Symbol(symbol) => {
                    let bound = *self
                        .bindings
                        .entry((entry.clone(), symbol.clone()))
                        .or_insert(size);
                    if bound != size {
                        self.error(
                            DiagnosticKind::ShapeMismatch,
                            path,
                            format!(
                                "dimension {} ({}) has size {} but {} is {} elsewhere in {}",
                                dim.index, symbol, size, symbol, bound, entry
                            ),
                            Some(value),
                        );
                    }
                }
                _ => (),
            }
        }
    }
}

fn is_datetime(text: &str) -> bool {
    OffsetDateTime::parse(text, &Rfc3339).is_ok()
        || OffsetDateTime::parse(text, &Iso8601::DEFAULT).is_ok()
}

fn is_binary(value: &Value) -> bool {
    matches!(
        value,
        Value::Scalar(Scalar::Bytes(_)) | Value::Array(NdValue::U8(_)) | Value::Array(NdValue::I8(_))
    )
}

/// Whether a value can be stored as the given NeXus type
fn type_compatible(expected: NxType, value: &Value) -> Result<(), String> {
    let Some(kind) = value.kind() else {
        return Ok(());
    };
    let mismatch = || Err(format!("expected {expected} but got {kind}"));
    match expected {
        NxType::Char if kind == ElementKind::Str => Ok(()),
        NxType::Int if kind.is_integer() => Ok(()),
        NxType::UInt | NxType::PosInt if kind.is_integer() => {
            let minimum = if expected == NxType::UInt { 0 } else { 1 };
            match value.min_integer() {
                Some(min) if min < minimum => Err(format!(
                    "expected {expected} but the value contains {min}"
                )),
                _ => Ok(()),
            }
        }
        NxType::Float | NxType::Number | NxType::Complex if kind.is_numeric() => Ok(()),
        NxType::Boolean if kind == ElementKind::Bool => Ok(()),
        NxType::Binary if is_binary(value) => Ok(()),
        NxType::DateTime => match value.strings() {
            Some(strings) => match strings.iter().find(|s| !is_datetime(s)) {
                Some(bad) => Err(format!(
                    "'{bad}' is not an ISO-8601 date and time with a timezone offset"
                )),
                None => Ok(()),
            },
            None => mismatch(),
        },
        NxType::CharOrNumber if kind == ElementKind::Str || kind.is_numeric() => Ok(()),
        _ => mismatch(),
    }
}

/// Validate a populated template
pub fn validate(
    template: &Template,
    tree: &SchemaTree,
    options: &ValidationOptions,
) -> ValidationReport {
    let mut validator = Validator::new(template, tree, options);
    validator.check_required();
    validator.check_group_completeness();
    validator.check_lone_groups();
    validator.check_recommended();
    validator.check_values();
    log::info!(
        "Validated {} populated path(s) against {}: {} error(s), {} warning(s)",
        validator.populated.len(),
        tree.name,
        validator.report.errors.len(),
        validator.report.warnings.len()
    );
    validator.report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::definitions::NoBaseClasses;
    use crate::generator::build_template;
    use crate::value::{LinkTarget, Value};
    use ndarray::Array2;

    const NXTEST: &str = r#"<definition name="NXtest" version="1.0">
  <group type="NXentry">
    <field name="definition"><enumeration><item value="NXtest"/></enumeration></field>
    <field name="title" recommended="true"/>
    <field name="start_time" type="NX_DATE_TIME" optional="true"/>
    <field name="energy" type="NX_FLOAT" units="NX_ENERGY" optional="true"/>
    <field name="angle" type="NX_FLOAT" units="NX_ANY" optional="true"/>
    <field name="ratio" type="NX_FLOAT" units="NX_DIMENSIONLESS" optional="true"/>
    <field name="count" type="NX_POSINT" units="NX_UNITLESS" optional="true"/>
    <field name="offset" type="NX_UINT" optional="true"/>
    <field name="image" type="NX_NUMBER" optional="true">
      <dimensions rank="2"><dim index="1" value="nx"/><dim index="2" value="3"/></dimensions>
    </field>
    <field name="axis" type="NX_FLOAT" optional="true">
      <dimensions rank="1"><dim index="1" value="nx"/></dimensions>
    </field>
    <field name="temperature" type="NX_FLOAT" optional="true">
      <dimensions rank="0"/>
    </field>
    <group type="NXuser" minOccurs="0" maxOccurs="unbounded">
      <field name="name"/>
      <field name="email" optional="true"/>
    </group>
    <group type="NXsample">
      <field name="name" optional="true"/>
    </group>
    <group type="NXnote" optional="true">
      <field name="text" optional="true"/>
    </group>
  </group>
</definition>"#;

    fn setup() -> (SchemaTree, Template) {
        let tree = compile(NXTEST, &NoBaseClasses).unwrap();
        let mut template = build_template(&tree);
        template.set("/ENTRY[entry]/definition", "NXtest").unwrap();
        template.set("/ENTRY[entry]/title", "run 1").unwrap();
        template
            .set("/ENTRY[entry]/SAMPLE[sample]/name", "Si")
            .unwrap();
        (tree, template)
    }

    fn run(tree: &SchemaTree, template: &Template) -> ValidationReport {
        validate(template, tree, &ValidationOptions::default())
    }

    fn error_kinds(report: &ValidationReport) -> Vec<DiagnosticKind> {
        report.errors.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_valid_template() {
        let (tree, template) = setup();
        let report = run(&tree, &template);
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    fn test_missing_required() {
        let (tree, mut template) = setup();
        template.set_path("/ENTRY[entry]/definition".parse().unwrap(), Value::Missing).unwrap();
        let report = run(&tree, &template);
        assert_eq!(error_kinds(&report), vec![DiagnosticKind::MissingRequired]);
        assert_eq!(report.errors[0].path, "/ENTRY[entry]/definition");
        assert!(report.to_string().contains("/ENTRY[entry]/definition"));
    }

    #[test]
    fn test_recommended_is_warning_unless_fair() {
        let (tree, mut template) = setup();
        template.set_path("/ENTRY[entry]/title".parse().unwrap(), Value::Missing).unwrap();
        let report = run(&tree, &template);
        assert!(report.is_ok());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == DiagnosticKind::MissingRecommended));
        let fair = validate(&template, &tree, &ValidationOptions { fair: true });
        assert_eq!(error_kinds(&fair), vec![DiagnosticKind::MissingRecommended]);
    }

    #[test]
    fn test_unit_mismatch() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/energy", 1.2).unwrap();
        template.set("/ENTRY[entry]/energy/@units", "meter").unwrap();
        let report = run(&tree, &template);
        assert_eq!(error_kinds(&report), vec![DiagnosticKind::UnitMismatch]);
        assert!(report.errors[0].reason.contains("NX_ENERGY"));
        assert!(report.errors[0].reason.contains("[length]"));

        template.set("/ENTRY[entry]/energy/@units", "keV").unwrap();
        assert!(run(&tree, &template).is_ok());
    }

    #[test]
    fn test_missing_units() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/energy", 1.2).unwrap();
        template.set("/ENTRY[entry]/ratio", 0.5).unwrap();
        let report = run(&tree, &template);
        assert_eq!(error_kinds(&report), vec![DiagnosticKind::MissingUnits]);
        assert_eq!(report.errors[0].path, "/ENTRY[entry]/energy/@units");
    }

    #[test]
    fn test_nx_any_never_errors() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/angle", 3.0).unwrap();
        for units in ["", "furlong", "eV", "(("] {
            template.set("/ENTRY[entry]/angle/@units", units).unwrap();
            assert!(run(&tree, &template).is_ok());
        }
        template.set("/ENTRY[entry]/angle/@units", "").unwrap();
        assert!(run(&tree, &template)
            .warnings
            .iter()
            .any(|w| w.kind == DiagnosticKind::EmptyUnits));
    }

    #[test]
    fn test_units_without_field() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/energy/@units", "eV").unwrap();
        let report = run(&tree, &template);
        assert_eq!(error_kinds(&report), vec![DiagnosticKind::UnitsWithoutField]);
    }

    #[test]
    fn test_unitless() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/count", 3i64).unwrap();
        assert!(run(&tree, &template).is_ok());
        template.set("/ENTRY[entry]/count/@units", "m").unwrap();
        assert_eq!(
            error_kinds(&run(&tree, &template)),
            vec![DiagnosticKind::UnitMismatch]
        );
    }

    #[test]
    fn test_type_checks() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/count", 0i64).unwrap();
        template.set("/ENTRY[entry]/offset", -1i64).unwrap();
        template.set("/ENTRY[entry]/start_time", "yesterday").unwrap();
        template.set("/ENTRY[entry]/title", 5i64).unwrap();
        let report = run(&tree, &template);
        assert_eq!(
            error_kinds(&report),
            vec![DiagnosticKind::TypeMismatch; 4],
            "{report}"
        );

        template.set("/ENTRY[entry]/count", 2i64).unwrap();
        template.set("/ENTRY[entry]/offset", 0u64).unwrap();
        template
            .set("/ENTRY[entry]/start_time", "2024-03-01T12:00:00+01:00")
            .unwrap();
        template.set("/ENTRY[entry]/title", "run").unwrap();
        assert!(run(&tree, &template).is_ok());
    }

    #[test]
    fn test_integers_widen_to_float() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/ratio", 1i64).unwrap();
        assert!(run(&tree, &template).is_ok());
    }

    #[test]
    fn test_enumeration() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/definition", "nxtest").unwrap();
        assert_eq!(
            error_kinds(&run(&tree, &template)),
            vec![DiagnosticKind::NotInEnumeration]
        );
    }

    #[test]
    fn test_shapes_and_symbols() {
        let (tree, mut template) = setup();
        template
            .set("/ENTRY[entry]/image", Array2::<f64>::zeros((4, 3)))
            .unwrap();
        template.set("/ENTRY[entry]/axis", vec![0.0f64; 4]).unwrap();
        assert!(run(&tree, &template).is_ok());

        template.set("/ENTRY[entry]/axis", vec![0.0f64; 5]).unwrap();
        assert_eq!(
            error_kinds(&run(&tree, &template)),
            vec![DiagnosticKind::ShapeMismatch]
        );

        template.set("/ENTRY[entry]/axis", vec![0.0f64; 4]).unwrap();
        template
            .set("/ENTRY[entry]/image", Array2::<f64>::zeros((4, 2)))
            .unwrap();
        assert_eq!(
            error_kinds(&run(&tree, &template)),
            vec![DiagnosticKind::ShapeMismatch]
        );
    }

    #[test]
    fn test_rank_zero_field() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/temperature", 21.5).unwrap();
        assert!(run(&tree, &template).is_ok());

        template
            .set("/ENTRY[entry]/temperature", vec![21.5f64])
            .unwrap();
        assert_eq!(
            error_kinds(&run(&tree, &template)),
            vec![DiagnosticKind::ShapeMismatch]
        );
    }

    #[test]
    fn test_partial_group_instances() {
        let (tree, mut template) = setup();
        template
            .set("/ENTRY[entry]/USER[user1]/name", "Jane")
            .unwrap();
        template
            .set("/ENTRY[entry]/USER[user2]/email", "j@example.org")
            .unwrap();
        let report = run(&tree, &template);
        assert_eq!(error_kinds(&report), vec![DiagnosticKind::IncompleteGroup]);
        assert_eq!(report.errors[0].path, "/ENTRY[entry]/USER[user2]/name");
    }

    #[test]
    fn test_lone_groups() {
        let (tree, mut template) = setup();
        template
            .set_path("/ENTRY[entry]/SAMPLE[sample]/name".parse().unwrap(), Value::Missing)
            .unwrap();
        assert_eq!(
            error_kinds(&run(&tree, &template)),
            vec![DiagnosticKind::EmptyLoneGroup]
        );

        template
            .set("/ENTRY[entry]/NOTE[note]/text", "see logbook")
            .unwrap();
        let report = run(&tree, &template);
        assert!(report.is_ok(), "{report}");
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == DiagnosticKind::LoneGroupWaived));
    }

    #[test]
    fn test_unknown_paths_and_links() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/vendor_blob", "x").unwrap();
        template
            .set(
                "/ENTRY[entry]/energy",
                LinkTarget::Internal(String::from("/entry/other")),
            )
            .unwrap();
        template.set("/ENTRY[entry]/energy/@units", "eV").unwrap();
        let report = run(&tree, &template);
        assert!(report.is_ok(), "{report}");
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == DiagnosticKind::UnknownPath && w.path == "/ENTRY[entry]/vendor_blob"));
    }

    #[test]
    fn test_validation_has_no_side_effects() {
        let (tree, mut template) = setup();
        template.set("/ENTRY[entry]/energy", 1.2).unwrap();
        let before = template.clone();
        let _ = run(&tree, &template);
        assert_eq!(before, template);
    }
}
