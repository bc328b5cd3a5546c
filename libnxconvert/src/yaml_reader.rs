//! The built-in ELN reader.
//!
//! Reads YAML documents whose keys are template paths. Keys may be given flat
//! (`/ENTRY[entry]/definition: NXmpes`) or as nested mappings whose keys are
//! joined with `/`. Besides plain scalars and (nested) sequences, a few mapping
//! forms carry special values:
//!
//! ```yaml
//! /ENTRY[entry]/energy: {value: 1.2, unit: eV}
//! /ENTRY[entry]/link: {link: /entry/data}
//! /ENTRY[entry]/data: {compress: [[1, 2], [3, 4]], strength: 5, filter: gzip}
//! ```
use std::any::Any;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use serde_yaml::{Mapping, Value as YamlValue};

use super::error::ReaderError;
use super::path::TemplatePath;
use super::reader::{Reader, ANY_NXDL};
use super::template::Template;
use super::value::{Compressed, LinkTarget, NdValue, Scalar, Value};

pub const YAML_READER_NAME: &str = "yaml";
const EXTENSIONS: [&str; 2] = ["yaml", "yml"];
const SUPPORTED: [&str; 1] = [ANY_NXDL];

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlReader;

impl YamlReader {
    fn accepts(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e.to_lowercase().as_str()))
    }

    /// Fill the template from one parsed document
    fn apply(
        template: &mut Template,
        document: &YamlValue,
        source: &Path,
    ) -> Result<(), ReaderError> {
        let YamlValue::Mapping(mapping) = document else {
            return Err(malformed(source, "the document is not a mapping"));
        };
        let mut assignments = Vec::new();
        collect(mapping, "", source, &mut assignments)?;
        for (path, value) in assignments {
            let path: TemplatePath = path.parse()?;
            log::trace!("{} <- {}", path, value.summary());
            template.set_path(path, value)?;
        }
        Ok(())
    }
}

impl Reader for YamlReader {
    fn name(&self) -> &str {
        YAML_READER_NAME
    }

    fn supported_nxdls(&self) -> &[&str] {
        &SUPPORTED
    }

    fn read(
        &self,
        mut template: Template,
        file_paths: &[PathBuf],
        objects: Option<&[Box<dyn Any>]>,
    ) -> Result<Template, ReaderError> {
        let files: Vec<&PathBuf> = file_paths.iter().filter(|p| Self::accepts(p)).collect();
        for skipped in file_paths.iter().filter(|p| !Self::accepts(p)) {
            log::warn!(
                "Reader {} ignores {} which is not a YAML file",
                YAML_READER_NAME,
                skipped.display()
            );
        }
        let documents: Vec<&YamlValue> = objects
            .unwrap_or_default()
            .iter()
            .filter_map(|o| o.downcast_ref::<YamlValue>())
            .collect();
        if files.is_empty() && documents.is_empty() {
            return Err(ReaderError::NoInputs(YAML_READER_NAME.to_string()));
        }

        for file in files {
            if !file.exists() {
                return Err(ReaderError::IOError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", file.display()),
                )));
            }
            let text = std::fs::read_to_string(file)?;
            let document: YamlValue = serde_yaml::from_str(&text)?;
            log::info!("Reading ELN data from {}", file.display());
            Self::apply(&mut template, &document, file)?;
        }
        for document in documents {
            Self::apply(&mut template, document, Path::new("<memory>"))?;
        }
        Ok(template)
    }
}

fn malformed(file: &Path, reason: &str) -> ReaderError {
    ReaderError::Malformed {
        file: file.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn key_text(key: &YamlValue, file: &Path) -> Result<String, ReaderError> {
    match key {
        YamlValue::String(s) => Ok(s.clone()),
        YamlValue::Number(n) => Ok(n.to_string()),
        _ => Err(malformed(file, "mapping keys must be strings")),
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

fn has_only_keys(mapping: &Mapping, required: &str, allowed: &[&str]) -> bool {
    mapping.contains_key(required)
        && mapping
            .keys()
            .all(|k| k.as_str().is_some_and(|k| k == required || allowed.contains(&k)))
}

/// Walk a mapping and collect (path, value) pairs. Nulls are skipped.
fn collect(
    mapping: &Mapping,
    prefix: &str,
    file: &Path,
    out: &mut Vec<(String, Value)>,
) -> Result<(), ReaderError> {
    for (key, value) in mapping.iter() {
        let path = join_key(prefix, &key_text(key, file)?);
        match value {
            YamlValue::Null => (),
            YamlValue::Mapping(inner) if has_only_keys(inner, "link", &[]) => {
                out.push((path, link_value(&inner["link"], file)?));
            }
            YamlValue::Mapping(inner) if has_only_keys(inner, "compress", &["strength", "filter"]) => {
                out.push((path, compressed_value(inner, file)?));
            }
            YamlValue::Mapping(inner) if has_only_keys(inner, "value", &["unit", "units"]) => {
                let unit = inner.get("unit").or_else(|| inner.get("units"));
                if let Some(unit) = unit.filter(|u| !u.is_null()) {
                    let unit = unit
                        .as_str()
                        .ok_or_else(|| malformed(file, &format!("unit of {path} is not a string")))?;
                    out.push((format!("{path}/@units"), Value::from(unit)));
                }
                let value = plain_value(&inner["value"], file)?;
                if !value.is_missing() {
                    out.push((path, value));
                }
            }
            YamlValue::Mapping(inner) => collect(inner, &path, file, out)?,
            other => out.push((path, plain_value(other, file)?)),
        }
    }
    Ok(())
}

fn link_value(value: &YamlValue, file: &Path) -> Result<Value, ReaderError> {
    let parse = |v: &YamlValue| -> Result<LinkTarget, ReaderError> {
        v.as_str()
            .ok_or_else(|| malformed(file, "link targets must be strings"))?
            .parse::<LinkTarget>()
            .map_err(|t| malformed(file, &format!("invalid link target '{t}'")))
    };
    match value {
        YamlValue::Sequence(targets) => Ok(Value::VirtualLink(
            targets.iter().map(parse).collect::<Result<Vec<_>, _>>()?,
        )),
        other => Ok(Value::Link(parse(other)?)),
    }
}

fn compressed_value(mapping: &Mapping, file: &Path) -> Result<Value, ReaderError> {
    let data = match &mapping["compress"] {
        YamlValue::Sequence(_) => array_value(&mapping["compress"], file)?,
        _ => return Err(malformed(file, "compress expects an array")),
    };
    let strength = match mapping.get("strength") {
        None | Some(YamlValue::Null) => None,
        Some(s) => Some(
            s.as_u64()
                .and_then(|s| u8::try_from(s).ok())
                .ok_or_else(|| malformed(file, "strength must be a small non-negative integer"))?,
        ),
    };
    let filter = match mapping.get("filter") {
        None | Some(YamlValue::Null) => None,
        Some(f) => Some(
            f.as_str()
                .ok_or_else(|| malformed(file, "filter must be a string"))?
                .to_string(),
        ),
    };
    Ok(Value::Compressed(Compressed {
        data,
        strength,
        filter,
    }))
}

fn plain_value(value: &YamlValue, file: &Path) -> Result<Value, ReaderError> {
    match value {
        YamlValue::Null => Ok(Value::Missing),
        YamlValue::Bool(b) => Ok(Value::from(*b)),
        YamlValue::Number(n) => Ok(number_value(n)),
        YamlValue::String(s) => Ok(Value::from(s.as_str())),
        YamlValue::Sequence(_) => Ok(Value::Array(array_value(value, file)?)),
        YamlValue::Mapping(_) => Err(malformed(file, "unexpected mapping in value position")),
        YamlValue::Tagged(_) => Err(malformed(file, "tagged values are not supported")),
    }
}

fn number_value(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Scalar(Scalar::Int(i))
    } else if let Some(u) = n.as_u64() {
        Value::Scalar(Scalar::UInt(u))
    } else {
        Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN)))
    }
}

/// Record the shape of nested sequences and their leaves in row major order
fn flatten<'v>(
    value: &'v YamlValue,
    depth: usize,
    shape: &mut Vec<usize>,
    leaf_depth: &mut Option<usize>,
    leaves: &mut Vec<&'v YamlValue>,
) -> Result<(), String> {
    match value {
        YamlValue::Sequence(items) => {
            match shape.get(depth) {
                None if leaf_depth.is_none() => shape.push(items.len()),
                Some(len) if *len == items.len() => (),
                _ => return Err(String::from("nested sequences are ragged")),
            }
            for item in items {
                flatten(item, depth + 1, shape, leaf_depth, leaves)?;
            }
        }
        leaf => {
            if *leaf_depth.get_or_insert(depth) != depth {
                return Err(String::from("nested sequences are ragged"));
            }
            leaves.push(leaf);
        }
    }
    Ok(())
}

fn array_value(value: &YamlValue, file: &Path) -> Result<NdValue, ReaderError> {
    let mut shape = Vec::new();
    let mut leaf_depth = None;
    let mut leaves = Vec::new();
    flatten(value, 0, &mut shape, &mut leaf_depth, &mut leaves)
        .map_err(|reason| malformed(file, &reason))?;
    let dims = IxDyn(&shape);
    let bad_shape = |e: ndarray::ShapeError| malformed(file, &e.to_string());

    let array = if leaves.iter().all(|v| v.is_bool()) && !leaves.is_empty() {
        let data = leaves.iter().filter_map(|v| v.as_bool()).collect();
        NdValue::Bool(ArrayD::from_shape_vec(dims, data).map_err(bad_shape)?)
    } else if leaves.iter().all(|v| v.is_string()) && !leaves.is_empty() {
        let data = leaves
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect();
        NdValue::Str(ArrayD::from_shape_vec(dims, data).map_err(bad_shape)?)
    } else if leaves.iter().all(|v| v.is_i64()) && !leaves.is_empty() {
        let data = leaves.iter().filter_map(|v| v.as_i64()).collect();
        NdValue::I64(ArrayD::from_shape_vec(dims, data).map_err(bad_shape)?)
    } else if leaves.iter().all(|v| v.is_number()) {
        let data = leaves.iter().filter_map(|v| v.as_f64()).collect();
        NdValue::F64(ArrayD::from_shape_vec(dims, data).map_err(bad_shape)?)
    } else {
        return Err(malformed(file, "array elements must share one type"));
    };
    Ok(array)
}
