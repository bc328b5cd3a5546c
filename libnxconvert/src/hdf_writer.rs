use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group, H5Type, Hyperslab, Location, Selection, SliceOrIndex};
use ndarray::{arr0, ArrayD};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use fxhash::FxHashSet;

use super::error::WriterError;
use super::path::{Segment, TemplatePath};
use super::template::Template;
use super::value::{with_array, Compressed, LinkTarget, NdValue, Scalar, Value};

const NX_CLASS: &str = "NX_class";
const ROOT_CLASS: &str = "NXroot";
const FALLBACK_CLASS: &str = "NXcollection";
/// Name of the source file in a virtual mapping which refers to the file itself
const SAME_FILE: &str = ".";

pub const DEFAULT_CHUNK_TARGET_BYTES: usize = 1024 * 1024;
pub const DEFAULT_COMPRESSION_STRENGTH: u8 = 9;
const MAX_COMPRESSION_STRENGTH: u8 = 9;

const GZIP: &str = "gzip";
const GZIP_SHUFFLE: &str = "gzip+shuffle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Upper bound of the byte size of one chunk of a compressed dataset
    pub chunk_target_bytes: usize,
    /// Deflate level used when a compressed value does not name one
    pub default_strength: u8,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            chunk_target_bytes: DEFAULT_CHUNK_TARGET_BYTES,
            default_strength: DEFAULT_COMPRESSION_STRENGTH,
        }
    }
}

/// Chunked layout and filter settings of one compressed dataset
#[derive(Debug, Clone, PartialEq, Eq)]
struct Layout {
    chunk: Vec<usize>,
    shuffle: bool,
    strength: u8,
}

/// The largest divisor of `size` no bigger than half of it, or half of it rounded
/// up when `size` is prime
fn shrink_axis(size: usize) -> usize {
    (2..)
        .take_while(|factor| factor * factor <= size)
        .find(|factor| size % factor == 0)
        .map_or((size + 1) / 2, |factor| size / factor)
}

/// Pick a chunk shape for an array of the given dimensions.
///
/// Starting from the full array, the largest chunk axis is cut down to its largest
/// proper divisor until one chunk holds at most `target` bytes, so chunks tile the
/// array without ragged edges unless an axis is prime. Dimensions which are powers
/// of two get power-of-two chunk axes.
pub fn chunk_shape(dims: &[usize], element_size: usize, target: usize) -> Vec<usize> {
    let mut chunk: Vec<usize> = dims.iter().map(|d| (*d).max(1)).collect();
    let bytes = |c: &[usize]| c.iter().product::<usize>() * element_size.max(1);
    while bytes(&chunk) > target {
        let Some((axis, size)) = chunk
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|(axis, size)| (*size, std::cmp::Reverse(*axis)))
        else {
            break;
        };
        if size <= 1 {
            break;
        }
        chunk[axis] = shrink_axis(size);
    }
    chunk
}

fn to_varlen(text: &str) -> Result<VarLenUnicode, WriterError> {
    VarLenUnicode::from_str(text).map_err(|e| WriterError::StringError(e.to_string()))
}

fn to_varlen_array(strings: &ArrayD<String>) -> Result<ArrayD<VarLenUnicode>, WriterError> {
    let converted = strings
        .iter()
        .map(|s| to_varlen(s))
        .collect::<Result<Vec<_>, _>>()?;
    ArrayD::from_shape_vec(strings.raw_dim(), converted)
        .map_err(|e| WriterError::StringError(e.to_string()))
}

/// A scalar as a zero dimensional array. Byte strings become a one dimensional u8 array.
fn scalar_array(scalar: &Scalar) -> NdValue {
    match scalar {
        Scalar::Str(s) => NdValue::Str(arr0(s.clone()).into_dyn()),
        Scalar::Int(v) => NdValue::I64(arr0(*v).into_dyn()),
        Scalar::UInt(v) => NdValue::U64(arr0(*v).into_dyn()),
        Scalar::Float(v) => NdValue::F64(arr0(*v).into_dyn()),
        Scalar::Bool(v) => NdValue::Bool(arr0(*v).into_dyn()),
        Scalar::Bytes(b) => NdValue::from(b.clone()),
    }
}

fn create_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    data: &ArrayD<T>,
    layout: Option<&Layout>,
) -> Result<Dataset, WriterError> {
    let builder = group.new_dataset_builder().with_data(data);
    let dataset = match layout {
        Some(layout) if data.ndim() > 0 => {
            let mut builder = builder.chunk(layout.chunk.clone());
            if layout.shuffle {
                builder = builder.shuffle();
            }
            builder.deflate(layout.strength).create(name)?
        }
        _ => builder.create(name)?,
    };
    Ok(dataset)
}

fn write_array(
    group: &Group,
    name: &str,
    data: &NdValue,
    layout: Option<&Layout>,
) -> Result<Dataset, WriterError> {
    with_array!(
        data,
        array => create_dataset(group, name, array, layout),
        strings => create_dataset(group, name, &to_varlen_array(strings)?, layout)
    )
}

fn write_string_attribute(location: &Location, name: &str, text: &str) -> Result<(), WriterError> {
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&to_varlen(text)?)?;
    Ok(())
}

fn write_attribute_value(
    location: &Location,
    name: &str,
    value: &Value,
    path: &TemplatePath,
) -> Result<(), WriterError> {
    match value {
        Value::Scalar(Scalar::Str(s)) => write_string_attribute(location, name, s)?,
        Value::Scalar(Scalar::Int(v)) => location.new_attr::<i64>().create(name)?.write_scalar(v)?,
        Value::Scalar(Scalar::UInt(v)) => location.new_attr::<u64>().create(name)?.write_scalar(v)?,
        Value::Scalar(Scalar::Float(v)) => location.new_attr::<f64>().create(name)?.write_scalar(v)?,
        Value::Scalar(Scalar::Bool(v)) => location.new_attr::<bool>().create(name)?.write_scalar(v)?,
        Value::Array(array) => with_array!(
            array,
            a => {
                location.new_attr_builder().with_data(a).create(name)?;
            },
            strings => {
                location
                    .new_attr_builder()
                    .with_data(&to_varlen_array(strings)?)
                    .create(name)?;
            }
        ),
        _ => return Err(WriterError::UnsupportedAttributeValue(path.to_string())),
    }
    Ok(())
}

/// Resolve the layout of a compressed value
fn layout_of(
    compressed: &Compressed,
    path: &TemplatePath,
    options: &WriteOptions,
) -> Result<Layout, WriterError> {
    let strength = compressed.strength.unwrap_or(options.default_strength);
    if strength > MAX_COMPRESSION_STRENGTH {
        return Err(WriterError::InvalidStrength(path.to_string(), strength));
    }
    let shuffle = match compressed.filter.as_deref() {
        None | Some(GZIP) => false,
        Some(GZIP_SHUFFLE) => true,
        Some(other) => {
            return Err(WriterError::UnknownFilter(
                path.to_string(),
                other.to_string(),
            ))
        }
    };
    Ok(Layout {
        chunk: chunk_shape(
            compressed.data.shape(),
            compressed.data.element_size(),
            options.chunk_target_bytes,
        ),
        shuffle,
        strength,
    })
}

/// One source of a virtual dataset
struct VirtualSource {
    file: String,
    dataset: String,
    shape: Vec<usize>,
}

/// Writes one template into one HDF5 file.
///
/// Objects are materialized in three passes over the template, which is ordered
/// so that every parent path precedes its descendants: groups and datasets,
/// then links, then attributes.
struct HDFWriter<'a> {
    template: &'a Template,
    options: &'a WriteOptions,
    cancel: &'a AtomicBool,
    file: File,
    /// Directory relative external link targets are resolved against
    base_dir: PathBuf,
    groups: FxHashSet<String>,
    /// Datasets and links
    leaves: FxHashSet<String>,
    links: FxHashSet<String>,
    attributes: FxHashSet<String>,
}

impl<'a> HDFWriter<'a> {
    fn new(
        template: &'a Template,
        options: &'a WriteOptions,
        cancel: &'a AtomicBool,
        file: File,
        base_dir: PathBuf,
    ) -> Self {
        let mut groups = FxHashSet::default();
        groups.insert(String::from("/"));
        Self {
            template,
            options,
            cancel,
            file,
            base_dir,
            groups,
            leaves: FxHashSet::default(),
            links: FxHashSet::default(),
            attributes: FxHashSet::default(),
        }
    }

    fn check_cancel(&self) -> Result<(), WriterError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(WriterError::Cancelled);
        }
        Ok(())
    }

    fn write_root_attributes(&self, file_name: &str) -> Result<(), WriterError> {
        let (major, minor, release) = hdf5::library_version();
        let file_time = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| WriterError::StringError(e.to_string()))?;
        let creator = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        write_string_attribute(&self.file, NX_CLASS, ROOT_CLASS)?;
        write_string_attribute(&self.file, "creator", &creator)?;
        write_string_attribute(&self.file, "file_name", file_name)?;
        write_string_attribute(&self.file, "file_time", &file_time)?;
        write_string_attribute(
            &self.file,
            "HDF5_Version",
            &format!("{major}.{minor}.{release}"),
        )?;
        Ok(())
    }

    /// The NeXus class stamped onto the group at `path`
    fn class_of(&self, path: &TemplatePath) -> String {
        if let Some(class) = self.template.group_class(&path.concept()) {
            return class.to_string();
        }
        match path.last() {
            Some(Segment::Class { concept, .. }) => format!("NX{}", concept.to_lowercase()),
            _ => String::from(FALLBACK_CLASS),
        }
    }

    /// Open the group at `path`, creating it and any missing ancestors
    fn ensure_group(&mut self, path: &TemplatePath) -> Result<Group, WriterError> {
        for len in 1..=path.len() {
            let prefix = path.prefix(len);
            let hdf5_path = prefix.hdf5_path();
            if self.groups.contains(&hdf5_path) {
                continue;
            }
            if self.leaves.contains(&hdf5_path) {
                return Err(WriterError::ParentNotGroup(path.to_string()));
            }
            let group = self.file.create_group(&hdf5_path)?;
            let class = self.class_of(&prefix);
            write_string_attribute(&group, NX_CLASS, &class)?;
            log::trace!("Created group {} ({})", hdf5_path, class);
            self.groups.insert(hdf5_path);
        }
        Ok(self.file.group(&path.hdf5_path())?)
    }

    /// Reserve the HDF5 name of a dataset or link
    fn claim(&mut self, hdf5_path: &str) -> Result<(), WriterError> {
        if self.groups.contains(hdf5_path) || !self.leaves.insert(hdf5_path.to_string()) {
            return Err(WriterError::DuplicatePath(hdf5_path.to_string()));
        }
        Ok(())
    }

    fn split<'p>(&mut self, path: &'p TemplatePath) -> Result<(Group, &'p str), WriterError> {
        let (Some(parent), Some(last)) = (path.parent(), path.last()) else {
            return Err(WriterError::ParentNotGroup(path.to_string()));
        };
        let group = self.ensure_group(&parent)?;
        Ok((group, last.hdf5_name()))
    }

    fn write_data(&mut self, path: &TemplatePath, value: &Value) -> Result<(), WriterError> {
        let (group, name) = self.split(path)?;
        let hdf5_path = path.hdf5_path();
        self.claim(&hdf5_path)?;
        match value {
            Value::Scalar(scalar) => {
                write_array(&group, name, &scalar_array(scalar), None)?;
            }
            Value::Array(array) => {
                write_array(&group, name, array, None)?;
            }
            Value::Compressed(compressed) => {
                let layout = layout_of(compressed, path, self.options)?;
                write_array(&group, name, &compressed.data, Some(&layout))?;
                log::debug!(
                    "Compressed {} with chunks {:?}, strength {}",
                    hdf5_path,
                    layout.chunk,
                    layout.strength
                );
            }
            _ => return Ok(()),
        }
        log::debug!("Wrote dataset {} = {}", hdf5_path, value.summary());
        Ok(())
    }

    fn write_link(&mut self, path: &TemplatePath, target: &LinkTarget) -> Result<(), WriterError> {
        let (group, name) = self.split(path)?;
        let hdf5_path = path.hdf5_path();
        self.claim(&hdf5_path)?;
        self.links.insert(hdf5_path.clone());
        match target {
            LinkTarget::Internal(target_path) => group.link_soft(target_path, name)?,
            LinkTarget::External { file, path } => group.link_external(file, path, name)?,
        }
        log::debug!("Linked {} -> {}", hdf5_path, target);
        Ok(())
    }

    fn open_source(&self, target: &LinkTarget) -> Result<(String, Dataset), WriterError> {
        match target {
            LinkTarget::Internal(path) => Ok((SAME_FILE.to_string(), self.file.dataset(path)?)),
            LinkTarget::External { file, path } => {
                let source = File::open(self.base_dir.join(file))?;
                Ok((file.clone(), source.dataset(path)?))
            }
        }
    }

    /// Concatenate the sources along their first axis into a virtual dataset
    fn write_virtual(&mut self, path: &TemplatePath, targets: &[LinkTarget]) -> Result<(), WriterError> {
        let invalid = |reason: String| WriterError::VirtualDataset {
            path: path.to_string(),
            reason,
        };
        let mut sources: Vec<VirtualSource> = Vec::with_capacity(targets.len());
        let mut dtype: Option<TypeDescriptor> = None;
        for target in targets {
            let (file, dataset) = self.open_source(target)?;
            let shape = dataset.shape();
            let descriptor = dataset.dtype()?.to_descriptor()?;
            if shape.is_empty() {
                return Err(invalid(format!("source {target} is a scalar")));
            }
            match &dtype {
                Some(expected) if *expected != descriptor => {
                    return Err(invalid(format!("source {target} has a different datatype")))
                }
                _ => dtype = Some(descriptor),
            }
            if let Some(first) = sources.first() {
                if first.shape[1..] != shape[1..] {
                    return Err(invalid(format!(
                        "source {target} has shape {shape:?}, which does not match {:?} past the first axis",
                        first.shape
                    )));
                }
            }
            let dataset_path = match target {
                LinkTarget::Internal(p) => p.clone(),
                LinkTarget::External { path, .. } => path.clone(),
            };
            sources.push(VirtualSource {
                file,
                dataset: dataset_path,
                shape,
            });
        }
        let (Some(dtype), Some(first)) = (dtype, sources.first()) else {
            return Err(invalid(String::from("no sources were given")));
        };

        let mut shape = first.shape.clone();
        shape[0] = sources.iter().map(|s| s.shape[0]).sum();
        let mut mappings = Vec::with_capacity(sources.len());
        let mut offset = 0;
        for source in sources.iter() {
            let rows = source.shape[0];
            let mut slab = vec![SliceOrIndex::from(offset..offset + rows)];
            slab.extend(source.shape[1..].iter().map(|d| SliceOrIndex::from(0..*d)));
            mappings.push((source, Hyperslab::from(slab)));
            offset += rows;
        }

        let (group, name) = self.split(path)?;
        let hdf5_path = path.hdf5_path();
        self.claim(&hdf5_path)?;
        group
            .new_dataset_builder()
            .empty_as(&dtype)
            .shape(shape.clone())
            .with_dcpl(|plist| {
                for (source, slab) in mappings.iter() {
                    plist.virtual_map(
                        &source.file,
                        &source.dataset,
                        source.shape.clone(),
                        Selection::All,
                        shape.clone(),
                        slab.clone(),
                    );
                }
                plist
            })
            .create(name)?;
        log::debug!(
            "Wrote virtual dataset {} from {} source(s), shape {:?}",
            hdf5_path,
            targets.len(),
            shape
        );
        Ok(())
    }

    fn write_attribute(&mut self, path: &TemplatePath, value: &Value) -> Result<(), WriterError> {
        let (Some(owner), Some(last)) = (path.parent(), path.last()) else {
            return Err(WriterError::ParentNotGroup(path.to_string()));
        };
        let name = last.hdf5_name();
        let owner_path = owner.hdf5_path();
        if self.links.contains(&owner_path) {
            log::warn!("Attribute {} was not written because its owner is a link", path);
            return Ok(());
        }
        if !self.attributes.insert(format!("{owner_path}@{name}")) {
            return Err(WriterError::DuplicatePath(path.to_string()));
        }
        if self.leaves.contains(&owner_path) {
            let dataset = self.file.dataset(&owner_path)?;
            write_attribute_value(&dataset, name, value, path)?;
        } else {
            // A declared field without a value cannot carry attributes
            let declared_leaf = self.template.entry(&owner).is_some()
                && self.template.group_class(&owner.concept()).is_none();
            if declared_leaf && !self.groups.contains(&owner_path) {
                return Err(WriterError::ParentNotGroup(path.to_string()));
            }
            let known_group = self.groups.contains(&owner_path)
                || self.template.group_class(&owner.concept()).is_some();
            if !known_group {
                log::warn!(
                    "Attribute {} was not written because its owner {} is not in the template",
                    path,
                    owner
                );
                return Ok(());
            }
            let group = self.ensure_group(&owner)?;
            write_attribute_value(&group, name, value, path)?;
        }
        log::trace!("Wrote attribute {} = {}", path, value.summary());
        Ok(())
    }

    fn write_all(&mut self) -> Result<(), WriterError> {
        let template = self.template;
        let populated: Vec<(&TemplatePath, &Value)> = template.populated().collect();
        if let Some((path, _)) = populated.iter().find(|(p, _)| p.has_wildcard()) {
            return Err(WriterError::WildcardPath(path.to_string()));
        }

        for (path, value) in populated.iter().filter(|(p, _)| !p.is_attribute()) {
            self.check_cancel()?;
            if !value.is_link() {
                self.write_data(path, value)?;
            }
        }
        for (path, value) in populated.iter().filter(|(p, _)| !p.is_attribute()) {
            self.check_cancel()?;
            match value {
                Value::Link(target) => self.write_link(path, target)?,
                Value::VirtualLink(targets) => self.write_virtual(path, targets)?,
                _ => (),
            }
        }
        for (path, value) in populated.iter().filter(|(p, _)| p.is_attribute()) {
            self.check_cancel()?;
            self.write_attribute(path, value)?;
        }
        Ok(())
    }
}

/// Write the populated template into an HDF5 file at `destination`.
///
/// The file is assembled under a temporary name next to the destination and only
/// moved into place once complete; on any error, including cancellation, the
/// temporary file is removed. Returns the size of the written file in bytes.
pub fn write(
    template: &Template,
    destination: &Path,
    options: &WriteOptions,
    cancel: &AtomicBool,
) -> Result<u64, WriterError> {
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = tempfile::Builder::new()
        .prefix(".nxconvert-")
        .suffix(".h5.part")
        .tempfile_in(&directory)?
        .into_temp_path();
    log::debug!("Writing {} through {:?}", file_name, temp_path);

    {
        let file = File::create(&temp_path)?;
        let mut writer = HDFWriter::new(template, options, cancel, file, directory);
        writer.write_root_attributes(&file_name)?;
        writer.write_all()?;
        writer.file.flush()?;
        log::debug!(
            "Wrote {} group(s), {} dataset(s) and link(s), {} attribute(s)",
            writer.groups.len(),
            writer.leaves.len(),
            writer.attributes.len()
        );
    }

    temp_path.persist(destination)?;
    let bytes = std::fs::metadata(destination)?.len();
    log::info!(
        "Wrote {} to {}",
        human_bytes::human_bytes(bytes as f64),
        destination.display()
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdf5::filters::Filter;
    use ndarray::{Array1, Array2};

    fn template() -> Template {
        let mut template = Template::new("NXtest", Some("1.0"));
        template.declare_group_class("/ENTRY".parse().unwrap(), "NXentry");
        template.declare_group_class("/ENTRY/USER".parse().unwrap(), "NXuser");
        template.set("/ENTRY[entry]/definition", "NXtest").unwrap();
        template
    }

    fn write_to(template: &Template, dir: &Path, name: &str) -> Result<PathBuf, WriterError> {
        let destination = dir.join(name);
        write(
            template,
            &destination,
            &WriteOptions::default(),
            &AtomicBool::new(false),
        )?;
        Ok(destination)
    }

    fn read_string(dataset: &Dataset) -> String {
        dataset
            .read_scalar::<VarLenUnicode>()
            .unwrap()
            .as_str()
            .to_string()
    }

    fn read_string_attr(location: &Location, name: &str) -> String {
        location
            .attr(name)
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap()
            .as_str()
            .to_string()
    }

    #[test]
    fn test_chunk_shape() {
        assert_eq!(chunk_shape(&[100, 100], 4, 1024 * 1024), vec![100, 100]);
        assert_eq!(chunk_shape(&[1024, 1024], 8, 1024 * 1024), vec![256, 512]);
        let chunk = chunk_shape(&[4096, 3, 1000], 8, 64 * 1024);
        assert!(chunk.iter().product::<usize>() * 8 <= 64 * 1024);
        assert_eq!(chunk_shape(&[0, 10], 4, 8), vec![1, 2]);
        assert!(chunk_shape(&[], 4, 8).is_empty());
    }

    #[test]
    fn test_chunk_shape_divides_dimensions() {
        assert_eq!(chunk_shape(&[300], 8, 600), vec![75]);
        assert_eq!(chunk_shape(&[300], 8, 300), vec![25]);
        for dims in [vec![300, 200], vec![1000, 360, 12], vec![96, 4096]] {
            let chunk = chunk_shape(&dims, 8, 64 * 1024);
            assert!(chunk.iter().product::<usize>() * 8 <= 64 * 1024);
            for (d, c) in dims.iter().zip(chunk.iter()) {
                assert_eq!(d % c, 0, "{chunk:?} does not tile {dims:?}");
            }
        }
        // Prime axes fall back to rounding up
        assert_eq!(chunk_shape(&[101], 1, 60), vec![51]);
    }

    #[test]
    fn test_minimal_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_to(&template(), dir.path(), "minimal.nxs").unwrap();
        let file = File::open(&path).unwrap();
        let entry = file.group("entry").unwrap();
        assert_eq!(read_string_attr(&entry, NX_CLASS), "NXentry");
        assert_eq!(read_string(&entry.dataset("definition").unwrap()), "NXtest");
        assert_eq!(read_string_attr(&file, NX_CLASS), ROOT_CLASS);
        assert_eq!(read_string_attr(&file, "file_name"), "minimal.nxs");
        assert!(read_string_attr(&file, "creator").starts_with("libnxconvert"));
    }

    #[test]
    fn test_units_and_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set("/ENTRY[entry]/energy", 1.5).unwrap();
        t.set("/ENTRY[entry]/energy/@units", "eV").unwrap();
        t.set("/ENTRY[entry]/definition/@version", "1.0").unwrap();
        t.set("/ENTRY[entry]/@default", "data").unwrap();
        t.set("/ENTRY[entry]/@counts", vec![1i64, 2, 3]).unwrap();
        let path = write_to(&t, dir.path(), "attrs.nxs").unwrap();
        let file = File::open(&path).unwrap();
        let energy = file.dataset("entry/energy").unwrap();
        assert_eq!(energy.read_scalar::<f64>().unwrap(), 1.5);
        assert_eq!(read_string_attr(&energy, "units"), "eV");
        assert_eq!(
            read_string_attr(&file.dataset("entry/definition").unwrap(), "version"),
            "1.0"
        );
        let entry = file.group("entry").unwrap();
        assert_eq!(read_string_attr(&entry, "default"), "data");
        assert_eq!(
            entry.attr("counts").unwrap().read_raw::<i64>().unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_internal_link() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set(
            "/ENTRY[entry]/link",
            LinkTarget::Internal(String::from("/entry/definition")),
        )
        .unwrap();
        let path = write_to(&t, dir.path(), "link.nxs").unwrap();
        let file = File::open(&path).unwrap();
        assert_eq!(read_string(&file.dataset("entry/link").unwrap()), "NXtest");
    }

    #[test]
    fn test_external_link() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.h5");
        {
            let source = File::create(&source_path).unwrap();
            let group = source.create_group("data").unwrap();
            group
                .new_dataset_builder()
                .with_data(&Array1::from(vec![4i64, 5, 6]))
                .create("values")
                .unwrap();
        }
        let mut t = template();
        t.set(
            "/ENTRY[entry]/external",
            LinkTarget::External {
                file: source_path.to_str().unwrap().to_string(),
                path: String::from("/data/values"),
            },
        )
        .unwrap();
        let path = write_to(&t, dir.path(), "external.nxs").unwrap();
        let file = File::open(&path).unwrap();
        assert_eq!(
            file.dataset("entry/external")
                .unwrap()
                .read_raw::<i64>()
                .unwrap(),
            vec![4, 5, 6]
        );
    }

    #[test]
    fn test_attribute_owner_outside_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set("/ENTRY[entry]/ghost/@flag", "on").unwrap();
        t.set("/ENTRY[entry]/USER[user1]/@role", "pi").unwrap();
        let path = write_to(&t, dir.path(), "owners.nxs").unwrap();
        let file = File::open(&path).unwrap();
        assert!(file.group("entry/ghost").is_err());
        assert_eq!(
            read_string_attr(&file.group("entry/user1").unwrap(), "role"),
            "pi"
        );
    }

    #[test]
    fn test_variadic_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set("/ENTRY[entry]/USER[user1]/name", "Ada").unwrap();
        t.set("/ENTRY[entry]/USER[user2]/name", "Grace").unwrap();
        t.set("/ENTRY[entry]/NOTE[log]/text", "x").unwrap();
        t.set("/ENTRY[entry]/extra/text", "y").unwrap();
        let path = write_to(&t, dir.path(), "users.nxs").unwrap();
        let file = File::open(&path).unwrap();
        for (user, name) in [("user1", "Ada"), ("user2", "Grace")] {
            let group = file.group(&format!("entry/{user}")).unwrap();
            assert_eq!(read_string_attr(&group, NX_CLASS), "NXuser");
            assert_eq!(read_string(&group.dataset("name").unwrap()), name);
        }
        assert_eq!(
            read_string_attr(&file.group("entry/log").unwrap(), NX_CLASS),
            "NXnote"
        );
        assert_eq!(
            read_string_attr(&file.group("entry/extra").unwrap(), NX_CLASS),
            FALLBACK_CLASS
        );
    }

    #[test]
    fn test_compressed_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        let data = Array2::<f32>::from_shape_fn((100, 100), |(i, j)| (i * 100 + j) as f32);
        t.set(
            "/ENTRY[entry]/data",
            Compressed::new(data.clone()).with_strength(5),
        )
        .unwrap();
        let path = write_to(&t, dir.path(), "compressed.nxs").unwrap();
        let file = File::open(&path).unwrap();
        let dataset = file.dataset("entry/data").unwrap();
        let chunk = dataset.chunk().unwrap();
        assert!(chunk.iter().product::<usize>() * 4 <= DEFAULT_CHUNK_TARGET_BYTES);
        assert!(dataset.filters().contains(&Filter::Deflate(5)));
        assert_eq!(
            dataset.read_2d::<f32>().unwrap(),
            data
        );
    }

    #[test]
    fn test_invalid_compression() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set(
            "/ENTRY[entry]/data",
            Compressed::new(vec![1.0f64, 2.0]).with_strength(12),
        )
        .unwrap();
        assert!(matches!(
            write_to(&t, dir.path(), "bad.nxs"),
            Err(WriterError::InvalidStrength(_, 12))
        ));
        t.set(
            "/ENTRY[entry]/data",
            Compressed::new(vec![1.0f64, 2.0]).with_filter("lz4"),
        )
        .unwrap();
        assert!(matches!(
            write_to(&t, dir.path(), "bad.nxs"),
            Err(WriterError::UnknownFilter(_, _))
        ));
        assert!(!dir.path().join("bad.nxs").exists());
    }

    #[test]
    fn test_virtual_link() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set("/ENTRY[entry]/a", Array2::<f64>::zeros((2, 3))).unwrap();
        t.set("/ENTRY[entry]/b", Array2::<f64>::ones((4, 3))).unwrap();
        t.set_path(
            "/ENTRY[entry]/all".parse().unwrap(),
            Value::VirtualLink(vec![
                LinkTarget::Internal(String::from("/entry/a")),
                LinkTarget::Internal(String::from("/entry/b")),
            ]),
        )
        .unwrap();
        let path = write_to(&t, dir.path(), "virtual.nxs").unwrap();
        let file = File::open(&path).unwrap();
        let all = file.dataset("entry/all").unwrap();
        assert_eq!(all.shape(), vec![6, 3]);
        let values = all.read_2d::<f64>().unwrap();
        assert_eq!(values[[0, 0]], 0.0);
        assert_eq!(values[[5, 2]], 1.0);
    }

    #[test]
    fn test_duplicate_and_parent_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set("/ENTRY[entry]/DATA[x]", 1i64).unwrap();
        t.set("/ENTRY[entry]/x", 2i64).unwrap();
        assert!(matches!(
            write_to(&t, dir.path(), "dup.nxs"),
            Err(WriterError::DuplicatePath(_))
        ));

        let mut t = template();
        t.set("/ENTRY[entry]/definition/inner", 1i64).unwrap();
        assert!(matches!(
            write_to(&t, dir.path(), "parent.nxs"),
            Err(WriterError::ParentNotGroup(_))
        ));

        let mut t = template();
        t.set_path(
            "/ENTRY[entry]/@default".parse().unwrap(),
            Value::Compressed(Compressed::new(vec![1u8])),
        )
        .unwrap();
        assert!(matches!(
            write_to(&t, dir.path(), "attr.nxs"),
            Err(WriterError::UnsupportedAttributeValue(_))
        ));
    }

    #[test]
    fn test_cancel_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("cancelled.nxs");
        let result = write(
            &template(),
            &destination,
            &WriteOptions::default(),
            &AtomicBool::new(true),
        );
        assert!(matches!(result, Err(WriterError::Cancelled)));
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_datasets_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = template();
        t.set("/ENTRY[entry]/axis", Array1::linspace(0.0f64, 1.0, 11))
            .unwrap();
        t.set(
            "/ENTRY[entry]/image",
            Compressed::new(Array2::<u16>::from_elem((64, 32), 7)),
        )
        .unwrap();
        let first = File::open(write_to(&t, dir.path(), "one.nxs").unwrap()).unwrap();
        let second = File::open(write_to(&t, dir.path(), "two.nxs").unwrap()).unwrap();
        for name in ["entry/definition", "entry/axis", "entry/image"] {
            let a = first.dataset(name).unwrap();
            let b = second.dataset(name).unwrap();
            assert_eq!(a.shape(), b.shape());
            assert_eq!(a.chunk(), b.chunk());
            assert_eq!(a.storage_size(), b.storage_size());
        }
        assert_eq!(
            first.dataset("entry/axis").unwrap().read_raw::<f64>().unwrap(),
            second.dataset("entry/axis").unwrap().read_raw::<f64>().unwrap()
        );
    }
}
