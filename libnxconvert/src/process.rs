use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;

use super::compiler::compile;
use super::config::Config;
use super::definitions::DefinitionSource;
use super::error::{ConvertError, SchemaError};
use super::generator::build_template;
use super::hdf_writer;
use super::path::{Segment, TemplatePath};
use super::reader::{read_into, ReaderRegistry};
use super::schema::SchemaTree;
use super::template::Template;
use super::validator::{validate, Diagnostic, ValidationReport};
use super::value::Value;
use super::worker_status::{ConversionStatus, Stage};

const DEFINITION_FIELD: &str = "definition";
const VERSION_ATTRIBUTE: &str = "version";

/// What a finished conversion produced
#[derive(Debug, Clone, Default)]
pub struct ConversionSummary {
    pub definition: String,
    pub output_path: PathBuf,
    pub bytes_written: u64,
    /// Number of paths holding a value when the file was written
    pub populated: usize,
    /// Validation warnings, including errors downgraded by skip_verify
    pub warnings: Vec<Diagnostic>,
}

/// Compile an application definition, expanding base classes from the same source
pub fn load_schema(nxdl: &str, definitions: &dyn DefinitionSource) -> Result<SchemaTree, SchemaError> {
    let source = definitions
        .definition(nxdl)?
        .ok_or_else(|| SchemaError::DefinitionNotFound(nxdl.to_string(), definitions.location()))?;
    compile(&source, definitions)
}

/// The empty template of an application definition, as handed to readers
pub fn generate_template(
    nxdl: &str,
    definitions: &dyn DefinitionSource,
) -> Result<Template, SchemaError> {
    let tree = load_schema(nxdl, definitions)?;
    Ok(build_template(&tree))
}

/// Give every populated `definition` field a `@version` attribute carrying the
/// version of the schema, unless the reader already set one.
fn stamp_version(template: &mut Template, tree: &SchemaTree) {
    let Some(version) = tree.version.as_deref() else {
        return;
    };
    let targets: Vec<TemplatePath> = template
        .populated()
        .filter(|(path, _)| matches!(path.last(), Some(Segment::Named(n)) if n == DEFINITION_FIELD))
        .map(|(path, _)| path.join(Segment::Attribute(VERSION_ATTRIBUTE.to_string())))
        .filter(|version_path| !template.is_set(version_path))
        .collect();
    for path in targets {
        log::debug!("Stamping {} = {}", path, version);
        // Paths derived from a populated, substituted path cannot hold a wildcard
        if let Err(e) = template.set_path(path, Value::from(version)) {
            log::warn!("Could not stamp the definition version: {e}");
        }
    }
}

/// One run of the conversion state machine
///
/// NEW -> COMPILED -> TEMPLATED -> POPULATED -> VALIDATED -> WRITTEN -> DONE; a
/// failure in any stage moves to FAILED and leaves no output file behind.
pub struct Conversion<'a> {
    config: &'a Config,
    registry: &'a ReaderRegistry,
    definitions: &'a dyn DefinitionSource,
    tx: Option<Sender<ConversionStatus>>,
    stage: Stage,
}

impl<'a> Conversion<'a> {
    pub fn new(
        config: &'a Config,
        registry: &'a ReaderRegistry,
        definitions: &'a dyn DefinitionSource,
    ) -> Self {
        Self {
            config,
            registry,
            definitions,
            tx: None,
            stage: Stage::New,
        }
    }

    /// Report each stage transition on a channel
    pub fn with_status(mut self, tx: Sender<ConversionStatus>) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Send the stage to the status channel; a closed channel does not fail the run
    fn report(&self, stage: Stage) {
        if let Some(tx) = &self.tx {
            if tx.send(ConversionStatus::new(stage)).is_err() {
                log::debug!("Status receiver is gone");
            }
        }
    }

    fn advance(&mut self, stage: Stage) {
        log::info!("{} -> {}", self.stage, stage);
        self.stage = stage;
        self.report(stage);
    }

    /// Run the conversion to completion
    pub fn run(
        &mut self,
        cancel: &AtomicBool,
        objects: Option<&[Box<dyn Any>]>,
    ) -> Result<ConversionSummary, ConvertError> {
        match self.execute(cancel, objects) {
            Ok(summary) => {
                self.advance(Stage::Done);
                Ok(summary)
            }
            Err(e) => {
                log::error!("Conversion failed in stage {}: {}", self.stage, e);
                self.stage = Stage::Failed;
                self.report(Stage::Failed);
                Err(e)
            }
        }
    }

    /// Validate, returning the warnings to keep or the failed report
    fn check(&self, template: &Template, tree: &SchemaTree) -> Result<Vec<Diagnostic>, ConvertError> {
        if !self.config.validate {
            log::warn!(
                "Validation was skipped; the output may not conform to {}",
                tree.name
            );
            return Ok(Vec::new());
        }
        let report = validate(template, tree, &self.config.validation_options());
        if report.is_ok() {
            report.log();
            return Ok(report.warnings);
        }
        if !self.config.skip_verify {
            report.log();
            return Err(ConvertError::ValidationError(report));
        }
        log::warn!(
            "Writing despite {} validation error(s)",
            report.errors.len()
        );
        let downgraded = ValidationReport {
            errors: Vec::new(),
            warnings: report.into_warnings(),
        };
        downgraded.log();
        Ok(downgraded.warnings)
    }

    fn execute(
        &mut self,
        cancel: &AtomicBool,
        objects: Option<&[Box<dyn Any>]>,
    ) -> Result<ConversionSummary, ConvertError> {
        let config = self.config;
        config.check()?;
        let reader = self.registry.reader_for(&config.reader, &config.nxdl)?;

        let tree = load_schema(&config.nxdl, self.definitions)?;
        self.advance(Stage::Compiled);

        let template = build_template(&tree);
        log::info!(
            "Template for {} has {} path(s)",
            tree.name,
            template.len()
        );
        self.advance(Stage::Templated);

        let mut template = read_into(reader, template, &config.input_paths, objects)?;
        self.advance(Stage::Populated);

        let warnings = self.check(&template, &tree)?;
        self.advance(Stage::Validated);

        stamp_version(&mut template, &tree);
        let bytes_written = hdf_writer::write(
            &template,
            &config.output_path,
            &config.write_options(),
            cancel,
        )?;
        self.advance(Stage::Written);

        Ok(ConversionSummary {
            definition: tree.name.clone(),
            output_path: config.output_path.clone(),
            bytes_written,
            populated: template.populated().count(),
            warnings,
        })
    }
}

/// Run one conversion described by a configuration, using the built-in readers and
/// the configured definitions store.
pub fn convert(
    config: &Config,
    objects: Option<&[Box<dyn Any>]>,
) -> Result<ConversionSummary, ConvertError> {
    let store = config.definition_store()?;
    let registry = ReaderRegistry::with_builtin_readers();
    Conversion::new(config, &registry, &store).run(&AtomicBool::new(false), objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReaderError, WriterError};
    use crate::reader::Reader;
    use crate::validator::DiagnosticKind;
    use crate::value::{Compressed, LinkTarget};
    use fxhash::FxHashMap;
    use hdf5::filters::Filter;
    use hdf5::types::VarLenUnicode;
    use hdf5::File;
    use ndarray::Array2;
    use std::path::Path;
    use std::sync::mpsc::channel;

    const NXMINIMAL: &str = r#"<definition name="NXminimal" version="1.2">
  <group type="NXentry">
    <field name="definition"/>
    <field name="energy" type="NX_FLOAT" units="NX_ENERGY" optional="true"/>
    <field name="data" type="NX_NUMBER" optional="true"/>
    <group type="NXuser" minOccurs="0" maxOccurs="unbounded">
      <field name="name"/>
    </group>
  </group>
</definition>"#;

    /// A reader which fills the template through a plain function
    struct FnReader(fn(&mut Template));

    impl Reader for FnReader {
        fn name(&self) -> &str {
            "fn"
        }

        fn supported_nxdls(&self) -> &[&str] {
            &["NXminimal"]
        }

        fn read(
            &self,
            mut template: Template,
            _file_paths: &[PathBuf],
            _objects: Option<&[Box<dyn Any>]>,
        ) -> Result<Template, ReaderError> {
            (self.0)(&mut template);
            Ok(template)
        }
    }

    fn definitions() -> FxHashMap<String, String> {
        let mut map = FxHashMap::default();
        map.insert(String::from("NXminimal"), String::from(NXMINIMAL));
        map
    }

    fn config(dir: &Path) -> Config {
        Config {
            nxdl: String::from("NXminimal"),
            reader: String::from("fn"),
            output_path: dir.join("out.nxs"),
            ..Default::default()
        }
    }

    fn run_with(config: &Config, fill: fn(&mut Template)) -> Result<ConversionSummary, ConvertError> {
        let mut registry = ReaderRegistry::with_builtin_readers();
        registry.register(Box::new(FnReader(fill)));
        let definitions = definitions();
        Conversion::new(config, &registry, &definitions).run(&AtomicBool::new(false), None)
    }

    fn set_definition(t: &mut Template) {
        t.set("/ENTRY[entry]/definition", "NXtest").unwrap();
    }

    fn read_string_attr(location: &hdf5::Location, name: &str) -> String {
        location
            .attr(name)
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap()
            .as_str()
            .to_string()
    }

    #[test]
    fn test_minimal_entry() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let summary = run_with(&config, set_definition).unwrap();
        assert_eq!(summary.definition, "NXminimal");
        assert!(summary.bytes_written > 0);

        let file = File::open(&config.output_path).unwrap();
        let entry = file.group("entry").unwrap();
        assert_eq!(read_string_attr(&entry, "NX_class"), "NXentry");
        let definition = entry.dataset("definition").unwrap();
        assert_eq!(
            definition.read_scalar::<VarLenUnicode>().unwrap().as_str(),
            "NXtest"
        );
        assert_eq!(read_string_attr(&definition, "version"), "1.2");
    }

    #[test]
    fn test_missing_required_field() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let result = run_with(&config, |_| ());
        let Err(error) = result else {
            panic!("conversion should fail");
        };
        assert_eq!(error.exit_code(), 2);
        let ConvertError::ValidationError(report) = &error else {
            panic!("expected a validation error, got {error}");
        };
        assert_eq!(report.errors[0].kind, DiagnosticKind::MissingRequired);
        assert!(error.to_string().contains("/ENTRY[entry]/definition"));
        assert!(!config.output_path.exists());
    }

    #[test]
    fn test_unit_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let result = run_with(&config, |t| {
            set_definition(t);
            t.set("/ENTRY[entry]/energy", 1.2).unwrap();
            t.set("/ENTRY[entry]/energy/@units", "meter").unwrap();
        });
        let Err(error) = result else {
            panic!("conversion should fail");
        };
        assert_eq!(error.exit_code(), 2);
        let message = error.to_string();
        assert!(message.contains("NX_ENERGY"), "{message}");
        assert!(message.contains("[length]"), "{message}");
    }

    #[test]
    fn test_skip_verify_writes_anyway() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            skip_verify: true,
            ..config(dir.path())
        };
        let summary = run_with(&config, |t| {
            set_definition(t);
            t.set("/ENTRY[entry]/energy", 1.2).unwrap();
            t.set("/ENTRY[entry]/energy/@units", "meter").unwrap();
        })
        .unwrap();
        assert!(config.output_path.exists());
        assert!(summary
            .warnings
            .iter()
            .any(|w| w.kind == DiagnosticKind::UnitMismatch));
    }

    #[test]
    fn test_no_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            validate: false,
            ..config(dir.path())
        };
        run_with(&config, |t| {
            t.set("/ENTRY[entry]/title", "no definition").unwrap();
        })
        .unwrap();
        assert!(config.output_path.exists());
    }

    #[test]
    fn test_internal_link() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        run_with(&config, |t| {
            set_definition(t);
            t.set(
                "/ENTRY[entry]/link",
                LinkTarget::Internal(String::from("/entry/definition")),
            )
            .unwrap();
        })
        .unwrap();
        let file = File::open(&config.output_path).unwrap();
        let linked = file.dataset("entry/link").unwrap();
        assert_eq!(
            linked.read_scalar::<VarLenUnicode>().unwrap().as_str(),
            "NXtest"
        );
    }

    #[test]
    fn test_variadic_instances() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        run_with(&config, |t| {
            set_definition(t);
            let variadic: TemplatePath = "/ENTRY[entry]/USER[user*]/name".parse().unwrap();
            for (index, name) in [(1, "Ada"), (2, "Grace")] {
                t.set_path(variadic.substitute(&[index]).unwrap(), Value::from(name))
                    .unwrap();
            }
        })
        .unwrap();
        let file = File::open(&config.output_path).unwrap();
        for user in ["user1", "user2"] {
            let group = file.group(&format!("entry/{user}")).unwrap();
            assert_eq!(read_string_attr(&group, "NX_class"), "NXuser");
            assert!(group.dataset("name").is_ok());
        }
    }

    #[test]
    fn test_compressed_payload() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        run_with(&config, |t| {
            set_definition(t);
            let data = Array2::<f32>::from_elem((100, 100), 0.5);
            t.set("/ENTRY[entry]/data", Compressed::new(data).with_strength(5))
                .unwrap();
        })
        .unwrap();
        let file = File::open(&config.output_path).unwrap();
        let data = file.dataset("entry/data").unwrap();
        let chunk = data.chunk().unwrap();
        assert!(chunk.iter().product::<usize>() * 4 <= 1024 * 1024);
        assert!(data.filters().contains(&Filter::Deflate(5)));
    }

    #[test]
    fn test_yaml_reader_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let eln = dir.path().join("eln.yaml");
        std::fs::write(
            &eln,
            "/ENTRY[entry]:\n  definition: NXminimal\n  energy: {value: 3.5, unit: keV}\n",
        )
        .unwrap();
        let config = Config {
            reader: String::from("yaml"),
            input_paths: vec![eln],
            ..config(dir.path())
        };
        let registry = ReaderRegistry::with_builtin_readers();
        let definitions = definitions();
        let (tx, rx) = channel();
        let summary = Conversion::new(&config, &registry, &definitions)
            .with_status(tx)
            .run(&AtomicBool::new(false), None)
            .unwrap();
        assert_eq!(summary.populated, 4);
        let stages: Vec<Stage> = rx.try_iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Compiled,
                Stage::Templated,
                Stage::Populated,
                Stage::Validated,
                Stage::Written,
                Stage::Done
            ]
        );
        let file = File::open(&config.output_path).unwrap();
        let energy = file.dataset("entry/energy").unwrap();
        assert_eq!(read_string_attr(&energy, "units"), "keV");
    }

    #[test]
    fn test_closed_status_channel() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut registry = ReaderRegistry::new();
        registry.register(Box::new(FnReader(set_definition)));
        let definitions = definitions();
        let (tx, rx) = channel();
        drop(rx);
        let mut conversion = Conversion::new(&config, &registry, &definitions).with_status(tx);
        conversion.run(&AtomicBool::new(false), None).unwrap();
        assert_eq!(conversion.stage(), Stage::Done);
        assert!(config.output_path.exists());
    }

    #[test]
    fn test_in_memory_objects() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            reader: String::from("yaml"),
            ..config(dir.path())
        };
        let document: serde_yaml::Value =
            serde_yaml::from_str("/ENTRY[entry]/definition: NXminimal").unwrap();
        let objects: Vec<Box<dyn Any>> = vec![Box::new(document)];
        let registry = ReaderRegistry::with_builtin_readers();
        let definitions = definitions();
        Conversion::new(&config, &registry, &definitions)
            .run(&AtomicBool::new(false), Some(objects.as_slice()))
            .unwrap();
        assert!(config.output_path.exists());
    }

    #[test]
    fn test_failure_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let unknown_reader = Config {
            reader: String::from("bogus"),
            ..config(dir.path())
        };
        assert_eq!(
            run_with(&unknown_reader, set_definition).unwrap_err().exit_code(),
            5
        );

        let unknown_definition = Config {
            nxdl: String::from("NXmissing"),
            reader: String::from("yaml"),
            ..config(dir.path())
        };
        assert_eq!(
            run_with(&unknown_definition, set_definition)
                .unwrap_err()
                .exit_code(),
            4
        );

        let no_inputs = Config {
            reader: String::from("yaml"),
            ..config(dir.path())
        };
        assert_eq!(
            run_with(&no_inputs, set_definition).unwrap_err().exit_code(),
            1
        );
    }

    #[test]
    fn test_cancelled_write() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut registry = ReaderRegistry::new();
        registry.register(Box::new(FnReader(set_definition)));
        let definitions = definitions();
        let mut conversion = Conversion::new(&config, &registry, &definitions);
        let error = conversion
            .run(&AtomicBool::new(true), None)
            .unwrap_err();
        assert!(matches!(
            error,
            ConvertError::WriterError(WriterError::Cancelled)
        ));
        assert_eq!(error.exit_code(), 3);
        assert_eq!(conversion.stage(), Stage::Failed);
        assert!(!config.output_path.exists());
    }

    #[test]
    fn test_generate_template() {
        let template = generate_template("NXminimal", &definitions()).unwrap();
        assert_eq!(template.definition(), "NXminimal");
        assert_eq!(template.version(), Some("1.2"));
        assert!(template
            .entry(&"/ENTRY[entry]/definition".parse().unwrap())
            .is_some());
        assert!(matches!(
            generate_template("NXnothing", &definitions()),
            Err(SchemaError::DefinitionNotFound(..))
        ));
    }
}
