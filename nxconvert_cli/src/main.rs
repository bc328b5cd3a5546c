use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::channel;

use libnxconvert::config::Config;
use libnxconvert::error::{ConfigError, ConvertError};
use libnxconvert::process::{generate_template, Conversion, ConversionSummary};
use libnxconvert::reader::{ReaderRegistry, ANY_NXDL};

const EXIT_MISUSE: u8 = 5;
const EXIT_IO: u8 = 3;

fn cli() -> Command {
    Command::new("nxconvert")
        .about("Convert experimental data and ELN metadata into NeXus HDF5 files")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("new")
                .about("Make a template configuration yaml file")
                .arg(Arg::new("path").required(true).value_parser(value_parser!(PathBuf))),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file; flags override its values"),
        )
        .arg(
            Arg::new("nxdl")
                .short('n')
                .long("nxdl")
                .help("Application definition, by name or as a path to an .nxdl.xml file"),
        )
        .arg(
            Arg::new("reader")
                .short('r')
                .long("reader")
                .help("Name of the reader which fills the template"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Input file handed to the reader; may be repeated"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Path of the NeXus file to write"),
        )
        .arg(
            Arg::new("definitions")
                .short('d')
                .long("definitions")
                .value_parser(value_parser!(PathBuf))
                .help("Root of the NeXus definitions; defaults to NEXUS_DEF_PATH"),
        )
        .arg(
            Arg::new("no-validate")
                .long("no-validate")
                .action(ArgAction::SetTrue)
                .help("Write the file without validating it"),
        )
        .arg(
            Arg::new("skip-verify")
                .long("skip-verify")
                .action(ArgAction::SetTrue)
                .help("Report validation errors as warnings and write anyway"),
        )
        .arg(
            Arg::new("fair")
                .long("fair")
                .action(ArgAction::SetTrue)
                .help("Treat missing recommended fields as errors"),
        )
        .arg(
            Arg::new("generate-template")
                .long("generate-template")
                .action(ArgAction::SetTrue)
                .help("Print the template of the application definition as YAML and exit"),
        )
        .arg(
            Arg::new("list-readers")
                .long("list-readers")
                .action(ArgAction::SetTrue)
                .help("List the available readers and exit"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("More output; repeat for trace logging"),
        )
}

/// Start from the configuration file, if any, and apply the flags on top
fn build_config(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            log::info!("Loading config from {}...", path.display());
            Config::read_config_file(path)?
        }
        None => Config::default(),
    };
    if let Some(nxdl) = matches.get_one::<String>("nxdl") {
        config.nxdl = nxdl.clone();
    }
    if let Some(reader) = matches.get_one::<String>("reader") {
        config.reader = reader.clone();
    }
    if let Some(inputs) = matches.get_many::<PathBuf>("input") {
        config.input_paths = inputs.cloned().collect();
    }
    if let Some(output) = matches.get_one::<PathBuf>("output") {
        config.output_path = output.clone();
    }
    if let Some(definitions) = matches.get_one::<PathBuf>("definitions") {
        config.definitions_path = Some(definitions.clone());
    }
    if matches.get_flag("no-validate") {
        config.validate = false;
    }
    if matches.get_flag("skip-verify") {
        config.skip_verify = true;
    }
    if matches.get_flag("fair") {
        config.fair = true;
    }
    Ok(config)
}

fn config_exit_code(error: &ConfigError) -> ExitCode {
    match error {
        ConfigError::IOError(_) => ExitCode::from(EXIT_IO),
        _ => ExitCode::from(EXIT_MISUSE),
    }
}

fn make_template_config(path: &Path) -> ExitCode {
    log::info!("Making a template config at {}...", path.display());
    match Config::default().write_config_file(path) {
        Ok(()) => {
            log::info!("Done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            config_exit_code(&e)
        }
    }
}

fn list_readers() -> ExitCode {
    for (name, nxdls) in ReaderRegistry::with_builtin_readers().names() {
        let supported = if nxdls.iter().any(|n| n == ANY_NXDL) {
            String::from("any application definition")
        } else {
            nxdls.join(", ")
        };
        println!("{name}: {supported}");
    }
    ExitCode::SUCCESS
}

fn print_template(config: &Config) -> ExitCode {
    if config.nxdl.is_empty() {
        log::error!("{}", ConfigError::MissingValue("nxdl"));
        return ExitCode::from(EXIT_MISUSE);
    }
    let skeleton = config
        .definition_store()
        .and_then(|store| generate_template(&config.nxdl, &store))
        .map_err(ConvertError::from)
        .and_then(|template| {
            template
                .skeleton()
                .map_err(|e| ConvertError::ConfigError(ConfigError::from(e)))
        });
    match skeleton {
        Ok(yaml) => {
            print!("{yaml}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn report(summary: &ConversionSummary) {
    log::info!(
        "Wrote {} populated paths of {} to {} with {} warning(s)",
        summary.populated,
        summary.definition,
        summary.output_path.display(),
        summary.warnings.len()
    );
}

fn main() -> ExitCode {
    let matches = match cli().try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            // Printing help or the version on request is not a misuse
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_MISUSE),
            };
            let _ = e.print();
            return code;
        }
    };

    // Initialize feedback
    let level = match matches.get_count("verbose") {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let logger = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let pb_manager = MultiProgress::new();
    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
    }
    log::set_max_level(level);

    if let Some(("new", sub)) = matches.subcommand() {
        return match sub.get_one::<PathBuf>("path") {
            Some(path) => make_template_config(path),
            None => ExitCode::from(EXIT_MISUSE),
        };
    }

    if matches.get_flag("list-readers") {
        return list_readers();
    }

    let config = match build_config(&matches) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return config_exit_code(&e);
        }
    };

    if matches.get_flag("generate-template") {
        return print_template(&config);
    }

    if let Err(e) = config.check() {
        log::error!("{e}");
        return config_exit_code(&e);
    }
    log::info!("Application definition: {}", config.nxdl);
    log::info!("Reader: {}", config.reader);
    for input in &config.input_paths {
        log::info!("Input: {}", input.display());
    }
    log::info!("Output: {}", config.output_path.display());

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) = ProgressStyle::with_template("[{bar:40}] {pos:>3}% {msg}") {
        pb.set_style(style);
    }
    let (tx, rx) = channel();
    // Spawn the task!
    let handle = std::thread::spawn(move || -> Result<ConversionSummary, ConvertError> {
        let store = config.definition_store()?;
        let registry = ReaderRegistry::with_builtin_readers();
        Conversion::new(&config, &registry, &store)
            .with_status(tx)
            .run(&AtomicBool::new(false), None)
    });

    // Ends once the worker drops its sender
    for status in rx {
        pb.set_position((status.progress * 100.0) as u64);
        pb.set_message(status.stage.to_string());
    }
    pb.finish();

    match handle.join() {
        Ok(Ok(summary)) => {
            report(&summary);
            log::info!("Done.");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code())
        }
        Err(_) => {
            log::error!("Failed to join conversion task!");
            ExitCode::FAILURE
        }
    }
}
