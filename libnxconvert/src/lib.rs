//! # nxconvert
//!
//! nxconvert converts experimental data into NeXus files. It reads a NeXus application
//! definition (an NXDL file), flattens it into a template of paths, lets a reader fill
//! the template from technique specific inputs and an electronic lab notebook (ELN),
//! checks the result against the definition, and writes a single HDF5 file.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building and running nxconvert, HDF5 (1.10 or newer) must be installed.
//! Typically this will be installed using a package manager (homebrew, apt, etc), and the
//! Rust libraries will auto detect the location of the HDF install. If HDF5 lives in a
//! custom location, write the following snippet into the file `.cargo/config.toml` in the
//! repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the command line converter use
//! `cargo install --path ./nxconvert_cli` from the top level of the repository. The binary
//! is called `nxconvert`.
//!
//! ## NeXus definitions
//!
//! Application definitions and base classes are looked up by name beneath a checkout of
//! the NeXus definitions repository (in its `applications`, `contributed_definitions` and
//! `base_classes` directories). Point the `NEXUS_DEF_PATH` environment variable, or the
//! `definitions_path` configuration field, at that checkout. A definition may also be
//! given as a path to an `.nxdl.xml` file.
//!
//! ## Configuration
//!
//! A conversion is described by a YAML configuration, which the command line can write
//! out with `nxconvert new <path>`:
//!
//! ```yml
//! nxdl: NXmpes
//! reader: yaml
//! input_paths:
//! - eln_data.yaml
//! output_path: output.nxs
//! definitions_path: null
//! validate: true
//! skip_verify: false
//! fair: false
//! chunk_target_bytes: 1048576
//! compression_strength: 9
//! ```
//!
//! Command line flags override the values of a configuration file.
//!
//! ## Templates
//!
//! Every path of a template names where a value goes in the output file:
//!
//! ```text
//! /ENTRY[entry]/definition            -> dataset /entry/definition
//! /ENTRY[entry]/USER[user1]/name      -> dataset /entry/user1/name
//! /ENTRY[entry]/energy/@units         -> attribute units of /entry/energy
//! ```
//!
//! `CLASS[name]` selects the group class `NXclass` and names the instance `name`. Groups
//! which may repeat appear with a `*` wildcard (`USER[user*]`) until a reader substitutes
//! an index. Paths are sorted into the `required`, `recommended` and `optional`
//! partitions, plus `lone_groups`: required groups which need at least one populated
//! descendant. `nxconvert --nxdl NXmpes --generate-template` prints the template of a
//! definition as YAML, which is a good starting point for an ELN file.
//!
//! ## ELN files
//!
//! The built-in `yaml` reader accepts template paths as keys, flat or nested:
//!
//! ```yaml
//! /ENTRY[entry]:
//!   definition: NXmpes
//!   energy: {value: 1.2, unit: eV}
//!   link_to_data: {link: /entry/data}
//!   data: {compress: [[1, 2], [3, 4]], strength: 5}
//! ```
//!
//! ## Output
//!
//! Each group carries an `NX_class` attribute, units are stored as a `units` string
//! attribute next to their datum, and the root carries `NX_class="NXroot"`, `creator`,
//! `file_name`, `file_time` and `HDF5_Version`. The file is assembled under a temporary
//! name and only moved into place when complete.
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |---|---|
//! | 0 | Success |
//! | 1 | Reader failure |
//! | 2 | Validation failure |
//! | 3 | I/O failure |
//! | 4 | Schema compile failure |
//! | 5 | Misuse |
pub mod compiler;
pub mod config;
pub mod definitions;
pub mod error;
pub mod generator;
pub mod hdf_writer;
pub mod path;
pub mod process;
pub mod reader;
pub mod schema;
pub mod template;
pub mod units;
pub mod validator;
pub mod value;
pub mod worker_status;
pub mod yaml_reader;
