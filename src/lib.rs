//! Repack a Python wheel so that its source files are replaced by their
//! compiled bytecode equivalents.
//!
//! The conversion preserves archive integrity: file permission bits survive
//! the round trip, the RECORD manifest is rewritten to match the compiled
//! members, and the version metadata and dist-info directory gain a
//! `.compiled` marker that is also reflected in the output filename. The
//! result is consumable by the same installers that consume ordinary wheels.
//!
//! ```no_run
//! use std::path::Path;
//!
//! let output = wheelbake::convert_wheel(Path::new("demo-1.0.0-py3-none-any.whl"), None)?;
//! println!("{}", output.display());
//! # Ok::<(), wheelbake::Error>(())
//! ```

pub mod archive;
pub mod classify;
pub mod compile;
mod convert;
mod errors;
pub mod metadata;
pub mod record;
mod util;

pub use crate::classify::{Classifier, ContentSniffer, FileKind, MagicSniffer, Signature};
pub use crate::compile::{compile_one, Compiler, PyCompile};
pub use crate::convert::{convert_wheel, Converter};
pub use crate::errors::{Error, Result};
pub use crate::metadata::COMPILED_TAG;
pub use crate::record::{rewrite_record, RecordOptions};
