//! Replaces one source member with its bytecode equivalent.
//!
//! The actual source-to-bytecode translation is an opaque operation behind
//! the [`Compiler`] trait; the default implementation shells out to a CPython
//! interpreter's `py_compile` module. Everything around it (suffix mapping,
//! permission preservation, the extension-less launcher case) lives here.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use fs_err as fs;
use tracing::debug;

use crate::classify::{Classifier, FileKind, BYTECODE_SUFFIX, SOURCE_SUFFIX};
use crate::errors::{Error, Result};

/// Opaque source-to-bytecode compiler.
///
/// `compile` reads `source` and writes the finished bytecode to `dest`,
/// which already exists as an empty scratch file. It must not touch
/// `source` itself.
pub trait Compiler {
    fn compile(&self, source: &Path, dest: &Path) -> Result<()>;
}

/// Default compiler: invokes `py_compile` in a CPython subprocess.
pub struct PyCompile {
    interpreter: PathBuf,
}

impl PyCompile {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for PyCompile {
    fn default() -> Self {
        let interpreter = if cfg!(windows) { "python" } else { "python3" };
        Self::new(interpreter)
    }
}

impl Compiler for PyCompile {
    fn compile(&self, source: &Path, dest: &Path) -> Result<()> {
        let output = Command::new(&self.interpreter)
            .arg("-c")
            .arg("import py_compile, sys; py_compile.compile(sys.argv[1], sys.argv[2], doraise=True)")
            .arg(source)
            .arg(dest)
            .output()
            .map_err(|err| Error::CompileFailed {
                path: source.to_path_buf(),
                detail: format!("failed to run `{}`: {err}", self.interpreter.display()),
            })?;
        if !output.status.success() {
            return Err(Error::CompileFailed {
                path: source.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Maps a source path to the path its bytecode will live at.
///
/// `.py` swaps to `.pyc`. A path without a suffix keeps its name on POSIX
/// (the compiled launcher replaces the script in place) and gains `.exe` on
/// Windows. Any other suffix is a hard error; callers only reach this for
/// members that classified as source.
pub(crate) fn bytecode_path(path: &Path) -> Result<PathBuf> {
    match path.extension().and_then(OsStr::to_str) {
        Some(SOURCE_SUFFIX) => Ok(path.with_extension(BYTECODE_SUFFIX)),
        None => {
            if cfg!(windows) {
                let mut name = path.as_os_str().to_os_string();
                name.push(".exe");
                Ok(PathBuf::from(name))
            } else {
                Ok(path.to_path_buf())
            }
        }
        Some(other) => Err(Error::UnsupportedSuffix {
            path: path.to_path_buf(),
            suffix: other.to_string(),
        }),
    }
}

/// Compile one source file and put the bytecode in its place.
///
/// The output keeps the source file's permission bits, and the source is
/// removed unless the bytecode lands on the same path. The compiler writes
/// into a temporary file in the same directory first, so a failed run never
/// clobbers the source.
pub fn compile_one(
    compiler: &dyn Compiler,
    classifier: &Classifier,
    path: &Path,
) -> Result<PathBuf> {
    if classifier.classify(path)? == FileKind::Bytecode {
        return Err(Error::AlreadyBytecode(path.to_path_buf()));
    }

    let out_path = bytecode_path(path)?;
    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)?.permissions().mode() & 0o777
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let scratch = tempfile::NamedTempFile::new_in(dir)?;
    compiler.compile(path, scratch.path())?;

    let replaces_source = out_path == path;
    scratch
        .persist(&out_path)
        .map_err(|err| Error::Io(err.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
    }

    if replaces_source {
        debug!("compiled {} in place", path.display());
    } else {
        debug!("compiled {} to {}", path.display(), out_path.display());
        fs::remove_file(path)?;
    }
    Ok(out_path)
}
