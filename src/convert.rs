//! End-to-end wheel conversion.
//!
//! Unpacks the wheel into a staging directory next to it, compiles every
//! member that classifies as source, rewrites the RECORD, bumps the version
//! metadata, and repacks under a `.compiled`-tagged filename. The staging
//! directory is removed on every exit path.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use fs_err as fs;
use glob::Pattern;
use path_slash::PathExt as _;
use tracing::debug;

use crate::archive::{self, collect_files};
use crate::classify::{Classifier, FileKind};
use crate::compile::{compile_one, Compiler, PyCompile};
use crate::errors::{Error, Result};
use crate::metadata::{update_version, COMPILED_TAG};
use crate::record::{retarget_prefix, rewrite_record, RecordOptions};

const WHEEL_SUFFIX: &str = "whl";
const DIST_INFO_SUFFIX: &str = ".dist-info";

/// Drives the conversion pipeline. Configured once, then applied to wheels
/// via [`convert`](Converter::convert).
pub struct Converter {
    classifier: Classifier,
    compiler: Box<dyn Compiler>,
    record_options: RecordOptions,
    exclude: Option<Pattern>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(Box::<PyCompile>::default())
    }
}

impl Converter {
    pub fn new(compiler: Box<dyn Compiler>) -> Self {
        Self {
            classifier: Classifier::with_content_sniffer(),
            compiler,
            record_options: RecordOptions::default(),
            exclude: None,
        }
    }

    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Glob matched against member paths relative to the archive root;
    /// matching members are carried through uncompiled under their original
    /// manifest identity.
    pub fn exclude(mut self, pattern: Pattern) -> Self {
        self.exclude = Some(pattern);
        self
    }

    pub fn record_options(mut self, options: RecordOptions) -> Self {
        self.record_options = options;
        self
    }

    /// Convert `wheel` into a bytecode-only wheel next to it and return the
    /// output path.
    pub fn convert(&self, wheel: &Path) -> Result<PathBuf> {
        if wheel.extension().and_then(OsStr::to_str) != Some(WHEEL_SUFFIX) {
            return Err(Error::NotAWheel(wheel.to_path_buf()));
        }
        let out_path = output_path(wheel)?;

        // A stale staging directory from a previous failed run is removed
        // unconditionally; conversion is not crash-safe across runs and
        // relies on this for idempotent retries.
        let staging_path = wheel.with_extension("");
        if staging_path.exists() {
            debug!("removing stale staging dir {}", staging_path.display());
            fs::remove_dir_all(&staging_path)?;
        }
        let staging = StagingDir::new(staging_path);

        archive::extract(wheel, staging.path())?;
        self.compile_tree(staging.path())?;

        let dist_info = find_dist_info(staging.path())?;
        rewrite_record(
            &dist_info.join("RECORD"),
            staging.path(),
            self.exclude.as_ref(),
            &self.classifier,
            &self.record_options,
        )?;

        let old_name = dir_name(&dist_info)?.to_string();
        let renamed = update_version(&dist_info)?;
        let new_name = dir_name(&renamed)?.to_string();
        // The RECORD was written under the pre-rename directory name; point
        // its rows at the renamed one so the manifest path set matches the
        // archive members.
        retarget_prefix(&renamed.join("RECORD"), &old_name, &new_name)?;

        if out_path.exists() {
            fs::remove_file(&out_path)?;
        }
        archive::create(staging.path(), &out_path)?;
        staging.close()?;
        Ok(out_path)
    }

    fn compile_tree(&self, root: &Path) -> Result<()> {
        let mut files = Vec::new();
        collect_files(root, &mut files)?;
        files.sort();

        for path in &files {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_slash_lossy()
                .into_owned();
            if self
                .exclude
                .as_ref()
                .is_some_and(|pattern| pattern.matches(&rel))
            {
                eprintln!("Skipping file: {rel}");
                continue;
            }
            match self.classifier.classify(path)? {
                FileKind::Source => {
                    eprintln!("Compiling file: {rel}");
                    compile_one(self.compiler.as_ref(), &self.classifier, path)?;
                }
                kind => debug!("leaving {rel} alone ({kind:?})"),
            }
        }
        Ok(())
    }
}

/// Convert `wheel` with the default configuration: content-based
/// classification and the CPython `py_compile` backend.
pub fn convert_wheel(wheel: &Path, exclude: Option<&str>) -> Result<PathBuf> {
    let mut converter = Converter::default();
    if let Some(pattern) = exclude {
        converter = converter.exclude(Pattern::new(pattern)?);
    }
    converter.convert(wheel)
}

/// Staging directory removed when dropped, so no exit path leaves an
/// orphaned tree behind.
struct StagingDir {
    path: PathBuf,
    defused: bool,
}

impl StagingDir {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            defused: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn close(mut self) -> Result<()> {
        self.defused = true;
        fs::remove_dir_all(&self.path)?;
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.defused {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Output filename: the distribution-version segment of the wheel name
/// gains the compiled marker.
fn output_path(wheel: &Path) -> Result<PathBuf> {
    let stem = wheel
        .file_stem()
        .and_then(OsStr::to_str)
        .ok_or_else(|| Error::NotAWheel(wheel.to_path_buf()))?;
    let mut segments: Vec<String> = stem.split('-').map(String::from).collect();
    if segments.len() < 2 {
        return Err(Error::NotAWheel(wheel.to_path_buf()));
    }
    segments[1].push_str(COMPILED_TAG);
    Ok(wheel.with_file_name(format!("{}.{WHEEL_SUFFIX}", segments.join("-"))))
}

/// The one dist-info directory of an unpacked wheel.
fn find_dist_info(root: &Path) -> Result<PathBuf> {
    let mut found = None;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(DIST_INFO_SUFFIX) {
            if found.is_some() {
                return Err(Error::DistInfoLayout(root.to_path_buf()));
            }
            found = Some(entry.path());
        }
    }
    found.ok_or_else(|| Error::DistInfoLayout(root.to_path_buf()))
}

fn dir_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| Error::DistInfoLayout(path.to_path_buf()))
}
