//! Rewrites the wheel RECORD after compilation.
//!
//! Installers verify every member of a wheel against this manifest, so after
//! swapping `.py` members for `.pyc` the rows have to be recomputed: new
//! relative path, new digest, new byte length. Rows whose file survived the
//! conversion untouched are carried through byte-identical.
//!
//! Format contract (matching `pip` and friends): CSV triples
//! `path,<alg>=<urlsafe-base64-digest-without-padding>,length` with LF line
//! endings, deduplicated and sorted.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use fs_err as fs;
use glob::Pattern;
use path_slash::PathExt as _;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::classify::{Classifier, FileKind};
use crate::compile::bytecode_path;
use crate::errors::{Error, Result};

/// Label written in front of every digest. Tied to the [`Sha256`] hasher in
/// [`hash_file`]; the two change together or not at all.
const HASH_LABEL: &str = "sha256";

/// Tunables of the manifest rewriter, injected instead of living as ambient
/// globals.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    /// Read granularity for the rolling digest.
    pub chunk_size: usize,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self { chunk_size: 1024 }
    }
}

/// One manifest row. All fields stay strings: the manifest's own row has
/// empty digest and length by convention, and ordering is defined over the
/// full textual tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordRow {
    pub path: String,
    pub digest: String,
    pub size: String,
}

impl RecordRow {
    /// Parse one CSV row, honoring double-quoted fields for paths that
    /// contain commas.
    fn parse(line: &str) -> Result<Self> {
        let mut fields = Vec::with_capacity(3);
        let mut field = String::new();
        let mut chars = line.chars().peekable();
        let mut quoted = false;
        while let Some(c) = chars.next() {
            match c {
                '"' if field.is_empty() && !quoted => quoted = true,
                '"' if quoted => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        quoted = false;
                    }
                }
                ',' if !quoted => {
                    fields.push(std::mem::take(&mut field));
                }
                c => field.push(c),
            }
        }
        fields.push(field);
        if fields.len() != 3 {
            return Err(Error::MalformedRecord(line.to_string()));
        }
        let mut fields = fields.into_iter();
        Ok(Self {
            path: fields.next().unwrap(),
            digest: fields.next().unwrap(),
            size: fields.next().unwrap(),
        })
    }

    fn format(&self) -> String {
        format!(
            "{},{},{}",
            quote_field(&self.path),
            quote_field(&self.digest),
            quote_field(&self.size)
        )
    }
}

fn quote_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Streaming digest plus byte length of one file, in fixed-size chunks.
fn hash_file(path: &Path, options: &RecordOptions) -> Result<(String, u64)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut length = 0u64;
    let mut chunk = vec![0u8; options.chunk_size];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        length += n as u64;
    }
    Ok((URL_SAFE_NO_PAD.encode(hasher.finalize()), length))
}

/// Rewrite the manifest at `record_path` against the tree rooted at `root`.
///
/// For each existing row:
/// - the manifest's own row is carried through untouched (it is not
///   re-hashed by convention);
/// - a row whose file still exists with a non-empty suffix and does not
///   classify as source is carried through untouched;
/// - a row matching `exclude` is carried through untouched, its member
///   having been skipped during compilation;
/// - everything else is recomputed under the post-compilation path.
///
/// Output rows are deduplicated, sorted, and written back with LF line
/// endings, which makes the rewrite idempotent against an unchanged tree.
/// A missing manifest is a no-op.
pub fn rewrite_record(
    record_path: &Path,
    root: &Path,
    exclude: Option<&Pattern>,
    classifier: &Classifier,
    options: &RecordOptions,
) -> Result<()> {
    if !record_path.exists() {
        debug!("no RECORD at {}, nothing to rewrite", record_path.display());
        return Ok(());
    }

    let content = fs::read_to_string(record_path)?;
    let mut rows = BTreeSet::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row = RecordRow::parse(line)?;
        let disk_path = root.join(&row.path);

        if disk_path == record_path {
            rows.insert(row);
            continue;
        }
        let keep = disk_path.exists()
            && disk_path.extension().is_some()
            && classifier.classify(&disk_path)? != FileKind::Source;
        if keep || exclude.is_some_and(|pattern| pattern.matches(&row.path)) {
            rows.insert(row);
            continue;
        }

        let compiled = bytecode_path(&disk_path)?;
        let (digest, length) = hash_file(&compiled, options).map_err(|err| match err {
            Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Error::RecordEntryMissing {
                    record_path: row.path.clone(),
                    compiled_path: compiled.clone(),
                }
            }
            other => other,
        })?;
        let rel = compiled
            .strip_prefix(root)
            .unwrap_or(&compiled)
            .to_slash_lossy()
            .into_owned();
        rows.insert(RecordRow {
            path: rel,
            digest: format!("{HASH_LABEL}={digest}"),
            size: length.to_string(),
        });
    }

    let mut out = String::new();
    for row in &rows {
        out.push_str(&row.format());
        out.push('\n');
    }
    fs::write(record_path, out)?;
    Ok(())
}

/// Re-point rows under the old dist-info directory at its renamed
/// counterpart, so the manifest path set matches the archive members after
/// the metadata directory rename.
pub fn retarget_prefix(record_path: &Path, old_dir: &str, new_dir: &str) -> Result<()> {
    let old_prefix = format!("{old_dir}/");
    let content = fs::read_to_string(record_path)?;
    let mut rows = BTreeSet::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut row = RecordRow::parse(line)?;
        if let Some(rest) = row.path.strip_prefix(&old_prefix) {
            row.path = format!("{new_dir}/{rest}");
        }
        rows.insert(row);
    }
    let mut out = String::new();
    for row in &rows {
        out.push_str(&row.format());
        out.push('\n');
    }
    fs::write(record_path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options() -> RecordOptions {
        RecordOptions::default()
    }

    fn digest_of(content: &[u8]) -> String {
        format!("sha256={}", URL_SAFE_NO_PAD.encode(Sha256::digest(content)))
    }

    #[test]
    fn digest_label_names_the_hash_in_use() {
        // Rows advertise the algorithm that actually produced the digest.
        assert_eq!(HASH_LABEL, "sha256");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, b"payload").unwrap();
        let (digest, _) = hash_file(&path, &options()).unwrap();
        assert_eq!(
            format!("{HASH_LABEL}={digest}"),
            digest_of(b"payload")
        );
    }

    #[test]
    fn parse_and_format_round_trip_quoted_paths() {
        let row = RecordRow::parse("\"odd, path.txt\",sha256=abc,12").unwrap();
        assert_eq!(row.path, "odd, path.txt");
        assert_eq!(row.format(), "\"odd, path.txt\",sha256=abc,12");
    }

    #[test]
    fn malformed_row_is_rejected() {
        assert!(matches!(
            RecordRow::parse("only-two,fields"),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn streaming_digest_matches_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        // Larger than one chunk so the rolling update actually rolls.
        let content = vec![0xabu8; 3000];
        fs::write(&path, &content).unwrap();
        let (digest, length) = hash_file(&path, &options()).unwrap();
        assert_eq!(length, 3000);
        assert_eq!(digest, URL_SAFE_NO_PAD.encode(Sha256::digest(&content)));
    }

    #[test]
    fn compiled_rows_are_recomputed_and_untouched_rows_kept() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let dist_info = root.join("demo-1.0.0.dist-info");
        fs::create_dir_all(root.join("demo")).unwrap();
        fs::create_dir_all(&dist_info).unwrap();

        // Post-compilation state: the .py member is gone, its .pyc exists.
        fs::write(root.join("demo/__init__.pyc"), b"\x6f\x0d\x0d\x0abytecode").unwrap();
        fs::write(root.join("demo/data.txt"), b"payload\n").unwrap();
        let record = dist_info.join("RECORD");
        fs::write(
            &record,
            "demo/__init__.py,sha256=stale,6\n\
             demo/data.txt,sha256=untouched,8\n\
             demo-1.0.0.dist-info/RECORD,,\n",
        )
        .unwrap();

        rewrite_record(&record, root, None, &Classifier::default(), &options()).unwrap();

        let expected = format!(
            "demo-1.0.0.dist-info/RECORD,,\n\
             demo/__init__.pyc,{},12\n\
             demo/data.txt,sha256=untouched,8\n",
            digest_of(b"\x6f\x0d\x0d\x0abytecode"),
        );
        assert_eq!(fs::read_to_string(&record).unwrap(), expected);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let dist_info = root.join("demo-1.0.0.dist-info");
        fs::create_dir_all(root.join("demo")).unwrap();
        fs::create_dir_all(&dist_info).unwrap();
        fs::write(root.join("demo/__init__.pyc"), b"\x6f\x0d\x0d\x0abytecode").unwrap();
        fs::write(root.join("demo/data.txt"), b"payload\n").unwrap();
        let record = dist_info.join("RECORD");
        fs::write(
            &record,
            "demo/__init__.py,sha256=stale,6\ndemo/data.txt,sha256=untouched,8\ndemo-1.0.0.dist-info/RECORD,,\n",
        )
        .unwrap();

        rewrite_record(&record, root, None, &Classifier::default(), &options()).unwrap();
        let first = fs::read_to_string(&record).unwrap();
        rewrite_record(&record, root, None, &Classifier::default(), &options()).unwrap();
        let second = fs::read_to_string(&record).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn excluded_source_rows_are_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let dist_info = root.join("demo-1.0.0.dist-info");
        fs::create_dir_all(root.join("demo/vendor")).unwrap();
        fs::create_dir_all(&dist_info).unwrap();
        // The excluded source was never compiled and is still on disk.
        fs::write(root.join("demo/vendor/lib.py"), b"x = 1\n").unwrap();
        let record = dist_info.join("RECORD");
        fs::write(
            &record,
            "demo/vendor/lib.py,sha256=original,6\ndemo-1.0.0.dist-info/RECORD,,\n",
        )
        .unwrap();

        let pattern = Pattern::new("*/vendor/*").unwrap();
        rewrite_record(
            &record,
            root,
            Some(&pattern),
            &Classifier::default(),
            &options(),
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(&record).unwrap(),
            "demo-1.0.0.dist-info/RECORD,,\ndemo/vendor/lib.py,sha256=original,6\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn extensionless_data_row_rehashed_in_place() {
        // An extension-less file that still exists and is not source falls
        // into the recompute branch with an identity path mapping. Pins the
        // reference behavior.
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let dist_info = root.join("demo-1.0.0.dist-info");
        fs::create_dir_all(&dist_info).unwrap();
        fs::write(root.join("NOTICE"), b"plain text\n").unwrap();
        let record = dist_info.join("RECORD");
        fs::write(&record, "NOTICE,sha256=stale,1\ndemo-1.0.0.dist-info/RECORD,,\n").unwrap();

        rewrite_record(&record, root, None, &Classifier::default(), &options()).unwrap();

        let expected = format!(
            "NOTICE,{},11\ndemo-1.0.0.dist-info/RECORD,,\n",
            digest_of(b"plain text\n")
        );
        assert_eq!(fs::read_to_string(&record).unwrap(), expected);
    }

    #[test]
    fn missing_compiled_file_is_a_manifest_inconsistency() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let dist_info = root.join("demo-1.0.0.dist-info");
        fs::create_dir_all(&dist_info).unwrap();
        let record = dist_info.join("RECORD");
        fs::write(&record, "demo/gone.py,sha256=stale,6\n").unwrap();

        match rewrite_record(&record, root, None, &Classifier::default(), &options()) {
            Err(Error::RecordEntryMissing { record_path, .. }) => {
                assert_eq!(record_path, "demo/gone.py");
            }
            other => panic!("expected RecordEntryMissing, got {other:?}"),
        }
    }

    #[test]
    fn missing_record_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        rewrite_record(
            &dir.path().join("RECORD"),
            dir.path(),
            None,
            &Classifier::default(),
            &options(),
        )
        .unwrap();
    }

    #[test]
    fn retarget_moves_dist_info_rows() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("RECORD");
        fs::write(
            &record,
            "demo-1.0.0.dist-info/METADATA,sha256=abc,10\ndemo-1.0.0.dist-info/RECORD,,\ndemo/mod.pyc,sha256=def,20\n",
        )
        .unwrap();

        retarget_prefix(
            &record,
            "demo-1.0.0.dist-info",
            "demo-1.0.0.compiled.dist-info",
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(&record).unwrap(),
            "demo-1.0.0.compiled.dist-info/METADATA,sha256=abc,10\n\
             demo-1.0.0.compiled.dist-info/RECORD,,\n\
             demo/mod.pyc,sha256=def,20\n"
        );
    }
}
