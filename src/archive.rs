//! Zip-level operations on wheel archives.
//!
//! The zip format stores Unix mode bits in the high half of each entry's
//! external attributes, and a naive extraction drops them. [`extract`]
//! restores them in an explicit post-write step per member; [`create`] reads
//! them back off the filesystem when repacking.

use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use fs_err::File;
use path_slash::PathExt as _;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{Error, Result};
use crate::util::zip_mtime;

/// Extract every member of the archive at `archive_path` into `dest`,
/// restoring each member's stored Unix permission bits.
///
/// A zero external-attributes field (archives built on platforms without
/// Unix modes) leaves the platform-default permissions in place. Extracting
/// into a non-empty `dest` is a fatal precondition error: nothing is
/// unpacked.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<()> {
    if dest.exists() && fs::read_dir(dest)?.next().is_some() {
        return Err(Error::StagingNotEmpty(dest.to_path_buf()));
    }
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    fs::create_dir_all(dest)?;

    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let rel = member
            .enclosed_name()
            .ok_or_else(|| Error::Io(io::Error::other(format!(
                "member `{}` escapes the extraction root",
                member.name()
            ))))?;
        let out = dest.join(rel);
        if member.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        io::copy(&mut member, &mut file)?;
        drop(file);

        #[cfg(unix)]
        if let Some(mode) = member.unix_mode() {
            if mode != 0 {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

/// Pack the tree rooted at `root` into a new zip archive at `out_path`.
///
/// Members are added in sorted path order so repeated packs of the same tree
/// produce identical archives, with mtimes pinned by `SOURCE_DATE_EPOCH`
/// when set.
pub fn create(root: &Path, out_path: &Path) -> Result<()> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    let mut writer = ZipWriter::new(File::create(out_path)?);
    for path in &files {
        let name = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_slash_lossy()
            .into_owned();
        #[allow(unused_mut)]
        let mut options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip_mtime());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(fs::metadata(path)?.permissions().mode());
        }
        writer.start_file(name, options)?;
        let mut file = File::open(path)?;
        io::copy(&mut file, &mut writer)?;
    }
    writer.finish()?;
    Ok(())
}

/// Every file under `dir`, recursively. Directories themselves are not
/// listed; wheel archives only carry file members.
pub(crate) fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
