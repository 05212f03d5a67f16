//! Decides whether a wheel member is compilable Python source, already
//! compiled bytecode, or opaque data.
//!
//! The suffix rules are always available; everything else goes through a
//! [`ContentSniffer`], a small capability that inspects the first bytes of a
//! file. A classifier without a sniffer degrades gracefully: pure suffix
//! decisions still succeed and only a member that genuinely needs content
//! inspection fails with [`Error::SnifferUnavailable`].

use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;

use fs_err as fs;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Error, Result};

/// Suffix of compilable Python source files.
pub const SOURCE_SUFFIX: &str = "py";
/// Suffix of compiled bytecode files.
pub const BYTECODE_SUFFIX: &str = "pyc";

/// How many leading bytes a sniffer reads to take its decision.
const SNIFF_LEN: usize = 512;

static SHEBANG_PYTHON: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#![^\n]*python").unwrap());

/// Classification of one wheel member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Compilable source code.
    Source,
    /// Already-compiled bytecode.
    Bytecode,
    /// Anything else: data files, metadata, native libraries.
    Other,
}

/// Content signature of a file, as reported by a [`ContentSniffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// An executable script text, e.g. a `#!/usr/bin/env python` launcher.
    ScriptText,
    /// Starts with a CPython bytecode magic number.
    BytecodeMagic,
    /// Generic binary data.
    BinaryData,
    /// Plain text without a recognized signature.
    Text,
    /// Empty file.
    Empty,
}

/// Capability interface for content-based file identification.
///
/// Implementations must be deterministic for a given path and content and
/// must not cache results across calls.
pub trait ContentSniffer {
    fn sniff(&self, path: &Path) -> Result<Signature>;
}

/// Content sniffer working off the leading bytes of a file, in the spirit of
/// libmagic signatures.
pub struct MagicSniffer;

impl ContentSniffer for MagicSniffer {
    fn sniff(&self, path: &Path) -> Result<Signature> {
        let mut header = [0u8; SNIFF_LEN];
        let mut file = fs::File::open(path)?;
        let mut read = 0;
        // A single read can come back short even when more bytes are pending.
        loop {
            let n = file.read(&mut header[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        let header = &header[..read];

        if header.is_empty() {
            return Ok(Signature::Empty);
        }
        // CPython bytecode starts with a two-byte magic number followed by
        // b"\r\n", for every interpreter version. The magic itself always
        // contains at least one byte outside printable ASCII (its high byte
        // is a small integer), which keeps a text file whose first line
        // happens to be two characters plus CRLF out of this branch.
        if header.len() >= 4
            && header[2] == b'\r'
            && header[3] == b'\n'
            && header[..2].iter().any(|&byte| !(0x20..0x7f).contains(&byte))
        {
            return Ok(Signature::BytecodeMagic);
        }
        if let Ok(text) = std::str::from_utf8(header) {
            if SHEBANG_PYTHON.is_match(text) {
                return Ok(Signature::ScriptText);
            }
        }
        if header.contains(&0) {
            return Ok(Signature::BinaryData);
        }
        Ok(Signature::Text)
    }
}

/// Classifies wheel members by suffix, falling back to an optional content
/// sniffer for everything without a recognized suffix.
pub struct Classifier {
    sniffer: Option<Box<dyn ContentSniffer>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::with_content_sniffer()
    }
}

impl Classifier {
    /// Full classifier: suffix rules plus content signatures.
    pub fn with_content_sniffer() -> Self {
        Self {
            sniffer: Some(Box::new(MagicSniffer)),
        }
    }

    /// Suffix-only classifier. Fails on members that need content inspection.
    pub fn suffix_only() -> Self {
        Self { sniffer: None }
    }

    /// Classifier with a custom sniffer implementation.
    pub fn with_sniffer(sniffer: Box<dyn ContentSniffer>) -> Self {
        Self {
            sniffer: Some(sniffer),
        }
    }

    /// Classify one filesystem entry.
    ///
    /// A `.py` suffix is always [`FileKind::Source`] and a `.pyc` suffix is
    /// always [`FileKind::Bytecode`], regardless of content. Everything else
    /// is decided by the content signature: executable script text means
    /// source (extension-less launcher scripts), a bytecode magic number or
    /// generic binary data means bytecode.
    pub fn classify(&self, path: &Path) -> Result<FileKind> {
        match path.extension().and_then(OsStr::to_str) {
            Some(SOURCE_SUFFIX) => return Ok(FileKind::Source),
            Some(BYTECODE_SUFFIX) => return Ok(FileKind::Bytecode),
            _ => {}
        }
        let sniffer = self
            .sniffer
            .as_deref()
            .ok_or_else(|| Error::SnifferUnavailable(path.to_path_buf()))?;
        Ok(match sniffer.sniff(path)? {
            Signature::ScriptText => FileKind::Source,
            Signature::BytecodeMagic | Signature::BinaryData => FileKind::Bytecode,
            Signature::Text | Signature::Empty => FileKind::Other,
        })
    }
}
