//! Line-oriented editing of plain-text configuration files.
//!
//! The only edit ever performed is "append this line unless a line matching
//! the matcher already exists"; existing content is never rewritten.
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use regex::Regex;

/// Anchored full-line pattern deciding whether a line is already present.
#[derive(Debug, Clone)]
pub struct LineMatcher {
    regex: Regex,
}

impl LineMatcher {
    /// Build a matcher from a regular expression that must match a whole line.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .with_context(|| format!("invalid line pattern: {pattern}"))?;
        Ok(Self { regex })
    }

    /// Match `line` literally, ignoring surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error only if the escaped pattern exceeds the regex size limit.
    pub fn exact(line: &str) -> Result<Self> {
        Self::new(&format!(r"\s*{}\s*", regex::escape(line.trim())))
    }

    /// Whether `line` (without its newline) matches.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// The anchored pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl PartialEq for LineMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for LineMatcher {}

impl fmt::Display for LineMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insert-line-if-absent editing of text files.
#[cfg_attr(test, mockall::automock)]
pub trait TextConfigEditor: Send + Sync + fmt::Debug {
    /// Whether any line of `file` matches. A missing file has no lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    fn has_line(&self, file: &Path, matcher: &LineMatcher) -> Result<bool> {
        Ok(self.find_line(file, matcher)?.is_some())
    }

    /// First line of `file` that matches, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    fn find_line(&self, file: &Path, matcher: &LineMatcher) -> Result<Option<String>>;

    /// Append `line` unless a line matching `matcher` exists. Returns whether
    /// the file was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    fn ensure_line(&self, file: &Path, matcher: &LineMatcher, line: &str) -> Result<bool>;
}

/// [`TextConfigEditor`] operating directly on the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextEditor;

fn read_optional(file: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(file) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", file.display())),
    }
}

impl TextConfigEditor for FileTextEditor {
    fn find_line(&self, file: &Path, matcher: &LineMatcher) -> Result<Option<String>> {
        Ok(read_optional(file)?
            .and_then(|content| content.lines().find(|l| matcher.matches(l)).map(str::to_string)))
    }

    fn ensure_line(&self, file: &Path, matcher: &LineMatcher, line: &str) -> Result<bool> {
        let content = read_optional(file)?;
        if content
            .as_deref()
            .is_some_and(|c| c.lines().any(|l| matcher.matches(l)))
        {
            return Ok(false);
        }

        if content.is_none() {
            ensure_parent_dir(file)?;
        }
        let mut text = String::new();
        if content.as_deref().is_some_and(|c| !c.is_empty() && !c.ends_with('\n')) {
            text.push('\n');
        }
        text.push_str(line);
        text.push('\n');

        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .with_context(|| format!("opening {} for append", file.display()))?;
        handle
            .write_all(text.as_bytes())
            .with_context(|| format!("appending to {}", file.display()))?;
        tracing::debug!("appended '{}' to {}", line.trim(), file.display());
        Ok(true)
    }
}

/// Create the parent directory of `file` when it does not exist yet.
fn ensure_parent_dir(file: &Path) -> Result<()> {
    if let Some(parent) = file.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}
