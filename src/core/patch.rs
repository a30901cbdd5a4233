//! Patch application
//!
//! Applies an ordered list of unified diffs to an extracted source tree.
//! Every patch is first applied strictly (exact context, any offset); if that
//! fails the whole patch is retried with fuzz. All edits are staged in memory
//! and written to disk only once every patch has applied.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::core::condition::Facts;
use crate::core::options::Variant;
use crate::core::recipe::{InreplaceRule, PatchDeclaration, PatchSource, Recipe};
use crate::error::PatchError;
use crate::infra::download::DownloadManager;

/// Patch with its diff text in hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPatch {
    /// Position in the recipe's patch list
    pub index: usize,
    /// Leading path components to strip
    pub strip: usize,
    /// Unified diff text
    pub text: String,
}

/// Summary of a successful patch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Patches applied
    pub applied: usize,
    /// Indexes of patches that needed fuzz
    pub fuzzed: Vec<usize>,
    /// Files written or deleted, relative to the tree root
    pub files: Vec<String>,
}

// ============================================
// Diff model and parser
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// One `@@` section of a file diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    lines: Vec<HunkLine>,
    old_missing_newline: bool,
    new_missing_newline: bool,
}

/// Changes to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// Old path as written, `None` for `/dev/null`
    pub old_path: Option<String>,
    /// New path as written, `None` for `/dev/null`
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

fn header_path(header: &str) -> Option<String> {
    let path = header.split('\t').next().unwrap_or(header).trim_end();
    (path != "/dev/null").then(|| path.to_string())
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = text.split('\n').collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// Parse unified diff text into per-file changes
///
/// Lines outside file sections (`diff`, `index`, mail headers) are ignored.
pub fn parse_unified_diff(text: &str) -> Result<Vec<FileDiff>, String> {
    let header = Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .map_err(|e| e.to_string())?;
    let lines = split_lines(text);
    let mut files = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(old) = lines[i].strip_prefix("--- ") else {
            i += 1;
            continue;
        };
        let Some(new) = lines.get(i + 1).and_then(|l| l.strip_prefix("+++ ")) else {
            return Err(format!("line {}: '---' header without '+++'", i + 1));
        };
        i += 2;

        let mut hunks = Vec::new();
        while lines.get(i).is_some_and(|l| l.starts_with("@@")) {
            let (hunk, next) = parse_hunk(&header, &lines, i)?;
            hunks.push(hunk);
            i = next;
        }

        let file = FileDiff {
            old_path: header_path(old),
            new_path: header_path(new),
            hunks,
        };
        if file.hunks.is_empty() {
            return Err(format!("no hunks for '{}'", new.trim_end()));
        }
        if file.old_path.is_none() && file.new_path.is_none() {
            return Err("both paths are /dev/null".to_string());
        }
        files.push(file);
    }

    if files.is_empty() {
        return Err("no file headers found".to_string());
    }
    Ok(files)
}

fn parse_hunk(header: &Regex, lines: &[&str], start: usize) -> Result<(Hunk, usize), String> {
    let at = start + 1;
    let caps = header
        .captures(lines[start])
        .ok_or_else(|| format!("line {at}: bad hunk header '{}'", lines[start]))?;
    let number = |n: usize, default: usize| -> Result<usize, String> {
        caps.get(n)
            .map_or(Ok(default), |m| m.as_str().parse().map_err(|_| format!("line {at}: number out of range")))
    };

    let mut hunk = Hunk {
        old_start: number(1, 0)?,
        old_len: number(2, 1)?,
        new_start: number(3, 0)?,
        new_len: number(4, 1)?,
        lines: Vec::new(),
        old_missing_newline: false,
        new_missing_newline: false,
    };

    let mut old_left = hunk.old_len;
    let mut new_left = hunk.new_len;
    let mut i = start + 1;

    while old_left > 0 || new_left > 0 {
        let Some(line) = lines.get(i) else {
            return Err(format!("line {at}: hunk ends early"));
        };
        let mut chars = line.chars();
        let kind = chars.next();
        let rest = chars.as_str();
        match kind {
            Some(' ') | None if old_left > 0 && new_left > 0 => {
                hunk.lines.push(HunkLine::Context(rest.to_string()));
                old_left -= 1;
                new_left -= 1;
            }
            Some('-') if old_left > 0 => {
                hunk.lines.push(HunkLine::Remove(rest.to_string()));
                old_left -= 1;
            }
            Some('+') if new_left > 0 => {
                hunk.lines.push(HunkLine::Add(rest.to_string()));
                new_left -= 1;
            }
            Some('\\') => mark_missing_newline(&mut hunk),
            _ => return Err(format!("line {}: unexpected '{line}' in hunk", i + 1)),
        }
        i += 1;
    }

    if lines.get(i).is_some_and(|l| l.starts_with('\\')) {
        mark_missing_newline(&mut hunk);
        i += 1;
    }

    Ok((hunk, i))
}

fn mark_missing_newline(hunk: &mut Hunk) {
    match hunk.lines.last() {
        Some(HunkLine::Context(_)) => {
            hunk.old_missing_newline = true;
            hunk.new_missing_newline = true;
        }
        Some(HunkLine::Remove(_)) => hunk.old_missing_newline = true,
        Some(HunkLine::Add(_)) => hunk.new_missing_newline = true,
        None => {}
    }
}

impl Hunk {
    /// Hunk body with up to `fuzz` context lines dropped from each end,
    /// plus the number dropped from the front
    fn trimmed(&self, fuzz: usize) -> (usize, &[HunkLine]) {
        let leading = self
            .lines
            .iter()
            .take_while(|l| matches!(l, HunkLine::Context(_)))
            .count()
            .min(fuzz);
        let trailing = self
            .lines
            .iter()
            .rev()
            .take_while(|l| matches!(l, HunkLine::Context(_)))
            .count()
            .min(fuzz)
            .min(self.lines.len() - leading);
        (leading, &self.lines[leading..self.lines.len() - trailing])
    }

    /// Zero-based line in the original file where the hunk starts
    fn origin(&self) -> usize {
        if self.old_len == 0 {
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }
}

// ============================================
// Applying hunks to text
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct TextFile {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl TextFile {
    fn parse(text: &str) -> Self {
        Self {
            lines: split_lines(text).into_iter().map(str::to_string).collect(),
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

fn lines_match(actual: &str, expected: &str, fuzzy: bool) -> bool {
    if fuzzy {
        actual.split_whitespace().eq(expected.split_whitespace())
    } else {
        actual == expected
    }
}

/// Closest position at or after `floor` where `old` matches, searching
/// outward from `expected`
fn find_position(lines: &[String], old: &[&str], expected: usize, floor: usize, fuzzy: bool) -> Option<usize> {
    if old.is_empty() {
        return Some(expected.clamp(floor, lines.len()));
    }
    if old.len() > lines.len() || floor > lines.len() - old.len() {
        return None;
    }
    let last = lines.len() - old.len();
    let expected = expected.clamp(floor, last);
    let matches_at = |pos: usize| {
        old.iter()
            .zip(&lines[pos..])
            .all(|(want, have)| lines_match(have, want, fuzzy))
    };

    for distance in 0..=(last - floor) {
        let below = expected.checked_sub(distance).filter(|p| *p >= floor);
        let above = expected.checked_add(distance).filter(|p| *p <= last && distance > 0);
        if below.is_none() && above.is_none() && distance > 0 {
            break;
        }
        if let Some(pos) = below.into_iter().chain(above).find(|p| matches_at(*p)) {
            return Some(pos);
        }
    }
    None
}

fn shift(from: usize, to: usize) -> isize {
    if to >= from {
        isize::try_from(to - from).unwrap_or(isize::MAX)
    } else {
        isize::try_from(from - to).map_or(isize::MIN, |d| -d)
    }
}

/// Apply every hunk of one file; on failure returns the 1-based hunk number
fn apply_hunks(file: &mut TextFile, hunks: &[Hunk], fuzzy: bool) -> Result<(), (usize, String)> {
    let max_fuzz = if fuzzy { defaults::PATCH_FUZZ } else { 0 };
    let mut delta: isize = 0;
    let mut floor = 0;

    for (number, hunk) in hunks.iter().enumerate() {
        let mut placed = None;
        for fuzz in 0..=max_fuzz {
            let (leading, body) = hunk.trimmed(fuzz);
            let old: Vec<&str> = body
                .iter()
                .filter_map(|l| match l {
                    HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                    HunkLine::Add(_) => None,
                })
                .collect();
            let origin = hunk.origin() + leading;
            let expected = origin.checked_add_signed(delta).unwrap_or(0);
            if let Some(pos) = find_position(&file.lines, &old, expected, floor, fuzzy) {
                placed = Some((pos, origin, old.len(), body));
                break;
            }
        }

        let Some((pos, origin, old_len, body)) = placed else {
            return Err((number + 1, "context does not match".to_string()));
        };

        // Context lines keep the file's own text.
        let mut cursor = pos;
        let mut replacement = Vec::with_capacity(body.len());
        for line in body {
            match line {
                HunkLine::Context(_) => {
                    replacement.push(file.lines[cursor].clone());
                    cursor += 1;
                }
                HunkLine::Remove(_) => cursor += 1,
                HunkLine::Add(text) => replacement.push(text.clone()),
            }
        }

        let touches_end = pos + old_len == file.lines.len();
        let new_len = replacement.len();
        file.lines.splice(pos..pos + old_len, replacement);

        if touches_end && (hunk.old_missing_newline || hunk.new_missing_newline) {
            file.trailing_newline = !hunk.new_missing_newline;
        }

        floor = pos + new_len;
        delta = shift(origin + old_len, pos + new_len);
    }

    Ok(())
}

// ============================================
// Staged tree edits
// ============================================

/// In-memory changes on top of a directory tree; `None` marks a deletion
#[derive(Debug, Clone)]
struct Overlay {
    root: PathBuf,
    staged: BTreeMap<String, Option<TextFile>>,
}

impl Overlay {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            staged: BTreeMap::new(),
        }
    }

    fn exists(&self, rel: &str) -> bool {
        match self.staged.get(rel) {
            Some(entry) => entry.is_some(),
            None => self.root.join(rel).is_file(),
        }
    }

    fn read(&self, rel: &str) -> Result<Option<TextFile>, PatchError> {
        if let Some(entry) = self.staged.get(rel) {
            return Ok(entry.clone());
        }
        let path = self.root.join(rel);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| PatchError::IoError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let text = String::from_utf8(bytes).map_err(|_| PatchError::IoError {
            path,
            error: "file is not valid UTF-8".to_string(),
        })?;
        Ok(Some(TextFile::parse(&text)))
    }

    fn commit(self) -> Result<Vec<String>, PatchError> {
        let mut touched = Vec::with_capacity(self.staged.len());
        for (rel, entry) in self.staged {
            let path = self.root.join(&rel);
            let io_err = |e: std::io::Error| PatchError::IoError {
                path: path.clone(),
                error: e.to_string(),
            };
            match entry {
                Some(file) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).map_err(io_err)?;
                    }
                    std::fs::write(&path, file.render()).map_err(io_err)?;
                }
                None => match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(e)),
                },
            }
            touched.push(rel);
        }
        Ok(touched)
    }
}

/// Remove `strip` leading components; rejects paths escaping the tree
fn strip_components(path: &str, strip: usize) -> Option<String> {
    let parts: Vec<&str> = path
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.len() <= strip || parts.contains(&"..") {
        return None;
    }
    Some(parts[strip..].join("/"))
}

/// Stage every file diff of one patch
///
/// When both paths differ and only the old file exists, the result lands at
/// the new path and the old file is removed.
fn apply_file_diffs(
    mut overlay: Overlay,
    patch: &ResolvedPatch,
    diffs: &[FileDiff],
    fuzzy: bool,
) -> Result<Overlay, PatchError> {
    let index = patch.index;
    let target = |path: &Option<String>| -> Result<Option<String>, PatchError> {
        path.as_deref()
            .map(|p| {
                strip_components(p, patch.strip).ok_or_else(|| PatchError::Malformed {
                    index,
                    reason: format!("cannot strip {} components from '{p}'", patch.strip),
                })
            })
            .transpose()
    };

    for diff in diffs {
        let old = target(&diff.old_path)?;
        let new = target(&diff.new_path)?;

        let unapplicable = |file: &str, hunk: usize, reason: String| PatchError::Unapplicable {
            index,
            file: file.to_string(),
            hunk,
            reason,
        };

        let (path, mut content) = match (&old, &new) {
            (None, Some(new)) => {
                if overlay.exists(new) {
                    return Err(unapplicable(new, 1, "file to create already exists".to_string()));
                }
                (new.clone(), TextFile::parse(""))
            }
            (Some(old), None) => match overlay.read(old)? {
                Some(content) => (old.clone(), content),
                None => return Err(unapplicable(old, 1, "file to delete not found".to_string())),
            },
            (Some(old), Some(new)) if old != new && !overlay.exists(new) => match overlay.read(old)? {
                Some(content) => {
                    overlay.staged.insert(old.clone(), None);
                    (new.clone(), content)
                }
                None => return Err(unapplicable(new, 1, "file not found".to_string())),
            },
            (Some(_), Some(new)) => match overlay.read(new)? {
                Some(content) => (new.clone(), content),
                None => return Err(unapplicable(new, 1, "file not found".to_string())),
            },
            (None, None) => {
                return Err(PatchError::Malformed {
                    index,
                    reason: "both paths are /dev/null".to_string(),
                })
            }
        };

        apply_hunks(&mut content, &diff.hunks, fuzzy)
            .map_err(|(hunk, reason)| unapplicable(&path, hunk, reason))?;

        let deleted = new.is_none();
        overlay.staged.insert(path, (!deleted).then_some(content));
    }

    Ok(overlay)
}

/// Apply patches in order; nothing is written unless every patch applies
pub fn apply_patches(root: &Path, patches: &[ResolvedPatch]) -> Result<PatchOutcome, PatchError> {
    let mut overlay = Overlay::new(root);
    let mut fuzzed = Vec::new();

    for patch in patches {
        let diffs = parse_unified_diff(&patch.text).map_err(|reason| PatchError::Malformed {
            index: patch.index,
            reason,
        })?;

        overlay = match apply_file_diffs(overlay.clone(), patch, &diffs, false) {
            Ok(next) => next,
            Err(strict) => {
                tracing::debug!("Patch {} failed strictly ({strict}); retrying with fuzz", patch.index);
                let next = apply_file_diffs(overlay, patch, &diffs, true)?;
                tracing::warn!("Patch {} applied with fuzz", patch.index);
                fuzzed.push(patch.index);
                next
            }
        };
        tracing::debug!("Patch {} staged", patch.index);
    }

    let files = overlay.commit()?;
    tracing::info!("Applied {} patch(es) to {} file(s)", patches.len(), files.len());

    Ok(PatchOutcome {
        applied: patches.len(),
        fuzzed,
        files,
    })
}

// ============================================
// Patch selection and retrieval
// ============================================

/// Patches that apply to this variant, with their indexes
pub fn select_patches<'r>(recipe: &'r Recipe, variant: &Variant) -> Vec<(usize, &'r PatchDeclaration)> {
    if variant.is_head() && recipe.patches.release_only {
        tracing::info!("Skipping patches for head build");
        return Vec::new();
    }
    recipe
        .patches
        .patches
        .iter()
        .enumerate()
        .filter(|(_, p)| p.when.eval(variant))
        .collect()
}

/// Obtain the diff text of each selected patch; remote patches are fetched
/// with the download manager's retry policy
pub async fn resolve_patches(
    selected: &[(usize, &PatchDeclaration)],
    downloader: &DownloadManager,
) -> Result<Vec<ResolvedPatch>, PatchError> {
    let mut resolved = Vec::with_capacity(selected.len());
    for (index, decl) in selected {
        let text = match decl.source() {
            Some(PatchSource::Inline(text)) => text.to_string(),
            Some(PatchSource::Remote(url)) => {
                downloader
                    .fetch_text(url)
                    .await
                    .map_err(|e| PatchError::Fetch {
                        index: *index,
                        error: e.to_string(),
                    })?
            }
            None => {
                return Err(PatchError::Malformed {
                    index: *index,
                    reason: "no diff source".to_string(),
                })
            }
        };
        resolved.push(ResolvedPatch {
            index: *index,
            strip: decl.strip,
            text,
        });
    }
    Ok(resolved)
}

/// Run in-place literal replacements whose condition holds
pub fn apply_inreplace(root: &Path, rules: &[InreplaceRule], variant: &Variant) -> Result<usize, PatchError> {
    let mut applied = 0;
    for rule in rules.iter().filter(|r| r.when.eval(variant)) {
        let rel = strip_components(&rule.path, 0).ok_or_else(|| PatchError::Inreplace {
            path: rule.path.clone(),
            pattern: rule.from.clone(),
        })?;
        let path = root.join(rel);
        let content = std::fs::read_to_string(&path).map_err(|e| PatchError::IoError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        if !content.contains(&rule.from) {
            return Err(PatchError::Inreplace {
                path: rule.path.clone(),
                pattern: rule.from.clone(),
            });
        }
        std::fs::write(&path, content.replace(&rule.from, &rule.to)).map_err(|e| PatchError::IoError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        tracing::debug!("Replaced '{}' in {}", rule.from, rule.path);
        applied += 1;
    }
    Ok(applied)
}
