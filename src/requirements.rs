//! `requirements.txt` parsing and rewriting.
//!
//! Only requirement lines are interpreted; comments, blank lines and pip
//! options are carried through byte for byte.
use crate::discovery::normalize_name;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// A single parsed requirement specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    /// Version specifier or direct reference, e.g. `==2.31.0` or `@ https://...`.
    pub specifier: String,
    pub marker: Option<String>,
}

impl Requirement {
    /// The pinned version when the specifier is an exact `==` pin.
    pub fn pinned_version(&self) -> Option<&str> {
        let version = self.specifier.strip_prefix("==")?.trim();
        if version.is_empty() || version.contains(',') {
            return None;
        }
        Some(version)
    }

    fn render(&self) -> String {
        let mut out = self.name.clone();
        if !self.extras.is_empty() {
            out.push('[');
            out.push_str(&self.extras.join(","));
            out.push(']');
        }
        if !self.specifier.is_empty() {
            if self.specifier.starts_with('@') {
                out.push(' ');
            }
            out.push_str(&self.specifier);
        }
        if let Some(marker) = &self.marker {
            out.push_str("; ");
            out.push_str(marker);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Requirement {
        requirement: Requirement,
        comment: Option<String>,
    },
    Verbatim(String),
}

/// An editable requirements file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementsFile {
    lines: Vec<Line>,
    trailing_newline: bool,
}

/// What [`RequirementsFile::replace`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequirementsChange {
    /// The source library's specifier before the change, if it was listed.
    pub source_specifier: Option<String>,
    /// The source's exact pin, if any.
    pub source_version: Option<String>,
    /// Exact pins of every source entry, in file order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_versions: Vec<String>,
    /// Source entries beyond the first, dropped.
    pub duplicates_removed: usize,
    /// Source entry rewritten in place to the target.
    pub replaced: bool,
    /// Source entry dropped because the target was already listed.
    pub removed: bool,
    /// Target appended because the source was not listed.
    pub added: bool,
}

fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[([^\]]*)\])?\s*([^;]*?)\s*(?:;\s*(.*?))?\s*$")
            .expect("valid requirement regex")
    })
}

fn parse_requirement(text: &str) -> Option<Requirement> {
    let caps = requirement_regex().captures(text.trim())?;
    let extras = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|extra| extra.trim().to_string())
                .filter(|extra| !extra.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let specifier = caps
        .get(3)
        .map(|m| m.as_str().replace(' ', ""))
        .unwrap_or_default();
    let specifier = match specifier.strip_prefix('@') {
        Some(reference) => format!("@ {reference}"),
        None => specifier,
    };
    Some(Requirement {
        name: caps[1].to_string(),
        extras,
        specifier,
        marker: caps
            .get(4)
            .map(|m| m.as_str().to_string())
            .filter(|marker| !marker.is_empty()),
    })
}

/// Split a trailing ` # comment` off a line (pip requires whitespace before `#`).
fn split_comment(line: &str) -> (&str, Option<&str>) {
    let bytes = line.as_bytes();
    for (idx, ch) in line.char_indices() {
        if ch == '#' && (idx == 0 || bytes[idx - 1].is_ascii_whitespace()) {
            return (&line[..idx], Some(&line[idx..]));
        }
    }
    (line, None)
}

impl RequirementsFile {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|raw| {
                let (body, comment) = split_comment(raw);
                let body_trimmed = body.trim();
                if body_trimmed.is_empty() || body_trimmed.starts_with('-') {
                    return Line::Verbatim(raw.to_string());
                }
                match parse_requirement(body_trimmed) {
                    Some(requirement) => Line::Requirement {
                        requirement,
                        comment: comment.map(str::to_string),
                    },
                    None => Line::Verbatim(raw.to_string()),
                }
            })
            .collect();
        Self {
            lines,
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn render(&self) -> String {
        let mut out = self
            .lines
            .iter()
            .map(|line| match line {
                Line::Verbatim(raw) => raw.clone(),
                Line::Requirement {
                    requirement,
                    comment,
                } => match comment {
                    Some(comment) => format!("{}  {comment}", requirement.render()),
                    None => requirement.render(),
                },
            })
            .collect::<Vec<_>>()
            .join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Look up a requirement by name, comparing normalized names.
    pub fn find(&self, name: &str) -> Option<&Requirement> {
        let wanted = normalize_name(name);
        self.requirements()
            .find(|requirement| normalize_name(&requirement.name) == wanted)
    }

    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.lines.iter().filter_map(|line| match line {
            Line::Requirement { requirement, .. } => Some(requirement),
            Line::Verbatim(_) => None,
        })
    }

    /// Swap `source` for `target`.
    ///
    /// The first source entry is rewritten in place (keeping its comment, and
    /// its marker when it is the only entry) or dropped when the target is
    /// already listed. Further source entries, such as per-marker pins, are
    /// dropped. The target is appended when the source was never listed.
    pub fn replace(&mut self, source: &str, target: &str) -> RequirementsChange {
        let source_norm = normalize_name(source);
        let target_listed = self.find(target).is_some();
        let mut change = RequirementsChange::default();

        let positions: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| {
                matches!(line, Line::Requirement { requirement, .. }
                    if normalize_name(&requirement.name) == source_norm)
            })
            .map(|(idx, _)| idx)
            .collect();

        let Some((&first, rest)) = positions.split_first() else {
            if !target_listed {
                self.lines.push(Line::Requirement {
                    requirement: Requirement {
                        name: target.to_string(),
                        extras: Vec::new(),
                        specifier: String::new(),
                        marker: None,
                    },
                    comment: None,
                });
                self.trailing_newline = true;
                change.added = true;
            }
            return change;
        };

        for &idx in &positions {
            if let Line::Requirement { requirement, .. } = &self.lines[idx] {
                if let Some(version) = requirement.pinned_version() {
                    change.source_versions.push(version.to_string());
                }
                if idx == first {
                    change.source_specifier = Some(requirement.specifier.clone())
                        .filter(|specifier| !specifier.is_empty());
                    change.source_version = requirement.pinned_version().map(str::to_string);
                }
            }
        }
        for &idx in rest.iter().rev() {
            self.lines.remove(idx);
        }
        change.duplicates_removed = rest.len();

        if target_listed {
            self.lines.remove(first);
            change.removed = true;
        } else if let Line::Requirement { requirement, .. } = &mut self.lines[first] {
            let marker = if rest.is_empty() {
                requirement.marker.take()
            } else {
                None
            };
            *requirement = Requirement {
                name: target.to_string(),
                extras: Vec::new(),
                specifier: String::new(),
                marker,
            };
            change.replaced = true;
        }
        change
    }
}
