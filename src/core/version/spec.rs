// ─── Version Spec ───
// Classifies a version request as a sentinel, an exact version or a range.

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};

use crate::core::error::{NovmError, NovmResult};

use super::catalog::CatalogEntry;

/// How a catalog entry relates to a spec.
///
/// `Less`/`Equal`/`Greater` come from exact specs and describe the entry
/// relative to the requested version; ranges and sentinels only answer
/// `Satisfies`/`DoesNotSatisfy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less,
    Equal,
    Greater,
    Satisfies,
    DoesNotSatisfy,
}

impl Comparison {
    /// Whether the entry is a candidate for the request.
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Equal | Comparison::Satisfies)
    }
}

/// A parsed version request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Latest,
    Lts,
    Exact(Version),
    Range(VersionRange),
}

impl VersionSpec {
    /// `latest` and `lts` map to sentinels; anything else is tried as an
    /// exact version (leading `v` optional) and then as a range.
    pub fn parse(input: &str) -> NovmResult<Self> {
        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "latest" | "current" | "node" => return Ok(VersionSpec::Latest),
            "lts" | "lts/*" => return Ok(VersionSpec::Lts),
            _ => {}
        }

        let exact_err = match parse_exact(trimmed) {
            Ok(version) => return Ok(VersionSpec::Exact(version)),
            Err(e) => e,
        };

        match VersionRange::parse(trimmed) {
            Ok(range) => Ok(VersionSpec::Range(range)),
            Err(range_err) => Err(NovmError::InvalidVersionSpec {
                input: input.to_string(),
                exact: exact_err.to_string(),
                range: range_err.to_string(),
            }),
        }
    }

    /// Sentinels always resolve against current releases.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, VersionSpec::Latest | VersionSpec::Lts)
    }

    pub fn compare(&self, entry: &CatalogEntry) -> Comparison {
        match self {
            VersionSpec::Latest => Comparison::Satisfies,
            VersionSpec::Lts => {
                if entry.is_lts() {
                    Comparison::Satisfies
                } else {
                    Comparison::DoesNotSatisfy
                }
            }
            VersionSpec::Exact(wanted) => match entry.semver() {
                Some(version) => match version.cmp(wanted) {
                    std::cmp::Ordering::Less => Comparison::Less,
                    std::cmp::Ordering::Equal => Comparison::Equal,
                    std::cmp::Ordering::Greater => Comparison::Greater,
                },
                None => Comparison::DoesNotSatisfy,
            },
            VersionSpec::Range(range) => match entry.semver() {
                Some(version) if range.matches(&version) => Comparison::Satisfies,
                _ => Comparison::DoesNotSatisfy,
            },
        }
    }
}

impl FromStr for VersionSpec {
    type Err = NovmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => f.write_str("latest"),
            VersionSpec::Lts => f.write_str("lts"),
            VersionSpec::Exact(version) => write!(f, "v{version}"),
            VersionSpec::Range(range) => f.write_str(range.as_str()),
        }
    }
}

fn parse_exact(input: &str) -> Result<Version, semver::Error> {
    let raw = input.strip_prefix('v').unwrap_or(input);
    Version::parse(raw)
}

/// An npm-style range: `||`-separated alternatives, each a set of
/// comparators (`^16`, `~18.2`, `>=14 <16`, `16.x`, `1.2.3 - 2.3.4`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self, semver::Error> {
        let alternatives = input
            .split("||")
            .map(|alternative| VersionReq::parse(&to_cargo_syntax(alternative)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: input.trim().to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Rewrite one npm comparator set into the comma-separated syntax the
/// `semver` crate understands.
///
/// Bare versions keep npm meaning: `16` and `16.1` are wildcards, `16.1.0`
/// is an exact pin.
fn to_cargo_syntax(alternative: &str) -> String {
    let alternative = alternative.trim();
    if alternative.is_empty() {
        return "*".to_string();
    }

    if let Some((low, high)) = alternative.split_once(" - ") {
        return format!(
            ">={}, <={}",
            strip_v(low.trim()),
            strip_v(high.trim())
        );
    }

    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alternative.split_whitespace() {
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }
        if token.chars().all(is_operator_char) {
            pending_op.push_str(token);
            continue;
        }
        let joined = format!("{pending_op}{token}");
        pending_op.clear();
        comparators.push(normalize_comparator(&joined));
    }

    if comparators.is_empty() {
        return "*".to_string();
    }
    comparators.join(", ")
}

fn normalize_comparator(token: &str) -> String {
    let split = token
        .find(|c: char| !is_operator_char(c))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(split);
    let version = strip_v(version).replace(['x', 'X'], "*");

    if !op.is_empty() {
        return format!("{op}{version}");
    }

    if version.contains('*') {
        return version;
    }

    match version.split('.').count() {
        1 | 2 => format!("{version}.*"),
        _ => format!("={version}"),
    }
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '^' | '~' | '<' | '>' | '=')
}
