//! Language-version marker and the syntax differences it implies for
//! injected code.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LanguageVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl LanguageVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// First `MAJOR.MINOR.PATCH` triple in a pragma, e.g. `^0.4.3` or
    /// `>=0.4.22 <0.6.0`.
    pub fn from_pragma(pragma: &str) -> Option<Self> {
        static VERSION: OnceLock<Regex> = OnceLock::new();
        let re = VERSION.get_or_init(|| {
            Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("version regex is valid")
        });
        let caps = re.captures(pragma)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

impl std::fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Syntax switches for generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dialect {
    /// Events are raised with `emit` (0.4.21+).
    pub emit: bool,
    /// Reference-type parameters need an explicit `memory` (0.5.0+).
    pub memory_strings: bool,
    /// Raising an event from a `view`/`pure` function is an error (0.5.0+).
    pub strict_mutability: bool,
}

impl Dialect {
    /// Files without a version marker get the oldest syntax.
    pub fn for_version(version: Option<LanguageVersion>) -> Self {
        match version {
            Some(v) => Self {
                emit: v >= LanguageVersion::new(0, 4, 21),
                memory_strings: v >= LanguageVersion::new(0, 5, 0),
                strict_mutability: v >= LanguageVersion::new(0, 5, 0),
            },
            None => Self::default(),
        }
    }
}
