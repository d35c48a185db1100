//! Per-file instrumentation pipeline and the project-level walk over a
//! contracts directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::builder::build_map;
use crate::dialect::{Dialect, LanguageVersion};
use crate::error::{Result, SolcovError};
use crate::inject::inject;
use crate::locator::{constructs, locate};
use crate::model::{CoverageMap, CoverageReport};
use crate::scanner::scan;

/// A source file as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Canonical absolute path; the coverage map is keyed by it.
    pub path: String,
    pub text: String,
}

impl SourceFile {
    pub fn read(path: &Path) -> Result<Self> {
        let canonical = std::fs::canonicalize(path)?;
        let text = std::fs::read_to_string(&canonical)?;
        Ok(Self {
            path: canonical.to_string_lossy().into_owned(),
            text,
        })
    }

    /// File name as carried by the injected tracking calls.
    pub fn file_name(&self) -> &str {
        base_name(&self.path)
    }
}

/// Output of instrumenting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumented {
    pub source: String,
    pub map: CoverageMap,
    /// Version marker from the file's `pragma solidity`, if any.
    pub version: Option<LanguageVersion>,
}

/// Instrument `source`, building its coverage map under `file_name`.
///
/// With `inject` false the text comes back unchanged but the map is still
/// built, so a caller can inspect the constructs without rewriting.
pub fn instrument(source: &str, file_name: &str, inject_calls: bool) -> Result<Instrumented> {
    let toks = scan(source)?;
    let unit = locate(&toks)?;
    let found = constructs(&toks, &unit);
    let (map, ids) = build_map(file_name, &found);

    let version = unit.pragma.as_deref().and_then(LanguageVersion::from_pragma);
    let source = if inject_calls {
        inject(&toks, &unit, &ids, base_name(file_name), Dialect::for_version(version))?
    } else {
        source.to_string()
    };

    Ok(Instrumented {
        source,
        map,
        version,
    })
}

pub fn instrument_file(file: &SourceFile) -> Result<Instrumented> {
    let out = instrument(&file.text, &file.path, true)?;
    tracing::info!(
        path = %file.path,
        version = ?out.version.map(|v| v.to_string()),
        statements = out.map.s.len(),
        branches = out.map.b.len(),
        functions = out.map.f.len(),
        "instrumented"
    );
    Ok(out)
}

/// One instrumented file of a project, with its path relative to the
/// contracts directory.
#[derive(Debug)]
pub struct ProjectFile {
    pub relative: PathBuf,
    pub instrumented: Instrumented,
}

/// Every instrumented file plus the zeroed report keyed by canonical path.
#[derive(Debug, Default)]
pub struct InstrumentedProject {
    pub files: Vec<ProjectFile>,
    pub report: CoverageReport,
    pub skipped: Vec<PathBuf>,
}

/// Instrument every `.sol` file under `dir`, skipping entries of `skip`
/// (matched against the file name or the path relative to `dir`). The
/// first failing file aborts the whole walk, as do two instrumented files
/// with the same file name in different directories.
pub fn instrument_dir(dir: &Path, skip: &[String]) -> Result<InstrumentedProject> {
    let mut paths = Vec::new();
    collect_sources(dir, &mut paths)?;
    paths.sort();

    let mut project = InstrumentedProject::default();
    let mut names: HashMap<String, PathBuf> = HashMap::new();
    let mut pending = Vec::new();
    for path in paths {
        let relative = path.strip_prefix(dir).unwrap_or(&path).to_path_buf();
        if is_skipped(&relative, skip) {
            tracing::debug!(path = %relative.display(), "skipping");
            project.skipped.push(relative);
            continue;
        }
        let name = relative.file_name().map(|n| n.to_string_lossy().into_owned());
        if let Some(name) = name {
            if let Some(first) = names.get(&name) {
                return Err(SolcovError::DuplicateFileName {
                    name,
                    first: first.clone(),
                    second: relative,
                });
            }
            names.insert(name, relative.clone());
        }
        pending.push((path, relative));
    }

    for (path, relative) in pending {
        let file = SourceFile::read(&path)?;
        let instrumented = instrument_file(&file)?;
        project.report.insert(instrumented.map.clone());
        project.files.push(ProjectFile {
            relative,
            instrumented,
        });
    }
    Ok(project)
}

fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sources(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "sol") {
            out.push(path);
        }
    }
    Ok(())
}

fn is_skipped(relative: &Path, skip: &[String]) -> bool {
    let name = relative.file_name().map(|n| n.to_string_lossy());
    let rel = relative.to_string_lossy().replace('\\', "/");
    skip.iter()
        .any(|s| name.as_deref() == Some(s.as_str()) || rel == s.trim_start_matches("./"))
}

/// Last path component of `path`, accepting either separator.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolcovError;

    const SIMPLE: &str = "pragma solidity ^0.4.3;
contract Simple {
    uint x = 0;
    function test(uint val) {
        x = x + val;
    }
    function getX() returns (uint) {
        return x;
    }
}";

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/p/contracts/Simple.sol"), "Simple.sol");
        assert_eq!(base_name("C:\\p\\Simple.sol"), "Simple.sol");
        assert_eq!(base_name("Simple.sol"), "Simple.sol");
    }

    #[test]
    fn test_instrument_without_injection_returns_source() {
        let out = instrument(SIMPLE, "/p/Simple.sol", false).unwrap();
        assert_eq!(out.source, SIMPLE);
        assert_eq!(out.map.path, "/p/Simple.sol");
        assert_eq!(out.map.s.len(), 2);
        assert_eq!(out.version, Some(LanguageVersion::new(0, 4, 3)));
    }

    #[test]
    fn test_instrument_uses_basename_in_calls() {
        let out = instrument(SIMPLE, "/p/Simple.sol", true).unwrap();
        assert!(out.source.contains("__StatementCoverage(\"Simple.sol\",1);"));
        assert!(!out.source.contains("/p/Simple.sol"));
        assert!(!out.source.contains("emit "));
    }

    #[test]
    fn test_instrument_picks_dialect_from_pragma() {
        let src = SIMPLE.replace("^0.4.3", "^0.5.0");
        let out = instrument(&src, "Simple.sol", true).unwrap();
        assert!(out.source.contains("emit __FunctionCoverage(\"Simple.sol\",1);"));
    }

    #[test]
    fn test_instrument_reports_stage_errors() {
        let err = instrument("contract A { string s = \"open; }", "A.sol", true).unwrap_err();
        assert!(matches!(err, SolcovError::Scan(_)));

        let err = instrument("contract A { function f() { ", "A.sol", true).unwrap_err();
        assert!(matches!(err, SolcovError::Locate(_)));
    }

    #[test]
    fn test_instrument_dir_rejects_shared_file_names() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["a", "b"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join("Token.sol"), SIMPLE).unwrap();
        }

        let err = instrument_dir(dir.path(), &[]).unwrap_err();
        match err {
            SolcovError::DuplicateFileName {
                name,
                first,
                second,
            } => {
                assert_eq!(name, "Token.sol");
                assert_eq!(first, Path::new("a/Token.sol"));
                assert_eq!(second, Path::new("b/Token.sol"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Skipping one of them resolves the clash.
        let project = instrument_dir(dir.path(), &["b/Token.sol".to_string()]).unwrap();
        assert_eq!(project.files.len(), 1);
        assert_eq!(project.skipped, vec![PathBuf::from("b/Token.sol")]);
    }

    #[test]
    fn test_is_skipped() {
        let skip = vec!["Migrations.sol".to_string(), "lib/Math.sol".to_string()];
        assert!(is_skipped(Path::new("Migrations.sol"), &skip));
        assert!(is_skipped(Path::new("sub/Migrations.sol"), &skip));
        assert!(is_skipped(Path::new("lib/Math.sol"), &skip));
        assert!(!is_skipped(Path::new("Math.sol"), &skip));
    }
}
