//! Coverage data in the Istanbul `coverage.json` shape. The instrumenter
//! produces a zeroed `CoverageMap` per source file; the aggregator fills in
//! the hit counters; report renderers consume the serialized form as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A `[start, end)` span in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub start: Position,
    pub end: Position,
}

/// A `fnMap` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    /// Line of the signature; the function's identity is anchored here.
    pub line: u32,
    pub loc: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchKind {
    If,
    CondExpr,
    Loop,
}

impl BranchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchKind::If => "if",
            BranchKind::CondExpr => "cond-expr",
            BranchKind::Loop => "loop",
        }
    }
}

/// A `branchMap` entry. `locations` has one span per arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEntry {
    pub line: u32,
    #[serde(rename = "type")]
    pub kind: BranchKind,
    pub locations: Vec<Location>,
}

impl BranchEntry {
    pub fn arm_count(&self) -> usize {
        self.locations.len()
    }
}

/// Static structure and hit counters for one source file.
///
/// Map keys serialize as strings (`"1"`, `"2"`, ...) which is what Istanbul
/// tooling expects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoverageMap {
    /// Runnable line number → hits.
    pub l: BTreeMap<u32, u64>,
    /// Statement id → hits.
    pub s: BTreeMap<u32, u64>,
    /// Branch id → per-arm hits.
    pub b: BTreeMap<u32, Vec<u64>>,
    /// Function id → hits.
    pub f: BTreeMap<u32, u64>,
    #[serde(rename = "fnMap")]
    pub fn_map: BTreeMap<u32, FunctionEntry>,
    #[serde(rename = "statementMap")]
    pub statement_map: BTreeMap<u32, Location>,
    #[serde(rename = "branchMap")]
    pub branch_map: BTreeMap<u32, BranchEntry>,
    pub path: String,
}

impl CoverageMap {
    pub fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    /// Look up a function id by name (first match in id order).
    pub fn function_id(&self, name: &str) -> Option<u32> {
        self.fn_map
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    pub fn summary(&self) -> FileSummary {
        let (total_branches, covered_branches) =
            self.b.values().fold((0u64, 0u64), |(total, covered), arms| {
                (
                    total + arms.len() as u64,
                    covered + arms.iter().filter(|h| **h > 0).count() as u64,
                )
            });
        FileSummary {
            path: self.path.clone(),
            total_lines: self.l.len() as u64,
            covered_lines: count_hit(self.l.values()),
            total_statements: self.s.len() as u64,
            covered_statements: count_hit(self.s.values()),
            total_branches,
            covered_branches,
            total_functions: self.f.len() as u64,
            covered_functions: count_hit(self.f.values()),
        }
    }
}

fn count_hit<'a>(hits: impl Iterator<Item = &'a u64>) -> u64 {
    hits.filter(|h| **h > 0).count() as u64
}

/// Canonical path → coverage map. Serializes as a bare JSON object, the
/// same shape as Istanbul's `coverage.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageReport {
    pub files: BTreeMap<String, CoverageMap>,
}

impl CoverageReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a map under its own `path`, replacing any previous entry.
    pub fn insert(&mut self, map: CoverageMap) {
        self.files.insert(map.path.clone(), map);
    }

    pub fn get(&self, path: &str) -> Option<&CoverageMap> {
        self.files.get(path)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for file in self.files.values().map(CoverageMap::summary) {
            summary.total_files += 1;
            summary.total_lines += file.total_lines;
            summary.covered_lines += file.covered_lines;
            summary.total_statements += file.total_statements;
            summary.covered_statements += file.covered_statements;
            summary.total_branches += file.total_branches;
            summary.covered_branches += file.covered_branches;
            summary.total_functions += file.total_functions;
            summary.covered_functions += file.covered_functions;
        }
        summary
    }
}

/// Summary stats across every file in a report.
#[derive(Debug, Default)]
pub struct ReportSummary {
    pub total_files: u64,
    pub total_lines: u64,
    pub covered_lines: u64,
    pub total_statements: u64,
    pub covered_statements: u64,
    pub total_branches: u64,
    pub covered_branches: u64,
    pub total_functions: u64,
    pub covered_functions: u64,
}

impl ReportSummary {
    #[must_use]
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }

    #[must_use]
    pub fn statement_rate(&self) -> f64 {
        rate(self.covered_statements, self.total_statements)
    }

    #[must_use]
    pub fn branch_rate(&self) -> f64 {
        rate(self.covered_branches, self.total_branches)
    }

    #[must_use]
    pub fn function_rate(&self) -> f64 {
        rate(self.covered_functions, self.total_functions)
    }
}

/// Per-file summary row.
#[derive(Debug)]
pub struct FileSummary {
    pub path: String,
    pub total_lines: u64,
    pub covered_lines: u64,
    pub total_statements: u64,
    pub covered_statements: u64,
    pub total_branches: u64,
    pub covered_branches: u64,
    pub total_functions: u64,
    pub covered_functions: u64,
}

impl FileSummary {
    #[must_use]
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> Location {
        Location {
            start: Position { line, column: 0 },
            end: Position { line, column: 5 },
        }
    }

    #[test]
    fn test_map_serializes_istanbul_keys() {
        let mut map = CoverageMap::new("/p/Simple.sol".to_string());
        map.l.insert(4, 0);
        map.s.insert(1, 0);
        map.statement_map.insert(1, loc(4));
        map.b.insert(1, vec![0, 0]);

        let json = serde_json::to_value(&map).unwrap();
        for key in ["l", "s", "b", "f", "fnMap", "statementMap", "branchMap", "path"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(json["l"]["4"], 0);
        assert_eq!(json["b"]["1"], serde_json::json!([0, 0]));
        assert_eq!(json["statementMap"]["1"]["start"]["line"], 4);
    }

    #[test]
    fn test_map_json_round_trip_with_string_keys() {
        let mut map = CoverageMap::new("a.sol".to_string());
        map.f.insert(2, 7);
        map.fn_map.insert(
            2,
            FunctionEntry {
                name: "getX".to_string(),
                line: 3,
                loc: loc(3),
            },
        );
        let text = serde_json::to_string(&map).unwrap();
        let back: CoverageMap = serde_json::from_str(&text).unwrap();
        assert_eq!(back, map);
        assert_eq!(back.function_id("getX"), Some(2));
    }

    #[test]
    fn test_summary_counts_arms() {
        let mut map = CoverageMap::new("a.sol".to_string());
        map.l.insert(1, 3);
        map.l.insert(2, 0);
        map.b.insert(1, vec![1, 0]);
        map.b.insert(2, vec![0, 0, 4]);
        map.f.insert(1, 1);

        let summary = map.summary();
        assert_eq!(summary.total_lines, 2);
        assert_eq!(summary.covered_lines, 1);
        assert_eq!(summary.total_branches, 5);
        assert_eq!(summary.covered_branches, 2);
        assert_eq!(summary.covered_functions, 1);
        assert!((summary.line_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_zero_total() {
        assert_eq!(rate(0, 0), 0.0);
    }
}
