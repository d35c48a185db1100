//! Command handler functions for the solcov CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::aggregate::{apply_events, parse_event_log};
use crate::config::Config;
use crate::instrument::instrument_dir;
use crate::model::{CoverageMap, CoverageReport};

/// Instrument the project's contracts. Nothing is written unless every
/// file instruments cleanly.
pub fn cmd_instrument(project: &Path, config: &Config) -> Result<String> {
    let contracts = Config::resolve(project, &config.contracts_dir);
    let instrumented = instrument_dir(&contracts, &config.skip_files)
        .with_context(|| format!("Failed to instrument {}", contracts.display()))?;

    let out_dir = Config::resolve(project, &config.instrumented_dir);
    for file in &instrumented.files {
        let dest = out_dir.join(&file.relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&dest, &file.instrumented.source)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
    }

    let map_file = Config::resolve(project, &config.map_file);
    write_report(&map_file, &instrumented.report)?;

    let mut out = String::new();
    for file in &instrumented.files {
        let map = &file.instrumented.map;
        writeln!(
            out,
            "{:<50} {:>5} statements {:>4} branches {:>4} functions",
            file.relative.display(),
            map.s.len(),
            map.b.len(),
            map.f.len()
        )
        .unwrap();
    }
    for skipped in &instrumented.skipped {
        writeln!(out, "{:<50} skipped", skipped.display()).unwrap();
    }
    writeln!(
        out,
        "Instrumented {} files into {}; coverage map written to {}",
        instrumented.files.len(),
        out_dir.display(),
        map_file.display()
    )
    .unwrap();
    Ok(out)
}

/// Fold the event log into the coverage maps and write the final report.
pub fn cmd_report(project: &Path, config: &Config) -> Result<String> {
    let map_file = Config::resolve(project, &config.map_file);
    let mut report = read_report(&map_file)?;

    let events_file = Config::resolve(project, &config.events_file);
    let text = match std::fs::read_to_string(&events_file) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("No events log produced ({} not found)", events_file.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", events_file.display()))
        }
    };
    let events = parse_event_log(&text)
        .with_context(|| format!("Failed to parse {}", events_file.display()))?;
    if events.is_empty() {
        bail!("No events log produced ({} is empty)", events_file.display());
    }

    let stats = apply_events(&mut report, &events)
        .with_context(|| format!("Failed to aggregate {}", events_file.display()))?;

    let output = Config::resolve(project, &config.output);
    write_report(&output, &report)?;

    let mut out = String::new();
    writeln!(
        out,
        "Applied {} events ({} ignored); report written to {}",
        stats.applied,
        stats.ignored,
        output.display()
    )
    .unwrap();
    out.push_str(&render_summary(&report));
    Ok(out)
}

/// Totals for an aggregated report, followed by a per-file table.
pub fn cmd_summary(report_file: &Path, sort_by_coverage: bool) -> Result<String> {
    let report = read_report(report_file)?;

    let mut out = render_summary(&report);
    let mut files: Vec<_> = report.files.values().map(CoverageMap::summary).collect();
    if sort_by_coverage {
        files.sort_by(|a, b| a.line_rate().total_cmp(&b.line_rate()));
    }

    writeln!(out).unwrap();
    writeln!(
        out,
        "{:<60} {:>8} {:>8} {:>8}",
        "FILE", "LINES", "COVERED", "RATE"
    )
    .unwrap();
    writeln!(out, "{}", "-".repeat(88)).unwrap();
    for f in &files {
        writeln!(
            out,
            "{:<60} {:>8} {:>8} {:>7.1}%",
            f.path,
            f.total_lines,
            f.covered_lines,
            f.line_rate() * 100.0
        )
        .unwrap();
    }
    Ok(out)
}

/// Uncovered runnable lines of one file, as compact ranges.
pub fn cmd_uncovered(report_file: &Path, source_file: &str) -> Result<String> {
    let report = read_report(report_file)?;
    let map = match report.get(source_file) {
        Some(map) => map,
        None => {
            let key = crate::aggregate::resolve_file(&report, source_file)?;
            report
                .get(&key)
                .with_context(|| format!("No coverage data for '{}'", source_file))?
        }
    };

    let uncovered: Vec<u32> = map.l.iter().filter(|(_, h)| **h == 0).map(|(l, _)| *l).collect();
    if uncovered.is_empty() {
        return Ok(format!(
            "All runnable lines are covered in '{}'\n",
            map.path
        ));
    }

    let runnable: Vec<u32> = map.l.keys().copied().collect();
    let mut out = String::new();
    writeln!(out, "Uncovered lines in '{}':", map.path).unwrap();
    writeln!(out, "  {}", format_line_ranges(&uncovered, &runnable)).unwrap();
    writeln!(out, "  ({} lines)", uncovered.len()).unwrap();
    Ok(out)
}

fn render_summary(report: &CoverageReport) -> String {
    let summary = report.summary();

    let mut out = String::new();
    writeln!(out, "Files:       {}", summary.total_files).unwrap();
    writeln!(
        out,
        "Lines:       {}/{} ({:.1}%)",
        summary.covered_lines,
        summary.total_lines,
        summary.line_rate() * 100.0
    )
    .unwrap();
    writeln!(
        out,
        "Statements:  {}/{} ({:.1}%)",
        summary.covered_statements,
        summary.total_statements,
        summary.statement_rate() * 100.0
    )
    .unwrap();
    if summary.total_branches > 0 {
        writeln!(
            out,
            "Branches:    {}/{} ({:.1}%)",
            summary.covered_branches,
            summary.total_branches,
            summary.branch_rate() * 100.0
        )
        .unwrap();
    }
    if summary.total_functions > 0 {
        writeln!(
            out,
            "Functions:   {}/{} ({:.1}%)",
            summary.covered_functions,
            summary.total_functions,
            summary.function_rate() * 100.0
        )
        .unwrap();
    }
    out
}

fn read_report(path: &Path) -> Result<CoverageReport> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_report(path: &Path, report: &CoverageReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Format line numbers into compact range notation, e.g. "1, 3-5, 8".
///
/// Two uncovered lines join into one range when every line between them
/// is non-runnable. Both slices must be sorted.
#[must_use]
pub fn format_line_ranges(lines: &[u32], runnable: &[u32]) -> String {
    let Some((&first, rest)) = lines.split_first() else {
        return String::new();
    };

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    let (mut start, mut end) = (first, first);
    for &line in rest {
        if (end + 1..line).all(|l| runnable.binary_search(&l).is_err()) {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }
    ranges.push((start, end));

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
