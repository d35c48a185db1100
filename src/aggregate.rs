//! Folding a recorded event log into coverage maps.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{AggregationError, Result, SolcovError};
use crate::model::{CoverageMap, CoverageReport};
use crate::protocol::{CoverageEvent, RawEvent};

/// Parse an event log: one JSON record per line, blank lines ignored.
pub fn parse_event_log(text: &str) -> Result<Vec<RawEvent>> {
    let mut events = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = serde_json::from_str(line).map_err(|e| SolcovError::EventLog {
            line: idx + 1,
            message: e.to_string(),
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Counts from one [`apply_events`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStats {
    /// Coverage events folded into the report.
    pub applied: usize,
    /// Records whose discriminator is not a coverage kind.
    pub ignored: usize,
}

/// Fold `events` into `report`.
///
/// The whole log is decoded and checked against the maps first; counters
/// are only touched once every event resolves, so on error `report` is
/// left exactly as it was. Applying the same log twice doubles every count.
pub fn apply_events(report: &mut CoverageReport, events: &[RawEvent]) -> Result<AggregateStats> {
    let mut stats = AggregateStats::default();
    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut hits: Vec<(String, CoverageEvent)> = Vec::with_capacity(events.len());

    for raw in events {
        let Some(event) = raw.decode()? else {
            stats.ignored += 1;
            continue;
        };
        let path = match resolved.get(event.file()) {
            Some(path) => path.clone(),
            None => {
                let path = resolve_file(report, event.file())?;
                resolved.insert(event.file().to_string(), path.clone());
                path
            }
        };
        if let Some(map) = report.files.get(&path) {
            check_event(map, &event)?;
        }
        hits.push((path, event));
    }

    for (path, event) in &hits {
        if let Some(map) = report.files.get_mut(path) {
            record(map, event);
        }
    }
    stats.applied = hits.len();

    tracing::info!(
        applied = stats.applied,
        ignored = stats.ignored,
        files = resolved.len(),
        "aggregated event log"
    );
    Ok(stats)
}

/// Resolve an event's file name to a report key: exact match first, then
/// a unique basename match.
pub fn resolve_file(report: &CoverageReport, name: &str) -> std::result::Result<String, AggregationError> {
    if report.files.contains_key(name) {
        return Ok(name.to_string());
    }
    let candidates: Vec<String> = report
        .files
        .keys()
        .filter(|key| Path::new(key).file_name().is_some_and(|n| n.to_string_lossy() == name))
        .cloned()
        .collect();
    match candidates.len() {
        0 => Err(AggregationError::UnknownFile(name.to_string())),
        1 => Ok(candidates.into_iter().next().unwrap_or_default()),
        _ => Err(AggregationError::AmbiguousFile {
            name: name.to_string(),
            candidates,
        }),
    }
}

fn check_event(map: &CoverageMap, event: &CoverageEvent) -> std::result::Result<(), AggregationError> {
    let unknown = |kind: &'static str, id: u64| AggregationError::UnknownId {
        path: map.path.clone(),
        kind,
        id,
    };
    let key = |id: u64| u32::try_from(id).ok();

    match event {
        CoverageEvent::Line { line, .. } => key(*line)
            .filter(|k| map.l.contains_key(k))
            .map(|_| ())
            .ok_or_else(|| unknown("line", *line)),
        CoverageEvent::Function { id, .. } => key(*id)
            .filter(|k| map.f.contains_key(k))
            .map(|_| ())
            .ok_or_else(|| unknown("function", *id)),
        CoverageEvent::Statement { id, .. } => key(*id)
            .filter(|k| map.s.contains_key(k))
            .map(|_| ())
            .ok_or_else(|| unknown("statement", *id)),
        CoverageEvent::Branch { id, arm, .. } => {
            let arms = key(*id)
                .and_then(|k| map.b.get(&k))
                .ok_or_else(|| unknown("branch", *id))?;
            if usize::try_from(*arm).map_or(true, |a| a >= arms.len()) {
                return Err(AggregationError::ArmOutOfRange {
                    path: map.path.clone(),
                    id: *id,
                    arm: *arm,
                    arms: arms.len(),
                });
            }
            Ok(())
        }
    }
}

/// Increment the counter `event` names. Only called on checked events.
fn record(map: &mut CoverageMap, event: &CoverageEvent) {
    let Ok(id) = u32::try_from(event.id()) else {
        return;
    };
    match event {
        CoverageEvent::Line { .. } => {
            if let Some(hits) = map.l.get_mut(&id) {
                *hits += 1;
            }
        }
        CoverageEvent::Function { .. } => {
            if let Some(hits) = map.f.get_mut(&id) {
                *hits += 1;
            }
        }
        CoverageEvent::Statement { .. } => {
            if let Some(hits) = map.s.get_mut(&id) {
                *hits += 1;
            }
        }
        CoverageEvent::Branch { arm, .. } => {
            let arm = usize::try_from(*arm).unwrap_or(usize::MAX);
            if let Some(hits) = map.b.get_mut(&id).and_then(|arms| arms.get_mut(arm)) {
                *hits += 1;
            }
        }
    }
}
