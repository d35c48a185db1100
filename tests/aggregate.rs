mod common;

use solcov::aggregate::{apply_events, parse_event_log};
use solcov::error::{AggregationError, SolcovError};
use solcov::instrument::instrument_dir;
use solcov::model::CoverageReport;
use solcov::protocol::CoverageEvent;

fn simple_report() -> (tempfile::TempDir, CoverageReport) {
    let dir = common::setup_project(&["Simple.sol"]);
    let project = instrument_dir(&dir.path().join("contracts"), &[]).unwrap();
    (dir, project.report)
}

fn simple(kind: &str, id: u64) -> CoverageEvent {
    let file = "Simple.sol".to_string();
    match kind {
        "line" => CoverageEvent::Line { file, line: id },
        "function" => CoverageEvent::Function { file, id },
        _ => CoverageEvent::Statement { file, id },
    }
}

#[test]
fn event_log_round_trip_through_disk() {
    let (dir, mut report) = simple_report();
    let log = dir.path().join("allFiredEvents");
    common::write_event_log(
        &log,
        &[
            simple("function", 1),
            simple("line", 7),
            simple("statement", 1),
            simple("function", 2),
            simple("line", 11),
            simple("statement", 2),
        ],
    );

    let events = parse_event_log(&std::fs::read_to_string(&log).unwrap()).unwrap();
    assert_eq!(events.len(), 6);
    apply_events(&mut report, &events).unwrap();

    let map = report.files.values().next().unwrap();
    assert_eq!(map.f[&map.function_id("test").unwrap()], 1);
    assert_eq!(map.f[&map.function_id("getX").unwrap()], 1);
    assert!(map.l.values().all(|h| *h == 1));
    assert!(map.s.values().all(|h| *h == 1));
    assert_eq!(report.summary().line_rate(), 1.0);
}

#[test]
fn applying_twice_doubles() {
    let (_dir, mut report) = simple_report();
    let events: Vec<_> = [simple("line", 7), simple("statement", 1), simple("function", 1)]
        .iter()
        .map(CoverageEvent::to_raw)
        .collect();

    apply_events(&mut report, &events).unwrap();
    apply_events(&mut report, &events).unwrap();

    let map = report.files.values().next().unwrap();
    assert_eq!(map.l[&7], 2);
    assert_eq!(map.s[&1], 2);
    assert_eq!(map.f[&1], 2);
    assert_eq!(map.l[&11], 0);
}

#[test]
fn bad_statement_id_aborts() {
    let (_dir, mut report) = simple_report();
    let before = report.clone();
    let events: Vec<_> = [simple("statement", 1), simple("statement", 3)]
        .iter()
        .map(CoverageEvent::to_raw)
        .collect();

    let err = apply_events(&mut report, &events).unwrap_err();
    assert!(matches!(
        err,
        SolcovError::Aggregation(AggregationError::UnknownId { kind: "statement", id: 3, .. })
    ));
    assert_eq!(report, before);
}

#[test]
fn line_event_on_non_runnable_line_aborts() {
    let (_dir, mut report) = simple_report();
    let err = apply_events(&mut report, &[simple("line", 3).to_raw()]).unwrap_err();
    assert!(matches!(
        err,
        SolcovError::Aggregation(AggregationError::UnknownId { kind: "line", .. })
    ));
}
