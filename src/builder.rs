//! Identity assignment and coverage-map construction.
//!
//! Ids are handed out in one pass over the source-ordered constructs, by
//! one [`IdAllocator`] per category. Nothing else influences numbering, so
//! the same input always yields the same ids; they are the only join key
//! between the static map and the runtime events.

use std::collections::HashMap;

use crate::locator::Construct;
use crate::model::{BranchEntry, CoverageMap, FunctionEntry};

/// Monotonic id source for one construct category, starting at 1.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u32 {
        self.last += 1;
        self.last
    }

    /// Number of ids handed out so far.
    pub fn count(&self) -> u32 {
        self.last
    }
}

/// Construct anchor token → assigned id, per category. The injector uses
/// this to label the tracking calls it synthesizes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Identities {
    functions: HashMap<usize, u32>,
    statements: HashMap<usize, u32>,
    branches: HashMap<usize, u32>,
}

impl Identities {
    pub fn function(&self, anchor: usize) -> Option<u32> {
        self.functions.get(&anchor).copied()
    }

    pub fn statement(&self, anchor: usize) -> Option<u32> {
        self.statements.get(&anchor).copied()
    }

    pub fn branch(&self, anchor: usize) -> Option<u32> {
        self.branches.get(&anchor).copied()
    }
}

/// Assign ids to `constructs` and build the zero-initialized map for
/// `path`.
pub fn build_map(path: &str, constructs: &[Construct]) -> (CoverageMap, Identities) {
    let mut map = CoverageMap::new(path.to_string());
    let mut ids = Identities::default();

    let mut functions = IdAllocator::new();
    let mut statements = IdAllocator::new();
    let mut branches = IdAllocator::new();

    for construct in constructs {
        match construct {
            Construct::FunctionEntry {
                anchor,
                name,
                start,
                loc,
            } => {
                let id = functions.next_id();
                ids.functions.insert(*anchor, id);
                map.fn_map.insert(
                    id,
                    FunctionEntry {
                        name: name.clone(),
                        line: start.line,
                        loc: *loc,
                    },
                );
                map.f.insert(id, 0);
            }
            Construct::Statement { anchor, loc } => {
                let id = statements.next_id();
                ids.statements.insert(*anchor, id);
                map.statement_map.insert(id, *loc);
                map.s.insert(id, 0);
                map.l.insert(loc.start.line, 0);
            }
            Construct::BranchPoint {
                anchor,
                kind,
                start_line,
                arms,
                ..
            } => {
                let id = branches.next_id();
                ids.branches.insert(*anchor, id);
                map.branch_map.insert(
                    id,
                    BranchEntry {
                        line: *start_line,
                        kind: *kind,
                        locations: arms.iter().map(|arm| arm.loc).collect(),
                    },
                );
                map.b.insert(id, vec![0; arms.len()]);
            }
        }
    }

    tracing::debug!(
        path,
        functions = functions.count(),
        statements = statements.count(),
        branches = branches.count(),
        lines = map.l.len(),
        "built coverage map"
    );

    (map, ids)
}
