//! Tracking-call injection.
//!
//! Every insertion is same-line text placed at a token boundary, so each
//! original token keeps its line number and the coverage map stays valid
//! against the instrumented file. The only other edit blanks a
//! state-mutability keyword with spaces of the same width. Edits are
//! collected first and applied in one pass at the end.

use std::collections::HashMap;

use crate::builder::Identities;
use crate::dialect::Dialect;
use crate::error::InjectError;
use crate::locator::{Block, Body, ContractKind, SourceUnit, Stmt, StmtKind, Ternary};
use crate::protocol::{self, CoverageEvent};
use crate::scanner::Tokens;

/// A brace-less body rewritten as a block: `{` goes immediately before the
/// statement's first token, `}` immediately after its last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticBlock {
    /// Byte offset of the opening brace.
    pub open_at: usize,
    /// Byte offset of the closing brace.
    pub close_at: usize,
    /// Line the opening brace lands on (the statement's first line).
    pub line: u32,
    /// Line the closing brace lands on (the statement's last line).
    pub end_line: u32,
}

/// Wrap the bare body `stmt` of `owner` (e.g. `branch 3`) in a block.
pub fn wrap_bare(toks: &Tokens<'_>, stmt: &Stmt, owner: &str) -> Result<SyntheticBlock, InjectError> {
    if matches!(stmt.kind, StmtKind::Dangling) {
        return Err(InjectError {
            construct: owner.to_string(),
            message: format!("body starts with a dangling '{}'", toks.text(stmt.first)),
        });
    }
    let (Some(first), Some(last)) = (toks.get(stmt.first), toks.get(stmt.last)) else {
        return Err(InjectError {
            construct: owner.to_string(),
            message: "body lies outside the token stream".to_string(),
        });
    };
    Ok(SyntheticBlock {
        open_at: first.start,
        close_at: last.end,
        line: first.pos.line,
        end_line: last.end_pos.line,
    })
}

/// Replace `remove` bytes at `offset` with `text`. Pure insertions have
/// `remove == 0`.
#[derive(Debug)]
struct Edit {
    offset: usize,
    remove: usize,
    text: String,
}

/// Produce the instrumented text of a located file.
pub fn inject(
    toks: &Tokens<'_>,
    unit: &SourceUnit,
    ids: &Identities,
    file_name: &str,
    dialect: Dialect,
) -> Result<String, InjectError> {
    let mut injector = Injector {
        toks,
        ids,
        file: file_name,
        dialect,
        edits: Vec::new(),
        line_owners: HashMap::new(),
        helper: String::new(),
    };

    let mut claims = HashMap::new();
    for contract in unit.contracts.iter().filter(|c| c.kind != ContractKind::Interface) {
        for body in contract.functions.iter().filter_map(|f| f.body.as_ref()) {
            claim_lines(toks, body, 0, &mut claims);
        }
    }
    injector.line_owners = claims.into_iter().map(|(line, (_, first))| (line, first)).collect();

    for contract in &unit.contracts {
        if contract.kind == ContractKind::Interface {
            continue;
        }
        injector.helper = protocol::ternary_helper_name(&contract.name);
        let mut header = protocol::declarations();
        if contract.has_ternary() {
            header.push_str(&protocol::ternary_helper(dialect, &contract.name));
        }
        injector.after(contract.open, header);

        for function in &contract.functions {
            let Some(body) = &function.body else {
                continue;
            };
            if dialect.strict_mutability {
                // Events cannot be raised from `view`/`pure` functions.
                for &idx in &function.mutability {
                    injector.blank(idx);
                }
            }
            let id = injector.id(ids.function(function.keyword), "function", &function.name)?;
            let hit = CoverageEvent::Function {
                file: file_name.to_string(),
                id: id as u64,
            };
            injector.after(body.open, hit.render(dialect));
            injector.block(body)?;
        }
    }

    tracing::debug!(file = file_name, edits = injector.edits.len(), "injecting");
    injector.apply()
}

/// For every line, the statement that reports it: the first statement
/// starting on that line at the shallowest nesting level, as
/// `line → (depth, first token)`.
fn claim_lines(toks: &Tokens<'_>, block: &Block, depth: u32, claims: &mut HashMap<u32, (u32, usize)>) {
    for stmt in &block.stmts {
        claim_stmt(toks, stmt, depth, claims);
    }
}

fn claim_stmt(toks: &Tokens<'_>, stmt: &Stmt, depth: u32, claims: &mut HashMap<u32, (u32, usize)>) {
    let claim_body = |body: &Body, claims: &mut HashMap<u32, (u32, usize)>| match body {
        Body::Block(block) => claim_lines(toks, block, depth + 1, claims),
        Body::Bare(inner) => claim_stmt(toks, inner, depth + 1, claims),
    };
    match &stmt.kind {
        StmtKind::Block(block) => return claim_lines(toks, block, depth, claims),
        StmtKind::Empty => return,
        _ => {}
    }

    if let Some(tok) = toks.get(stmt.first) {
        let candidate = (depth, stmt.first);
        claims
            .entry(tok.pos.line)
            .and_modify(|held| *held = (*held).min(candidate))
            .or_insert(candidate);
    }
    match &stmt.kind {
        StmtKind::If(chain) => {
            for arm in &chain.arms {
                claim_body(&arm.body, claims);
            }
        }
        StmtKind::Loop(lp) => claim_body(&lp.body, claims),
        _ => {}
    }
}

struct Injector<'t, 'a> {
    toks: &'t Tokens<'a>,
    ids: &'t Identities,
    file: &'t str,
    dialect: Dialect,
    edits: Vec<Edit>,
    /// Line → first token of the statement that raises its line event.
    line_owners: HashMap<u32, usize>,
    /// Ternary helper of the contract being instrumented.
    helper: String,
}

impl Injector<'_, '_> {
    fn id(&self, found: Option<u32>, kind: &str, at: &str) -> Result<u32, InjectError> {
        found.ok_or_else(|| InjectError {
            construct: format!("{kind} at '{at}'"),
            message: "no id was assigned".to_string(),
        })
    }

    fn insert(&mut self, offset: usize, text: String) {
        self.edits.push(Edit {
            offset,
            remove: 0,
            text,
        });
    }

    /// Overwrite token `idx` with spaces.
    fn blank(&mut self, idx: usize) {
        if let Some(tok) = self.toks.get(idx) {
            self.edits.push(Edit {
                offset: tok.start,
                remove: tok.end - tok.start,
                text: " ".repeat(tok.end - tok.start),
            });
        }
    }

    /// Insert right before token `idx`.
    fn before(&mut self, idx: usize, text: String) {
        let offset = self.toks.get(idx).map_or(0, |t| t.start);
        self.insert(offset, text);
    }

    /// Insert right after token `idx`.
    fn after(&mut self, idx: usize, text: String) {
        let offset = self.toks.get(idx).map_or(0, |t| t.end);
        self.insert(offset, text);
    }

    fn block(&mut self, block: &Block) -> Result<(), InjectError> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), InjectError> {
        match &stmt.kind {
            StmtKind::Block(block) => return self.block(block),
            StmtKind::Empty => return Ok(()),
            _ => {}
        }

        let id = self.id(self.ids.statement(stmt.first), "statement", self.toks.text(stmt.first))?;
        if let StmtKind::Dangling = stmt.kind {
            return Err(InjectError {
                construct: format!("statement {id}"),
                message: format!("dangling '{}'", self.toks.text(stmt.first)),
            });
        }

        let mut prefix = String::new();
        let line = self.toks.get(stmt.first).map_or(0, |t| t.pos.line);
        if self.line_owners.get(&line) == Some(&stmt.first) {
            let hit = CoverageEvent::Line {
                file: self.file.to_string(),
                line: line as u64,
            };
            prefix.push_str(&hit.render(self.dialect));
        }
        let hit = CoverageEvent::Statement {
            file: self.file.to_string(),
            id: id as u64,
        };
        prefix.push_str(&hit.render(self.dialect));
        self.before(stmt.first, prefix);

        match &stmt.kind {
            StmtKind::Simple { ternaries } => self.ternaries(ternaries)?,
            StmtKind::If(chain) => {
                let branch = self.id(self.ids.branch(stmt.first), "branch", "if")?;
                for (index, arm) in chain.arms.iter().enumerate() {
                    self.ternaries(&arm.ternaries)?;
                    self.arm_body(&arm.body, branch, index as u64)?;
                }
                if chain.arms.len() == 1 {
                    let hit = self.branch_hit(branch, 1);
                    let text = format!("else{{{}}}", hit.render(self.dialect));
                    self.after(stmt.last, text);
                }
            }
            StmtKind::Loop(lp) => {
                let branch = self.id(self.ids.branch(lp.keyword), "branch", self.toks.text(lp.keyword))?;
                self.ternaries(&lp.ternaries)?;
                self.arm_body(&lp.body, branch, 0)?;
                let exit = self.branch_hit(branch, 1).render(self.dialect);
                self.after(stmt.last, exit);
            }
            StmtKind::Assembly | StmtKind::Block(_) | StmtKind::Empty | StmtKind::Dangling => {}
        }
        Ok(())
    }

    fn branch_hit(&self, id: u32, arm: u64) -> CoverageEvent {
        CoverageEvent::Branch {
            file: self.file.to_string(),
            id: id as u64,
            arm,
        }
    }

    fn arm_body(&mut self, body: &Body, branch: u32, arm: u64) -> Result<(), InjectError> {
        let hit = self.branch_hit(branch, arm).render(self.dialect);
        match body {
            Body::Block(block) => {
                self.after(block.open, hit);
                self.block(block)
            }
            Body::Bare(stmt) => {
                let wrap = wrap_bare(self.toks, stmt, &format!("branch {branch}"))?;
                self.insert(wrap.open_at, format!("{{{hit}"));
                self.stmt(stmt)?;
                self.insert(wrap.close_at, "}".to_string());
                Ok(())
            }
        }
    }

    /// `c ? a : b` becomes `((c) ? hit(0) : !hit(1)) ? a : b`. The helper
    /// always returns true, so the selected arm is unchanged.
    fn ternaries(&mut self, ternaries: &[Ternary]) -> Result<(), InjectError> {
        for t in ternaries {
            let id = self.id(self.ids.branch(t.question), "branch", "?")?;
            let taken = self.branch_hit(id, 0).render_expression(&self.helper);
            let not_taken = self.branch_hit(id, 1).render_expression(&self.helper);
            let (Some(taken), Some(not_taken)) = (taken, not_taken) else {
                continue;
            };
            self.before(t.cond_first, "((".to_string());
            self.after(t.question - 1, format!(") ? {taken} : !{not_taken})"));
        }
        Ok(())
    }

    fn apply(mut self) -> Result<String, InjectError> {
        if let Some(bad) = self.edits.iter().find(|e| e.text.contains('\n')) {
            return Err(InjectError {
                construct: format!("insertion at byte {}", bad.offset),
                message: "injected text would shift line numbers".to_string(),
            });
        }

        // Stable: edits at the same offset keep their push order.
        self.edits.sort_by_key(|e| e.offset);

        let src = self.toks.src();
        let extra: usize = self.edits.iter().map(|e| e.text.len()).sum();
        let mut out = String::with_capacity(src.len() + extra);
        let mut copied = 0;
        for edit in &self.edits {
            out.push_str(&src[copied..edit.offset]);
            out.push_str(&edit.text);
            copied = edit.offset + edit.remove;
        }
        out.push_str(&src[copied..]);
        Ok(out)
    }
}
