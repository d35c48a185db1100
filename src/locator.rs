//! Construct locator.
//!
//! Walks the token stream and recovers just enough structure to instrument
//! a file: contracts, function-like members and their bodies, the
//! statements inside those bodies, and every branching construct (`if`
//! chains, loops, ternaries). Everything else (types, expressions,
//! declarations outside functions) is skipped by delimiter matching.
//!
//! The tree produced by [`locate`] refers to tokens by index. [`constructs`]
//! flattens it into the source-ordered [`Construct`] list that ids are
//! assigned from.

use crate::error::LocateError;
use crate::model::{BranchKind, Location, Position};
use crate::scanner::{Delim, TokenKind, Tokens};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Contract,
    Library,
    Interface,
}

#[derive(Debug)]
pub struct SourceUnit {
    /// Text of the first `pragma solidity` directive, without the keywords
    /// and the trailing `;` (e.g. `^0.4.3`).
    pub pragma: Option<String>,
    pub contracts: Vec<ContractDef>,
}

#[derive(Debug)]
pub struct ContractDef {
    pub kind: ContractKind,
    pub name: String,
    /// Index of the body's `{`.
    pub open: usize,
    pub close: usize,
    pub functions: Vec<FunctionDef>,
}

impl ContractDef {
    pub fn has_ternary(&self) -> bool {
        self.functions
            .iter()
            .filter_map(|f| f.body.as_ref())
            .any(Block::has_ternary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Function,
    Constructor,
    Fallback,
    Modifier,
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: String,
    pub kind: FunctionKind,
    /// Index of the `function` / `modifier` / `constructor` keyword.
    pub keyword: usize,
    /// State-mutability keywords in the header (`view`, `pure`, `constant`).
    pub mutability: Vec<usize>,
    /// `None` for body-less (interface style) declarations.
    pub body: Option<Block>,
}

#[derive(Debug)]
pub struct Block {
    pub open: usize,
    pub close: usize,
    pub stmts: Vec<Stmt>,
}

impl Block {
    fn has_ternary(&self) -> bool {
        self.stmts.iter().any(Stmt::has_ternary)
    }
}

#[derive(Debug)]
pub struct Stmt {
    pub first: usize,
    pub last: usize,
    pub kind: StmtKind,
}

impl Stmt {
    /// Whether the statement is a construct of its own. Nested blocks and
    /// empty statements are not.
    pub fn is_runnable(&self) -> bool {
        !matches!(self.kind, StmtKind::Block(_) | StmtKind::Empty)
    }

    fn has_ternary(&self) -> bool {
        match &self.kind {
            StmtKind::Simple { ternaries } => !ternaries.is_empty(),
            StmtKind::Block(block) => block.has_ternary(),
            StmtKind::If(chain) => chain
                .arms
                .iter()
                .any(|arm| !arm.ternaries.is_empty() || arm.body.has_ternary()),
            StmtKind::Loop(lp) => !lp.ternaries.is_empty() || lp.body.has_ternary(),
            StmtKind::Assembly | StmtKind::Empty | StmtKind::Dangling => false,
        }
    }
}

#[derive(Debug)]
pub enum StmtKind {
    /// Expression, declaration or jump statement terminated by `;`.
    Simple { ternaries: Vec<Ternary> },
    /// Nested `{ ... }` (or `unchecked { ... }`).
    Block(Block),
    If(IfChain),
    Loop(Loop),
    /// Inline assembly, kept opaque.
    Assembly,
    /// A lone `;`.
    Empty,
    /// A flow-control keyword sitting where a body was expected,
    /// e.g. the `else` in `if (x) else y();`.
    Dangling,
}

/// A direct `if` / `else if` / `else` chain.
#[derive(Debug)]
pub struct IfChain {
    pub arms: Vec<IfArm>,
}

impl IfChain {
    pub fn has_else(&self) -> bool {
        self.arms.last().is_some_and(|arm| arm.cond.is_none())
    }
}

#[derive(Debug)]
pub struct IfArm {
    /// The `if` token, or the `else` token for a trailing else.
    pub keyword: usize,
    /// Condition parentheses; `None` for the trailing else.
    pub cond: Option<(usize, usize)>,
    pub ternaries: Vec<Ternary>,
    pub body: Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    For,
    While,
    DoWhile,
}

#[derive(Debug)]
pub struct Loop {
    pub kind: LoopKind,
    pub keyword: usize,
    /// Header parentheses (for `do`, the ones after `while`).
    pub header: (usize, usize),
    pub ternaries: Vec<Ternary>,
    pub body: Body,
}

#[derive(Debug)]
pub enum Body {
    Block(Block),
    /// A single statement without enclosing braces.
    Bare(Box<Stmt>),
}

impl Body {
    pub fn first(&self) -> usize {
        match self {
            Body::Block(block) => block.open,
            Body::Bare(stmt) => stmt.first,
        }
    }

    pub fn last(&self) -> usize {
        match self {
            Body::Block(block) => block.close,
            Body::Bare(stmt) => stmt.last,
        }
    }

    fn has_ternary(&self) -> bool {
        match self {
            Body::Block(block) => block.has_ternary(),
            Body::Bare(stmt) => stmt.has_ternary(),
        }
    }
}

/// `cond ? a : b`, by token index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ternary {
    pub cond_first: usize,
    pub question: usize,
    pub colon: usize,
    pub false_last: usize,
}

/// Locate every construct in a scanned file.
pub fn locate(toks: &Tokens<'_>) -> Result<SourceUnit, LocateError> {
    let pairs = pair_delimiters(toks)?;
    Locator { toks, pairs }.source_unit()
}

/// Match every bracket with its partner. Entry `i` holds the index of the
/// partner of token `i`, or `usize::MAX` for non-bracket tokens.
fn pair_delimiters(toks: &Tokens<'_>) -> Result<Vec<usize>, LocateError> {
    let mut pairs = vec![usize::MAX; toks.len()];
    let mut stack: Vec<usize> = Vec::new();

    for (idx, tok) in toks.iter().enumerate() {
        match tok.kind {
            TokenKind::Open(_) => stack.push(idx),
            TokenKind::Close(delim) => {
                let Some(open) = stack.pop() else {
                    return Err(error_at(toks, idx, format!("unmatched '{}'", toks.text(idx))));
                };
                if toks.get(open).map(|t| t.kind) != Some(TokenKind::Open(delim)) {
                    let opened = toks.get(open).map(|t| t.pos).unwrap_or_default();
                    return Err(error_at(
                        toks,
                        idx,
                        format!(
                            "'{}' does not close '{}' opened at {}:{}",
                            toks.text(idx),
                            toks.text(open),
                            opened.line,
                            opened.column
                        ),
                    ));
                }
                pairs[open] = idx;
                pairs[idx] = open;
            }
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        let opened = toks.get(open).map(|t| t.pos).unwrap_or_default();
        return Err(error_at(
            toks,
            toks.len(),
            format!(
                "'{}' opened at {}:{} is never closed",
                toks.text(open),
                opened.line,
                opened.column
            ),
        ));
    }
    Ok(pairs)
}

/// Build an error at token `idx`; past the end of the stream the error
/// points just after the last token.
fn error_at(toks: &Tokens<'_>, idx: usize, message: String) -> LocateError {
    let pos = match toks.get(idx) {
        Some(tok) => tok.pos,
        None => toks
            .get(toks.len().wrapping_sub(1))
            .map(|t| t.end_pos)
            .unwrap_or(Position { line: 1, column: 0 }),
    };
    LocateError {
        line: pos.line,
        column: pos.column,
        message,
    }
}

const TERNARY_BOUNDARIES: &[&str] = &[
    ";", ",", "?", ":", "=", "=>", "+=", "-=", "*=", "/=", "%=", "|=", "&=", "^=", "<<=", ">>=",
    ">>>=", "return",
];

struct Locator<'t, 'a> {
    toks: &'t Tokens<'a>,
    pairs: Vec<usize>,
}

impl<'t, 'a> Locator<'t, 'a> {
    fn err(&self, idx: usize, message: impl Into<String>) -> LocateError {
        error_at(self.toks, idx, message.into())
    }

    fn is(&self, idx: usize, text: &str) -> bool {
        self.toks.is(idx, text)
    }

    fn is_open(&self, idx: usize) -> bool {
        matches!(self.toks.get(idx), Some(t) if matches!(t.kind, TokenKind::Open(_)))
    }

    fn is_close(&self, idx: usize) -> bool {
        matches!(self.toks.get(idx), Some(t) if matches!(t.kind, TokenKind::Close(_)))
    }

    fn partner(&self, idx: usize) -> usize {
        self.pairs[idx]
    }

    fn source_unit(&self) -> Result<SourceUnit, LocateError> {
        let n = self.toks.len();
        let mut unit = SourceUnit {
            pragma: None,
            contracts: Vec::new(),
        };

        let mut i = 0;
        while i < n {
            if self.is(i, "pragma") {
                let end = self.semicolon(i, n)?;
                if unit.pragma.is_none() && self.is(i + 1, "solidity") && end > i + 2 {
                    let src = self.toks.src();
                    let (from, to) = (self.tok_start(i + 2), self.tok_start(end));
                    unit.pragma = Some(src[from..to].trim().to_string());
                }
                i = end + 1;
            } else if self.is(i, "import") || self.is(i, "using") {
                i = self.semicolon(i, n)? + 1;
            } else if self.is(i, "abstract") {
                i += 1;
            } else if let Some(kind) = self.contract_kind(i) {
                let contract = self.contract(i, kind)?;
                i = contract.close + 1;
                unit.contracts.push(contract);
            } else if self.is(i, "function") {
                return Err(self.err(i, "functions outside of a contract are not supported"));
            } else {
                i = self.skip_member(i, n)?;
            }
        }

        Ok(unit)
    }

    fn tok_start(&self, idx: usize) -> usize {
        self.toks.get(idx).map_or(self.toks.src().len(), |t| t.start)
    }

    fn contract_kind(&self, idx: usize) -> Option<ContractKind> {
        match self.toks.text(idx) {
            "contract" => Some(ContractKind::Contract),
            "library" => Some(ContractKind::Library),
            "interface" => Some(ContractKind::Interface),
            _ => None,
        }
    }

    /// Index of the `;` ending the run that starts at `from`, skipping
    /// over bracketed groups.
    fn semicolon(&self, from: usize, limit: usize) -> Result<usize, LocateError> {
        let mut j = from;
        while j < limit {
            if self.is_open(j) {
                j = self.partner(j) + 1;
                continue;
            }
            if self.is_close(j) {
                return Err(self.err(j, format!("expected ';' before '{}'", self.toks.text(j))));
            }
            if self.is(j, ";") {
                return Ok(j);
            }
            j += 1;
        }
        Err(self.err(j.saturating_sub(1).max(from), "expected ';'"))
    }

    /// Skip a declaration that is not instrumented: everything up to a
    /// `;`, or up to and including a `{ ... }` body (structs, enums).
    fn skip_member(&self, from: usize, limit: usize) -> Result<usize, LocateError> {
        let mut j = from;
        while j < limit {
            if self.toks.is_open(j, Delim::Brace) {
                return Ok(self.partner(j) + 1);
            }
            if self.is_open(j) {
                j = self.partner(j) + 1;
                continue;
            }
            if self.is_close(j) {
                return Err(self.err(j, format!("unexpected '{}'", self.toks.text(j))));
            }
            if self.is(j, ";") {
                return Ok(j + 1);
            }
            j += 1;
        }
        Err(self.err(j.saturating_sub(1).max(from), "expected ';' or '{'"))
    }

    fn contract(&self, at: usize, kind: ContractKind) -> Result<ContractDef, LocateError> {
        let name_tok = self.toks.get(at + 1);
        if !matches!(name_tok, Some(t) if t.kind == TokenKind::Ident) {
            return Err(self.err(at + 1, "expected a contract name"));
        }
        let name = self.toks.text(at + 1).to_string();

        let mut open = at + 2;
        loop {
            if self.toks.is_open(open, Delim::Brace) {
                break;
            }
            if open >= self.toks.len() || self.is(open, ";") || self.is_close(open) {
                return Err(self.err(open, format!("expected body of '{name}'")));
            }
            if self.is_open(open) {
                open = self.partner(open);
            }
            open += 1;
        }
        let close = self.partner(open);

        let mut functions = Vec::new();
        let mut k = open + 1;
        while k < close {
            match self.function_start(k) {
                Some(kind) => {
                    let (function, next) = self.function(k, kind, close)?;
                    functions.push(function);
                    k = next;
                }
                None => k = self.skip_member(k, close)?,
            }
        }

        Ok(ContractDef {
            kind,
            name,
            open,
            close,
            functions,
        })
    }

    fn function_start(&self, idx: usize) -> Option<FunctionKind> {
        let followed_by_paren = self.toks.is_open(idx + 1, Delim::Paren);
        match self.toks.text(idx) {
            "function" => Some(FunctionKind::Function),
            "modifier" => Some(FunctionKind::Modifier),
            "constructor" if followed_by_paren => Some(FunctionKind::Constructor),
            "fallback" | "receive" if followed_by_paren => Some(FunctionKind::Fallback),
            _ => None,
        }
    }

    fn function(
        &self,
        at: usize,
        kind: FunctionKind,
        limit: usize,
    ) -> Result<(FunctionDef, usize), LocateError> {
        let named = matches!(self.toks.get(at + 1), Some(t) if t.kind == TokenKind::Ident);
        let (name, kind, mut j) = match kind {
            FunctionKind::Function | FunctionKind::Modifier if named => {
                (self.toks.text(at + 1).to_string(), kind, at + 2)
            }
            FunctionKind::Function => ("(fallback)".to_string(), FunctionKind::Fallback, at + 1),
            FunctionKind::Modifier => return Err(self.err(at + 1, "expected a modifier name")),
            FunctionKind::Constructor | FunctionKind::Fallback => {
                (self.toks.text(at).to_string(), kind, at + 1)
            }
        };

        let mut mutability = Vec::new();
        loop {
            if j >= limit {
                return Err(self.err(j, format!("expected body of '{name}'")));
            }
            if matches!(self.toks.text(j), "view" | "pure" | "constant") {
                mutability.push(j);
            }
            if self.is(j, ";") {
                let function = FunctionDef {
                    name,
                    kind,
                    keyword: at,
                    mutability,
                    body: None,
                };
                return Ok((function, j + 1));
            }
            if self.toks.is_open(j, Delim::Brace) {
                let body = self.block(j)?;
                let next = body.close + 1;
                let function = FunctionDef {
                    name,
                    kind,
                    keyword: at,
                    mutability,
                    body: Some(body),
                };
                return Ok((function, next));
            }
            if self.is_open(j) {
                j = self.partner(j);
            }
            j += 1;
        }
    }

    fn block(&self, open: usize) -> Result<Block, LocateError> {
        let close = self.partner(open);
        let mut stmts = Vec::new();
        let mut i = open + 1;
        while i < close {
            let (stmt, next) = self.statement(i, close, false)?;
            if !matches!(stmt.kind, StmtKind::Empty) {
                stmts.push(stmt);
            }
            i = next;
        }
        Ok(Block { open, close, stmts })
    }

    /// Parse one statement starting at `i`. `bare` is set when the
    /// statement is the brace-less body of a conditional or loop.
    fn statement(&self, i: usize, limit: usize, bare: bool) -> Result<(Stmt, usize), LocateError> {
        if i >= limit {
            return Err(self.err(i.min(limit), "expected a statement"));
        }

        if self.toks.is_open(i, Delim::Brace) {
            let block = self.block(i)?;
            let close = block.close;
            return Ok((self.stmt(i, close, StmtKind::Block(block)), close + 1));
        }
        if self.is_close(i) {
            return Err(self.err(i, format!("expected a statement before '{}'", self.toks.text(i))));
        }

        match self.toks.text(i) {
            ";" => Ok((self.stmt(i, i, StmtKind::Empty), i + 1)),
            "if" => self.if_chain(i, limit),
            "for" => self.for_or_while(i, limit, LoopKind::For),
            "while" => self.for_or_while(i, limit, LoopKind::While),
            "do" => self.do_while(i, limit),
            "assembly" => self.assembly(i),
            "unchecked" if self.toks.is_open(i + 1, Delim::Brace) => {
                let block = self.block(i + 1)?;
                let close = block.close;
                Ok((self.stmt(i, close, StmtKind::Block(block)), close + 1))
            }
            "try" => Err(self.err(i, "try statements are not supported")),
            "else" if bare => Ok((self.stmt(i, i, StmtKind::Dangling), i + 1)),
            "else" => Err(self.err(i, "'else' without a matching 'if'")),
            _ => {
                let end = self.semicolon(i, limit)?;
                let ternaries = self.ternaries(i, end)?;
                Ok((self.stmt(i, end, StmtKind::Simple { ternaries }), end + 1))
            }
        }
    }

    fn stmt(&self, first: usize, last: usize, kind: StmtKind) -> Stmt {
        Stmt { first, last, kind }
    }

    fn body(&self, i: usize, limit: usize) -> Result<(Body, usize), LocateError> {
        if self.toks.is_open(i, Delim::Brace) {
            let block = self.block(i)?;
            let next = block.close + 1;
            return Ok((Body::Block(block), next));
        }
        let (stmt, next) = self.statement(i, limit, true)?;
        Ok((Body::Bare(Box::new(stmt)), next))
    }

    /// Parenthesized header starting at `open`; returns the closing index.
    fn parens(&self, open: usize, after: &str) -> Result<usize, LocateError> {
        if !self.toks.is_open(open, Delim::Paren) {
            return Err(self.err(open, format!("expected '(' after '{after}'")));
        }
        Ok(self.partner(open))
    }

    fn if_chain(&self, first: usize, limit: usize) -> Result<(Stmt, usize), LocateError> {
        let mut arms = Vec::new();
        let mut keyword = first;
        loop {
            let open = keyword + 1;
            let close = self.parens(open, "if")?;
            let ternaries = self.ternaries(open + 1, close.saturating_sub(1))?;
            let (body, next) = self.body(close + 1, limit)?;
            arms.push(IfArm {
                keyword,
                cond: Some((open, close)),
                ternaries,
                body,
            });

            if next < limit && self.is(next, "else") {
                if self.is(next + 1, "if") && next + 1 < limit {
                    keyword = next + 1;
                    continue;
                }
                let (body, after) = self.body(next + 1, limit)?;
                arms.push(IfArm {
                    keyword: next,
                    cond: None,
                    ternaries: Vec::new(),
                    body,
                });
                return Ok((self.stmt(first, after - 1, StmtKind::If(IfChain { arms })), after));
            }
            return Ok((self.stmt(first, next - 1, StmtKind::If(IfChain { arms })), next));
        }
    }

    fn for_or_while(
        &self,
        keyword: usize,
        limit: usize,
        kind: LoopKind,
    ) -> Result<(Stmt, usize), LocateError> {
        let open = keyword + 1;
        let close = self.parens(open, self.toks.text(keyword))?;
        let ternaries = self.ternaries(open + 1, close.saturating_sub(1))?;
        let (body, next) = self.body(close + 1, limit)?;
        let lp = Loop {
            kind,
            keyword,
            header: (open, close),
            ternaries,
            body,
        };
        Ok((self.stmt(keyword, next - 1, StmtKind::Loop(lp)), next))
    }

    fn do_while(&self, keyword: usize, limit: usize) -> Result<(Stmt, usize), LocateError> {
        let (body, next) = self.body(keyword + 1, limit)?;
        if !self.is(next, "while") {
            return Err(self.err(next, "expected 'while' after 'do' body"));
        }
        let open = next + 1;
        let close = self.parens(open, "while")?;
        let semi = close + 1;
        if !self.is(semi, ";") {
            return Err(self.err(semi, "expected ';' after 'do ... while'"));
        }
        let ternaries = self.ternaries(open + 1, close.saturating_sub(1))?;
        let lp = Loop {
            kind: LoopKind::DoWhile,
            keyword,
            header: (open, close),
            ternaries,
            body,
        };
        Ok((self.stmt(keyword, semi, StmtKind::Loop(lp)), semi + 1))
    }

    fn assembly(&self, keyword: usize) -> Result<(Stmt, usize), LocateError> {
        let mut j = keyword + 1;
        if matches!(self.toks.get(j), Some(t) if t.kind == TokenKind::Str) {
            j += 1;
        }
        if self.toks.is_open(j, Delim::Paren) {
            j = self.partner(j) + 1;
        }
        if !self.toks.is_open(j, Delim::Brace) {
            return Err(self.err(j, "expected '{' after 'assembly'"));
        }
        let close = self.partner(j);
        Ok((self.stmt(keyword, close, StmtKind::Assembly), close + 1))
    }

    /// Every conditional expression whose `?` lies in `lo..=hi`.
    fn ternaries(&self, lo: usize, hi: usize) -> Result<Vec<Ternary>, LocateError> {
        let mut found = Vec::new();
        if hi < lo {
            return Ok(found);
        }
        for q in lo..=hi {
            if self.is(q, "?") {
                found.push(self.ternary(q, lo, hi)?);
            }
        }
        Ok(found)
    }

    fn ternary(&self, question: usize, lo: usize, hi: usize) -> Result<Ternary, LocateError> {
        // The condition extends left until an operator that binds looser
        // than `?:` or the enclosing bracket.
        let mut cond_first = question;
        while cond_first > lo {
            let prev = cond_first - 1;
            if self.is_close(prev) {
                cond_first = self.partner(prev);
                continue;
            }
            if self.is_open(prev) || TERNARY_BOUNDARIES.contains(&self.toks.text(prev)) {
                break;
            }
            cond_first = prev;
        }
        if cond_first == question {
            return Err(self.err(question, "conditional expression without a condition"));
        }

        let mut pending = 0u32;
        let mut colon = None;
        let mut j = question + 1;
        while j <= hi {
            if self.is_open(j) {
                j = self.partner(j) + 1;
                continue;
            }
            if self.is_close(j) || self.is(j, ";") || self.is(j, ",") {
                break;
            }
            if self.is(j, "?") {
                pending += 1;
            } else if self.is(j, ":") {
                if pending == 0 {
                    colon = Some(j);
                    break;
                }
                pending -= 1;
            }
            j += 1;
        }
        let colon = colon.ok_or_else(|| self.err(question, "expected ':' in conditional expression"))?;
        if colon == question + 1 {
            return Err(self.err(colon, "empty true branch in conditional expression"));
        }

        let mut pending = 0u32;
        let mut j = colon + 1;
        while j <= hi {
            if self.is_open(j) {
                j = self.partner(j) + 1;
                continue;
            }
            if self.is_close(j) || self.is(j, ";") || self.is(j, ",") {
                break;
            }
            if self.is(j, "?") {
                pending += 1;
            } else if self.is(j, ":") {
                if pending == 0 {
                    break;
                }
                pending -= 1;
            }
            j += 1;
        }
        if j == colon + 1 {
            return Err(self.err(colon, "empty false branch in conditional expression"));
        }

        Ok(Ternary {
            cond_first,
            question,
            colon,
            false_last: j - 1,
        })
    }
}

// ---------------------------------------------------------------------------
// Constructs
// ---------------------------------------------------------------------------

/// One arm of a branch point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arm {
    /// 0 = first / true arm, 1 = false / else, 2+ = further `else if` arms.
    pub index: u32,
    pub loc: Location,
}

/// A runnable unit, in source order. `anchor` is the index of the token
/// the construct is identified by; it is unique within each category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construct {
    FunctionEntry {
        anchor: usize,
        name: String,
        start: Position,
        loc: Location,
    },
    Statement {
        anchor: usize,
        loc: Location,
    },
    BranchPoint {
        anchor: usize,
        kind: BranchKind,
        start_line: u32,
        loc: Location,
        arms: Vec<Arm>,
    },
}

impl Construct {
    pub fn anchor(&self) -> usize {
        match self {
            Construct::FunctionEntry { anchor, .. }
            | Construct::Statement { anchor, .. }
            | Construct::BranchPoint { anchor, .. } => *anchor,
        }
    }
}

/// Flatten a located unit into source-ordered constructs.
pub fn constructs(toks: &Tokens<'_>, unit: &SourceUnit) -> Vec<Construct> {
    let mut walker = Walker {
        toks,
        out: Vec::new(),
    };
    for contract in &unit.contracts {
        for function in &contract.functions {
            walker.function(function);
        }
    }
    let mut out = walker.out;
    // Stable: a statement and the branch point it opens share an anchor
    // and keep their push order.
    out.sort_by_key(Construct::anchor);
    out
}

struct Walker<'t, 'a> {
    toks: &'t Tokens<'a>,
    out: Vec<Construct>,
}

impl Walker<'_, '_> {
    fn span(&self, first: usize, last: usize) -> Location {
        let start = self.toks.get(first).map(|t| t.pos).unwrap_or_default();
        let end = self.toks.get(last).map(|t| t.end_pos).unwrap_or(start);
        Location { start, end }
    }

    fn function(&mut self, function: &FunctionDef) {
        let Some(body) = &function.body else {
            return;
        };
        let loc = self.span(function.keyword, body.close);
        self.out.push(Construct::FunctionEntry {
            anchor: function.keyword,
            name: function.name.clone(),
            start: loc.start,
            loc,
        });
        self.block(body);
    }

    fn block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn body(&mut self, body: &Body) {
        match body {
            Body::Block(block) => self.block(block),
            Body::Bare(stmt) => self.stmt(stmt),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        if stmt.is_runnable() {
            self.out.push(Construct::Statement {
                anchor: stmt.first,
                loc: self.span(stmt.first, stmt.last),
            });
        }

        match &stmt.kind {
            StmtKind::Simple { ternaries } => self.ternaries(ternaries),
            StmtKind::Block(block) => self.block(block),
            StmtKind::If(chain) => self.if_chain(stmt, chain),
            StmtKind::Loop(lp) => self.for_loop(lp, stmt),
            StmtKind::Assembly | StmtKind::Empty | StmtKind::Dangling => {}
        }
    }

    fn if_chain(&mut self, stmt: &Stmt, chain: &IfChain) {
        let mut arms: Vec<Arm> = chain
            .arms
            .iter()
            .enumerate()
            .map(|(index, arm)| Arm {
                index: index as u32,
                loc: self.span(arm.body.first(), arm.body.last()),
            })
            .collect();
        if arms.len() == 1 {
            // Plain `if`: the implicit "condition false" arm.
            let (_, close) = chain.arms[0].cond.unwrap_or((stmt.first, stmt.first));
            arms.push(Arm {
                index: 1,
                loc: self.span(stmt.first, close),
            });
        }

        let loc = self.span(stmt.first, stmt.last);
        self.out.push(Construct::BranchPoint {
            anchor: stmt.first,
            kind: BranchKind::If,
            start_line: loc.start.line,
            loc,
            arms,
        });

        for arm in &chain.arms {
            self.ternaries(&arm.ternaries);
            self.body(&arm.body);
        }
    }

    fn for_loop(&mut self, lp: &Loop, stmt: &Stmt) {
        let exit = match lp.kind {
            LoopKind::DoWhile => self.span(lp.header.0 - 1, stmt.last),
            LoopKind::For | LoopKind::While => self.span(lp.keyword, lp.header.1),
        };
        let loc = self.span(stmt.first, stmt.last);
        self.out.push(Construct::BranchPoint {
            anchor: lp.keyword,
            kind: BranchKind::Loop,
            start_line: loc.start.line,
            loc,
            arms: vec![
                Arm {
                    index: 0,
                    loc: self.span(lp.body.first(), lp.body.last()),
                },
                Arm { index: 1, loc: exit },
            ],
        });

        self.ternaries(&lp.ternaries);
        self.body(&lp.body);
    }

    fn ternaries(&mut self, ternaries: &[Ternary]) {
        for t in ternaries {
            let loc = self.span(t.cond_first, t.false_last);
            self.out.push(Construct::BranchPoint {
                anchor: t.question,
                kind: BranchKind::CondExpr,
                start_line: loc.start.line,
                loc,
                arms: vec![
                    Arm {
                        index: 0,
                        loc: self.span(t.question + 1, t.colon - 1),
                    },
                    Arm {
                        index: 1,
                        loc: self.span(t.colon + 1, t.false_last),
                    },
                ],
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan;

    fn located(src: &str) -> Vec<Construct> {
        let toks = scan(src).unwrap();
        let unit = locate(&toks).unwrap();
        constructs(&toks, &unit)
    }

    fn branches(cs: &[Construct]) -> Vec<(BranchKind, usize, u32)> {
        cs.iter()
            .filter_map(|c| match c {
                Construct::BranchPoint {
                    kind,
                    arms,
                    start_line,
                    ..
                } => Some((*kind, arms.len(), *start_line)),
                _ => None,
            })
            .collect()
    }

    fn statement_lines(cs: &[Construct]) -> Vec<u32> {
        cs.iter()
            .filter_map(|c| match c {
                Construct::Statement { loc, .. } => Some(loc.start.line),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_if_has_implicit_false_arm() {
        let cs = located("contract T {\n function a(uint x) {\n if (x == 1) throw;\n }\n}");
        assert_eq!(branches(&cs), vec![(BranchKind::If, 2, 3)]);
        // the if statement and its bare body
        assert_eq!(statement_lines(&cs), vec![3, 3]);
    }

    #[test]
    fn test_else_if_with_nested_if_is_two_branch_points() {
        let src = "contract T {\n\
                   function a(uint x, uint y, uint z) {\n\
                   if (x == y) {\n\
                   } else if (x == 2) {\n\
                   if (y == z) {\n\
                   }\n\
                   }\n\
                   }\n\
                   }";
        let cs = located(src);
        assert_eq!(
            branches(&cs),
            vec![(BranchKind::If, 2, 3), (BranchKind::If, 2, 5)]
        );
    }

    #[test]
    fn test_else_if_chain_is_flat() {
        let src = "contract T { function a(uint x) {
            if (x == 1) { x = 2; } else if (x == 2) { x = 3; } else { x = 4; }
        } }";
        let cs = located(src);
        assert_eq!(branches(&cs), vec![(BranchKind::If, 3, 2)]);
    }

    #[test]
    fn test_else_block_with_if_is_separate() {
        let src = "contract T { function a(uint x) {
            if (x == 1) { x = 2; } else { if (x == 2) { x = 3; } }
        } }";
        let cs = located(src);
        assert_eq!(
            branches(&cs),
            vec![(BranchKind::If, 2, 2), (BranchKind::If, 2, 2)]
        );
    }

    #[test]
    fn test_dangling_else_binds_to_inner_if() {
        let src = "contract T { function a(uint x) { if (x > 0) if (x > 1) x = 1; else x = 2; } }";
        let toks = scan(src).unwrap();
        let unit = locate(&toks).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        let StmtKind::If(outer) = &body.stmts[0].kind else {
            panic!("expected if");
        };
        assert!(!outer.has_else());
        let Body::Bare(inner) = &outer.arms[0].body else {
            panic!("expected bare body");
        };
        let StmtKind::If(inner) = &inner.kind else {
            panic!("expected nested if");
        };
        assert!(inner.has_else());
    }

    #[test]
    fn test_loops_are_two_arm_branches() {
        let src = "contract T { function a(uint n) {
            for (uint i = 0; i < n; i++) n--;
            while (n > 0) { n--; }
            do n++; while (n < 3);
        } }";
        let cs = located(src);
        assert_eq!(
            branches(&cs),
            vec![
                (BranchKind::Loop, 2, 2),
                (BranchKind::Loop, 2, 3),
                (BranchKind::Loop, 2, 4)
            ]
        );
        assert_eq!(statement_lines(&cs), vec![2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_ternary_bounds() {
        let src = "contract T { function a(uint x) returns (uint) { uint y = x > 1 ? f(x ? 1 : 2) : 3; return y; } }";
        let toks = scan(src).unwrap();
        let unit = locate(&toks).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        let StmtKind::Simple { ternaries } = &body.stmts[0].kind else {
            panic!("expected simple statement");
        };
        assert_eq!(ternaries.len(), 2);
        let outer = ternaries[0];
        assert_eq!(toks.text(outer.cond_first), "x");
        assert_eq!(toks.text(outer.cond_first - 1), "=");
        assert_eq!(toks.text(outer.false_last), "3");
        let inner = ternaries[1];
        assert_eq!(toks.text(inner.cond_first), "x");
        assert_eq!(toks.text(inner.cond_first - 1), "(");
        assert_eq!(toks.text(inner.false_last), "2");
        assert!(unit.contracts[0].has_ternary());
    }

    #[test]
    fn test_function_names_and_bodyless_declarations() {
        let src = "contract T {
            uint x;
            event E(uint a);
            struct S { uint a; }
            modifier onlyOwner { _; }
            function T() { x = 1; }
            function () payable { }
            function abstractOne(uint a) returns (uint);
            function getX() constant onlyOwner returns (uint) { return x; }
        }";
        let cs = located(src);
        let names: Vec<&str> = cs
            .iter()
            .filter_map(|c| match c {
                Construct::FunctionEntry { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["onlyOwner", "T", "(fallback)", "getX"]);
    }

    #[test]
    fn test_interface_functions_are_excluded() {
        let cs = located("interface I { function f(uint a) external returns (uint); }");
        assert!(cs.is_empty());
    }

    #[test]
    fn test_pragma_is_recorded() {
        let toks = scan("pragma solidity ^0.4.3;\ncontract T {}").unwrap();
        let unit = locate(&toks).unwrap();
        assert_eq!(unit.pragma.as_deref(), Some("^0.4.3"));
        assert_eq!(unit.contracts[0].name, "T");
    }

    #[test]
    fn test_truncated_file_is_locate_error() {
        let toks = scan("contract T {\n function a() {\n x = 1;\n").unwrap();
        let err = locate(&toks).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("never closed"), "{}", err.message);
    }

    #[test]
    fn test_mismatched_delimiter_is_locate_error() {
        let toks = scan("contract T { function a() { f(1]; } }").unwrap();
        let err = locate(&toks).unwrap_err();
        assert!(err.message.contains("does not close"), "{}", err.message);
    }

    #[test]
    fn test_missing_semicolon_is_locate_error() {
        let toks = scan("contract T { function a() { return 1 } }").unwrap();
        assert!(locate(&toks).is_err());
    }

    #[test]
    fn test_try_is_unsupported() {
        let toks = scan("contract T { function a() { try this.f() {} catch {} } }").unwrap();
        let err = locate(&toks).unwrap_err();
        assert!(err.message.contains("try"));
    }

    #[test]
    fn test_assembly_is_one_opaque_statement() {
        let cs = located("contract T { function a() { assembly { let x := 1 if x { } } } }");
        assert_eq!(statement_lines(&cs).len(), 1);
        assert!(branches(&cs).is_empty());
    }

    #[test]
    fn test_mutability_keywords_are_recorded() {
        let toks = scan(
            "contract T {
            function a(function (uint) pure returns (uint) f) public view returns (uint) { return 1; }
            function b() constant returns (uint) { return 2; }
            function c() public { }
        }",
        )
        .unwrap();
        let unit = locate(&toks).unwrap();
        let fns = &unit.contracts[0].functions;
        let words: Vec<Vec<&str>> = fns
            .iter()
            .map(|f| f.mutability.iter().map(|&i| toks.text(i)).collect())
            .collect();
        // The `pure` inside the parameter list belongs to a function type.
        assert_eq!(words, vec![vec!["view"], vec!["constant"], vec![]]);
    }
}
