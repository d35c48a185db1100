//! Coverage event protocol.
//!
//! Injected code reports hits by raising one of four events. Each kind is
//! identified by a fixed discriminator (the topic hash of its event
//! signature) and carries an ABI-encoded `(string file, uint256 id)` tuple;
//! branch hits append `uint256 armIndex`.
//!
//! [`CoverageEvent`] is the single hook type: the injector renders it into
//! source, the aggregator decodes it back out of the event log.

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::DecodeError;

const WORD: usize = 32;

/// Prefix of the helper injected into contracts that contain ternaries.
pub const TERNARY_HELPER: &str = "__BranchCoverageTernary";

/// Helper name for `contract`. Each contract gets its own so a base and a
/// derived contract never declare the same function.
pub fn ternary_helper_name(contract: &str) -> String {
    format!("{TERNARY_HELPER}_{contract}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitKind {
    Line,
    Function,
    Branch,
    Statement,
}

impl HitKind {
    pub const ALL: [HitKind; 4] = [
        HitKind::Line,
        HitKind::Function,
        HitKind::Branch,
        HitKind::Statement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HitKind::Line => "line",
            HitKind::Function => "function",
            HitKind::Branch => "branch",
            HitKind::Statement => "statement",
        }
    }

    /// Discriminator: keccak-256 of the event signature, lowercase hex.
    pub fn topic(&self) -> &'static str {
        match self {
            HitKind::Line => "b8995a65f405d9756b41a334f38d8ff0c93c4934e170d3c1429c3e7ca101014d",
            HitKind::Function => "d4ce765fd23c5cc3660249353d61ecd18ca60549dd62cb9ca350a4244de7b87f",
            HitKind::Branch => "d4cf56ed5ba572684f02f889f12ac42d9583c8e3097802060e949bfbb3c1bff5",
            HitKind::Statement => {
                "b51abbff580b3a34bbc725f2dc6f736e9d4b45a41293fd0084ad865a31fde0c8"
            }
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        let topic = topic.trim_start_matches("0x");
        Self::ALL
            .into_iter()
            .find(|kind| kind.topic().eq_ignore_ascii_case(topic))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            HitKind::Line => "__Coverage",
            HitKind::Function => "__FunctionCoverage",
            HitKind::Branch => "__BranchCoverage",
            HitKind::Statement => "__StatementCoverage",
        }
    }

    /// Event declaration injected into every instrumented contract.
    pub fn declaration(&self) -> String {
        let params = match self {
            HitKind::Line => "string fileName, uint256 lineNumber",
            HitKind::Function => "string fileName, uint256 fnId",
            HitKind::Branch => "string fileName, uint256 branchId, uint256 locationIdx",
            HitKind::Statement => "string fileName, uint256 statementId",
        };
        format!("event {}({});", self.event_name(), params)
    }

    fn words(&self) -> usize {
        match self {
            HitKind::Branch => 3,
            _ => 2,
        }
    }
}

impl std::fmt::Display for HitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All four event declarations, on one line.
pub fn declarations() -> String {
    HitKind::ALL.iter().map(HitKind::declaration).collect()
}

/// Always-true helper that raises a branch event from inside an
/// expression, declared in `contract`.
pub fn ternary_helper(dialect: Dialect, contract: &str) -> String {
    let location = if dialect.memory_strings { " memory" } else { "" };
    let emit = if dialect.emit { "emit " } else { "" };
    let name = ternary_helper_name(contract);
    format!(
        "function {name}(string{location} fileName, uint256 branchId, uint256 locationIdx) \
         internal returns (bool) {{ {emit}__BranchCoverage(fileName, branchId, locationIdx); return true; }}"
    )
}

/// A decoded hit. For `Line` the id is the line number itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageEvent {
    Line { file: String, line: u64 },
    Function { file: String, id: u64 },
    Branch { file: String, id: u64, arm: u64 },
    Statement { file: String, id: u64 },
}

impl CoverageEvent {
    pub fn kind(&self) -> HitKind {
        match self {
            CoverageEvent::Line { .. } => HitKind::Line,
            CoverageEvent::Function { .. } => HitKind::Function,
            CoverageEvent::Branch { .. } => HitKind::Branch,
            CoverageEvent::Statement { .. } => HitKind::Statement,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            CoverageEvent::Line { file, .. }
            | CoverageEvent::Function { file, .. }
            | CoverageEvent::Branch { file, .. }
            | CoverageEvent::Statement { file, .. } => file,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            CoverageEvent::Line { line, .. } => *line,
            CoverageEvent::Function { id, .. }
            | CoverageEvent::Branch { id, .. }
            | CoverageEvent::Statement { id, .. } => *id,
        }
    }

    pub fn arm(&self) -> Option<u64> {
        match self {
            CoverageEvent::Branch { arm, .. } => Some(*arm),
            _ => None,
        }
    }

    /// Source text raising this event as a statement, e.g.
    /// `__StatementCoverage("Simple.sol",3);`.
    pub fn render(&self, dialect: Dialect) -> String {
        let emit = if dialect.emit { "emit " } else { "" };
        format!("{emit}{}({});", self.kind().event_name(), self.arguments())
    }

    /// Expression form for use inside conditions, calling `helper`;
    /// evaluates to `true`. Only branch events have one.
    pub fn render_expression(&self, helper: &str) -> Option<String> {
        match self {
            CoverageEvent::Branch { .. } => Some(format!("{helper}({})", self.arguments())),
            _ => None,
        }
    }

    fn arguments(&self) -> String {
        let file = quote(self.file());
        match self.arm() {
            Some(arm) => format!("{file},{},{arm}", self.id()),
            None => format!("{file},{}", self.id()),
        }
    }

    /// ABI-encode the payload as `0x`-prefixed hex.
    pub fn encode_data(&self) -> String {
        let head = self.kind().words();
        let file = self.file().as_bytes();
        let padded = file.len().div_ceil(WORD) * WORD;

        let mut bytes = Vec::with_capacity((head + 1) * WORD + padded);
        bytes.extend_from_slice(&uint_word((head * WORD) as u64));
        bytes.extend_from_slice(&uint_word(self.id()));
        if let Some(arm) = self.arm() {
            bytes.extend_from_slice(&uint_word(arm));
        }
        bytes.extend_from_slice(&uint_word(file.len() as u64));
        bytes.extend_from_slice(file);
        bytes.resize(bytes.len() + (padded - file.len()), 0);

        format!("0x{}", hex::encode(bytes))
    }

    /// The log record an instrumented contract would produce for this hit.
    pub fn to_raw(&self) -> RawEvent {
        RawEvent {
            topics: vec![format!("0x{}", self.kind().topic())],
            data: self.encode_data(),
        }
    }

    /// Decode an ABI payload of the given kind.
    pub fn decode(kind: HitKind, data: &str) -> Result<Self, DecodeError> {
        let fail = |message: String| DecodeError {
            kind: kind.as_str(),
            message,
        };

        let bytes = hex::decode(data.trim().trim_start_matches("0x"))
            .map_err(|e| fail(format!("payload is not hex: {e}")))?;
        let head = kind.words();
        if bytes.len() < head * WORD {
            return Err(fail(format!(
                "payload has {} bytes, expected at least {}",
                bytes.len(),
                head * WORD
            )));
        }

        let word = |i: usize| -> Result<u64, DecodeError> {
            let at = i * WORD;
            let chunk = bytes
                .get(at..at + WORD)
                .ok_or_else(|| fail(format!("word at byte {at} is out of bounds")))?;
            decode_uint(chunk).ok_or_else(|| fail(format!("word at byte {at} exceeds 64 bits")))
        };

        let offset = usize::try_from(word(0)?).map_err(|e| fail(e.to_string()))?;
        let id = word(1)?;
        let arm = if kind == HitKind::Branch {
            Some(word(2)?)
        } else {
            None
        };

        if offset % WORD != 0 {
            return Err(fail(format!("string offset {offset} is not word aligned")));
        }
        let len = usize::try_from(word(offset / WORD)?).map_err(|e| fail(e.to_string()))?;
        let start = offset + WORD;
        let raw = start
            .checked_add(len)
            .and_then(|end| bytes.get(start..end))
            .ok_or_else(|| fail(format!("string of {len} bytes runs past the payload")))?;
        let file = String::from_utf8(raw.to_vec())
            .map_err(|e| fail(format!("file name is not UTF-8: {e}")))?;

        Ok(match kind {
            HitKind::Line => CoverageEvent::Line { file, line: id },
            HitKind::Function => CoverageEvent::Function { file, id },
            HitKind::Statement => CoverageEvent::Statement { file, id },
            HitKind::Branch => CoverageEvent::Branch {
                file,
                id,
                arm: arm.unwrap_or_default(),
            },
        })
    }
}

/// One record of the event log, as captured from the execution node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

impl RawEvent {
    /// The coverage kind named by any of the record's topics.
    pub fn kind(&self) -> Option<HitKind> {
        self.topics.iter().find_map(|t| HitKind::from_topic(t))
    }

    /// Decode the record. `Ok(None)` means the discriminator is not a
    /// coverage kind and the record should be skipped.
    pub fn decode(&self) -> Result<Option<CoverageEvent>, DecodeError> {
        match self.kind() {
            Some(kind) => CoverageEvent::decode(kind, &self.data).map(Some),
            None => Ok(None),
        }
    }
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn decode_uint(word: &[u8]) -> Option<u64> {
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return None;
    }
    let low: [u8; 8] = low.try_into().ok()?;
    Some(u64::from_be_bytes(low))
}

/// Solidity double-quoted string literal.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_distinct_and_resolvable() {
        for kind in HitKind::ALL {
            assert_eq!(HitKind::from_topic(kind.topic()), Some(kind));
            assert_eq!(HitKind::from_topic(&format!("0x{}", kind.topic())), Some(kind));
        }
        assert_eq!(HitKind::from_topic("0xdeadbeef"), None);
    }

    #[test]
    fn test_branch_payload_layout() {
        let event = CoverageEvent::Branch {
            file: "Simple.sol".to_string(),
            id: 3,
            arm: 1,
        };
        let data = event.encode_data();
        let bytes = hex::decode(data.trim_start_matches("0x")).unwrap();
        // 3 head words, length word, one padded data word
        assert_eq!(bytes.len(), 5 * 32);
        assert_eq!(bytes[31], 96);
        assert_eq!(bytes[63], 3);
        assert_eq!(bytes[95], 1);
        assert_eq!(bytes[127], 10);
        assert_eq!(&bytes[128..138], b"Simple.sol");

        assert_eq!(CoverageEvent::decode(HitKind::Branch, &data).unwrap(), event);
    }

    #[test]
    fn test_decode_statement_from_raw_record() {
        let raw = CoverageEvent::Statement {
            file: "a.sol".to_string(),
            id: 12,
        }
        .to_raw();
        let decoded = raw.decode().unwrap().unwrap();
        assert_eq!(decoded.kind(), HitKind::Statement);
        assert_eq!(decoded.file(), "a.sol");
        assert_eq!(decoded.id(), 12);
        assert_eq!(decoded.arm(), None);
    }

    #[test]
    fn test_unknown_discriminator_is_skipped() {
        let raw = RawEvent {
            topics: vec!["0x1234".to_string()],
            data: "not even hex".to_string(),
        };
        assert_eq!(raw.decode().unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        let err = CoverageEvent::decode(HitKind::Line, "0xzz").unwrap_err();
        assert!(err.message.contains("hex"));

        let err = CoverageEvent::decode(HitKind::Branch, &"00".repeat(64)).unwrap_err();
        assert!(err.message.contains("expected at least 96"));

        // string offset points past the end
        let mut data = String::new();
        data.push_str(&format!("{:064x}", 0x200));
        data.push_str(&format!("{:064x}", 1));
        let err = CoverageEvent::decode(HitKind::Function, &data).unwrap_err();
        assert_eq!(err.kind, "function");

        // id larger than 64 bits
        let mut data = String::new();
        data.push_str(&format!("{:064x}", 0x40));
        data.push_str(&"ff".repeat(32));
        data.push_str(&format!("{:064x}", 0));
        let err = CoverageEvent::decode(HitKind::Statement, &data).unwrap_err();
        assert!(err.message.contains("64 bits"));
    }

    #[test]
    fn test_render_statements() {
        let hit = CoverageEvent::Function {
            file: "Simple.sol".to_string(),
            id: 2,
        };
        assert_eq!(
            hit.render(Dialect::default()),
            r#"__FunctionCoverage("Simple.sol",2);"#
        );
        let emit = Dialect {
            emit: true,
            memory_strings: false,
            strict_mutability: false,
        };
        assert_eq!(hit.render(emit), r#"emit __FunctionCoverage("Simple.sol",2);"#);
        assert_eq!(hit.render_expression("h"), None);

        let branch = CoverageEvent::Branch {
            file: "we\"ird.sol".to_string(),
            id: 1,
            arm: 0,
        };
        assert_eq!(
            branch.render_expression(&ternary_helper_name("C")).unwrap(),
            r#"__BranchCoverageTernary_C("we\"ird.sol",1,0)"#
        );
    }

    #[test]
    fn test_declarations_are_single_line() {
        let decls = declarations();
        assert!(!decls.contains('\n'));
        assert!(decls.contains("event __BranchCoverage(string fileName, uint256 branchId, uint256 locationIdx);"));
        let helper = ternary_helper(
            Dialect {
                emit: true,
                memory_strings: true,
                strict_mutability: true,
            },
            "Token",
        );
        assert!(!helper.contains('\n'));
        assert!(helper.contains("string memory fileName"));
        assert!(helper.contains("emit __BranchCoverage"));
        assert!(helper.starts_with("function __BranchCoverageTernary_Token("));
    }
}
