use std::collections::HashMap;
use std::fmt;

/// 診断が指すソース位置。位置不明の診断には `unknown()` を使う。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn unknown() -> Self {
        Self {
            file: "<unknown>".into(),
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// 単一診断レコード。
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub domain: String,
    pub code: String,
    pub message: String,
    pub extensions: HashMap<String, String>,
}

impl Diagnostic {
    pub fn new(
        domain: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            code: code.into(),
            message: message.into(),
            extensions: HashMap::new(),
        }
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

/// 診断の送り先。集約と致命判断は上位ツールチェーンの責務で、
/// このコアは報告して通常リターンするだけ。
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// テストや単体実行向けの収集シンク。
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}
