use serde::Serialize;

use crate::module_ir::ModuleIr;

/// リンカーへ伝える "Linker Options" モジュールフラグの名前。
pub const LINKER_OPTIONS_FLAG: &str = "Linker Options";

/// リンク対象の種別。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LinkLibraryKind {
    Library,
    Framework,
}

/// 生成中の任意の地点から記録されるリンクライブラリ 1 件。
/// identity は (kind, name) で順序に依存しない。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LinkLibrary {
    pub kind: LinkLibraryKind,
    pub name: String,
}

impl LinkLibrary {
    pub fn library(name: impl Into<String>) -> Self {
        Self {
            kind: LinkLibraryKind::Library,
            name: name.into(),
        }
    }

    pub fn framework(name: impl Into<String>) -> Self {
        Self {
            kind: LinkLibraryKind::Framework,
            name: name.into(),
        }
    }

    /// リンカーオプションのトークン列へ変換する。
    fn tokens(&self) -> Vec<String> {
        match self.kind {
            LinkLibraryKind::Library => vec![format!("-l{}", self.name)],
            LinkLibraryKind::Framework => {
                vec!["-framework".to_string(), self.name.clone()]
            }
        }
    }
}

/// autolink レコードの収集器。
///
/// `record` は追記のみで失敗しない。`flush` は finalize 時に一度だけ呼ばれ、
/// (kind, name) の安定な全順序でソート → 隣接重複除去 → 単一の
/// "Linker Options" フラグとして追記出力する。出力順自体にリンカー上の
/// 意味はないが、同じ入力集合から常に同じ順序を再現する。
#[derive(Clone, Debug, Default)]
pub struct AutolinkCollector {
    entries: Vec<LinkLibrary>,
    flushed: bool,
}

impl AutolinkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, library: LinkLibrary) {
        self.entries.push(library);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// 重複を除去して "Linker Options" へ書き出す。二度目の呼び出しは
    /// 呼び出し側の契約違反。
    pub fn flush(&mut self, module: &mut ModuleIr) {
        debug_assert!(!self.flushed, "autolink は flush 済みです");
        self.entries.sort();
        self.entries.dedup();
        let entries: Vec<Vec<String>> = self
            .entries
            .iter()
            .map(LinkLibrary::tokens)
            .collect();
        if !entries.is_empty() {
            module.append_flag_entries(LINKER_OPTIONS_FLAG, entries);
        }
        self.flushed = true;
    }
}
