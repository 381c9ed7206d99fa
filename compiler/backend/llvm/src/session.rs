//! 1 モジュール分の生成セッション。
//!
//! shape 登録・ランタイム関数テーブル・autolink 収集器を束ね、
//! `finalize` で未出力のモジュールメタデータを確定させる。セッションは
//! 単一スレッド専有で、並列コンパイル時はモジュールごとに独立した
//! インスタンスを作る。

use crate::autolink::{AutolinkCollector, LinkLibrary};
use crate::diagnostics::{Diagnostic, DiagnosticSink, SourceLoc};
use crate::layout::ShapeTable;
use crate::module_ir::{FunctionHandle, GlobalHandle, ModuleIr};
use crate::runtime_functions::{RuntimeFunc, RuntimeFunctionTable};
use crate::runtime_types::RuntimeTypeLayouts;
use crate::target_info::RuntimeTargetInfo;
use crate::target_machine::{PointerSpec, TargetMachine};

/// このコアが消費する生成オプションの部分集合。
#[derive(Clone, Copy, Debug)]
pub struct BackendOptions {
    pub opt_level: crate::target_machine::OptimizationLevel,
    pub disable_fp_elim: bool,
    pub debug_info: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            opt_level: crate::target_machine::OptimizationLevel::O2,
            disable_fp_elim: false,
            debug_info: false,
        }
    }
}

/// デバッグ情報の確定フック。出力の実体は外部コラボレータ側にあり、
/// ここではバージョンフラグの確定のみを担う。
#[derive(Debug, Default)]
struct DebugInfoBuilder {
    finalized: bool,
}

impl DebugInfoBuilder {
    const VERSION: &'static str = "3";

    fn finalize(&mut self, module: &mut ModuleIr) {
        debug_assert!(!self.finalized, "debug info は確定済みです");
        module.append_flag_entries("Debug Info Version", vec![vec![Self::VERSION.into()]]);
        self.finalized = true;
    }
}

/// 遅延生成される既知グローバル。null 定数での代用が許される
/// シンボルは `NullPointer` になりうる。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeGlobal {
    Symbol(GlobalHandle),
    NullPointer,
}

/// ランタイム ABI セッション本体。
///
/// shape カタログは構築時に即時作成し、ランタイム関数宣言と autolink
/// レコードは生成中に要求駆動で蓄積する。`finalize` は生成完了後に
/// 正確に一度だけ呼ぶ契約 (release ビルドでは守られない場合の挙動を
/// 保証しない)。
pub struct RuntimeAbiContext {
    target: TargetMachine,
    target_info: RuntimeTargetInfo,
    options: BackendOptions,
    shapes: ShapeTable,
    layouts: RuntimeTypeLayouts,
    runtime_fns: RuntimeFunctionTable,
    autolink: AutolinkCollector,
    global_lists: Vec<(String, Vec<String>)>,
    module: ModuleIr,
    debug_info: Option<DebugInfoBuilder>,
    sink: Box<dyn DiagnosticSink>,
    empty_tuple_metadata: Option<GlobalHandle>,
    objc_empty_cache: Option<GlobalHandle>,
    objc_empty_vtable: Option<RuntimeGlobal>,
    finalized: bool,
}

impl RuntimeAbiContext {
    pub fn new(
        module_name: impl Into<String>,
        target: TargetMachine,
        options: BackendOptions,
        mut sink: Box<dyn DiagnosticSink>,
    ) -> Self {
        // DataLayout の不備は出力継続不能なハード障害として報告し、
        // 既定のポインタ幅で構築だけは続ける (中断判断は上位に委ねる)。
        let target_info = match RuntimeTargetInfo::from_target_machine(&target) {
            Ok(info) => info,
            Err(parse_error) => {
                sink.report(
                    Diagnostic::new("IrGen", "irgen.failure", parse_error.to_string())
                        .with_extension("target", target.describe()),
                );
                RuntimeTargetInfo {
                    pointer_size: 8,
                    pointer_align: 8,
                    objc_interop: target.triple.is_apple(),
                    objc_use_null_for_empty_vtable: false,
                }
            }
        };
        let mut shapes = ShapeTable::new(PointerSpec {
            size: target_info.pointer_size,
            align: target_info.pointer_align,
        });
        let layouts = RuntimeTypeLayouts::build(&mut shapes);
        let debug_info = options.debug_info.then(DebugInfoBuilder::default);
        Self {
            target,
            target_info,
            options,
            shapes,
            layouts,
            runtime_fns: RuntimeFunctionTable::new(),
            autolink: AutolinkCollector::new(),
            global_lists: Vec::new(),
            module: ModuleIr::new(module_name),
            debug_info,
            sink,
            empty_tuple_metadata: None,
            objc_empty_cache: None,
            objc_empty_vtable: None,
            finalized: false,
        }
    }

    pub fn target(&self) -> &TargetMachine {
        &self.target
    }

    pub fn target_info(&self) -> &RuntimeTargetInfo {
        &self.target_info
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    pub fn shapes(&self) -> &ShapeTable {
        &self.shapes
    }

    pub fn layouts(&self) -> &RuntimeTypeLayouts {
        &self.layouts
    }

    pub fn module(&self) -> &ModuleIr {
        &self.module
    }

    /// ランタイム関数の宣言ハンドルを返す。同一 id には同一ハンドル。
    pub fn get_fn(&mut self, id: RuntimeFunc) -> FunctionHandle {
        self.runtime_fns
            .get_fn(&mut self.module, &self.layouts, id)
    }

    /// autolink レコードを記録する。finalize 後の記録は出力へ反映されない。
    pub fn add_link_library(&mut self, library: LinkLibrary) {
        debug_assert!(!self.finalized, "finalize 後の add_link_library");
        self.autolink.record(library);
    }

    /// 名前付きグローバルリストへシンボルを登録する。finalize でまとめて
    /// モジュールメタデータへ書き出す。
    pub fn add_to_global_list(&mut self, list: impl Into<String>, symbol: impl Into<String>) {
        let list = list.into();
        let symbol = symbol.into();
        if let Some((_, symbols)) = self
            .global_lists
            .iter_mut()
            .find(|(name, _)| *name == list)
        {
            symbols.push(symbol);
            return;
        }
        self.global_lists.push((list, vec![symbol]));
    }

    /// 空タプルの完全メタデータシンボル。要求時に一度だけ宣言する。
    pub fn empty_tuple_metadata(&mut self) -> GlobalHandle {
        if let Some(handle) = self.empty_tuple_metadata {
            return handle;
        }
        let handle = self
            .module
            .get_or_insert_global("_KMdT_", self.layouts.full_type_metadata);
        self.empty_tuple_metadata = Some(handle);
        handle
    }

    /// Objective-C ランタイムの空キャッシュシンボル。
    pub fn objc_empty_cache(&mut self) -> GlobalHandle {
        if let Some(handle) = self.objc_empty_cache {
            return handle;
        }
        let handle = self
            .module
            .get_or_insert_global("_objc_empty_cache", self.layouts.opaque);
        self.objc_empty_cache = Some(handle);
        handle
    }

    /// Objective-C ランタイムの空 vtable。
    ///
    /// 絶対シンボルを扱えない環境ではシンボル参照の代わりに null 定数を
    /// 返す。どちらになるかはターゲット事実で決まる。
    pub fn objc_empty_vtable(&mut self) -> RuntimeGlobal {
        if let Some(global) = self.objc_empty_vtable {
            return global;
        }
        let global = if self.target_info.objc_use_null_for_empty_vtable {
            RuntimeGlobal::NullPointer
        } else {
            RuntimeGlobal::Symbol(
                self.module
                    .get_or_insert_global("_objc_empty_vtable", self.layouts.opaque),
            )
        };
        self.objc_empty_vtable = Some(global);
        global
    }

    /// 未実装機能の報告。生成は継続し、中断判断は上位が行う。
    pub fn unimplemented(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.sink.report(
            Diagnostic::new("IrGen", "irgen.unimplemented", message)
                .with_extension("loc", loc.to_string()),
        );
    }

    /// 正しい出力を作れない条件の報告。このコア自身は生成を止めない。
    pub fn error(&mut self, loc: SourceLoc, message: impl Into<String>) {
        self.sink.report(
            Diagnostic::new("IrGen", "irgen.failure", message)
                .with_extension("loc", loc.to_string()),
        );
    }

    /// モジュール生成完了後に一度だけ呼ぶ。保留中のグローバルリスト、
    /// autolink メタデータ、デバッグ情報をこの順で確定する。
    pub fn finalize(&mut self) {
        debug_assert!(!self.finalized, "finalize は一度だけ呼べます");
        self.emit_global_lists();
        self.autolink.flush(&mut self.module);
        if let Some(debug_info) = self.debug_info.as_mut() {
            debug_info.finalize(&mut self.module);
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn emit_global_lists(&mut self) {
        for (name, symbols) in self.global_lists.drain(..) {
            let entries = symbols.into_iter().map(|symbol| vec![symbol]).collect();
            self.module.append_flag_entries(&name, entries);
        }
    }

    /// 出力コンテナの所有権を呼び出し側へ移す。
    pub fn release_module(self) -> ModuleIr {
        debug_assert!(self.finalized, "finalize 前の release_module");
        self.module
    }

    pub fn describe(&self) -> String {
        format!(
            "irgen(target={}, shapes={}, runtime_fns={})",
            self.target.describe(),
            self.shapes.len(),
            self.runtime_fns.materialized_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{BackendOptions, RuntimeAbiContext, RuntimeGlobal};
    use crate::autolink::{LinkLibrary, LINKER_OPTIONS_FLAG};
    use crate::diagnostics::{Diagnostic, DiagnosticSink, SourceLoc};
    use crate::runtime_functions::RuntimeFunc;
    use crate::target_machine::{DataLayoutSpec, TargetMachineBuilder, Triple};

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<Diagnostic>>>);

    impl DiagnosticSink for SharedSink {
        fn report(&mut self, diagnostic: Diagnostic) {
            self.0.borrow_mut().push(diagnostic);
        }
    }

    fn context() -> RuntimeAbiContext {
        RuntimeAbiContext::new(
            "main",
            TargetMachineBuilder::new().build(),
            BackendOptions::default(),
            Box::new(SharedSink::default()),
        )
    }

    #[test]
    fn construction_builds_shape_catalog_eagerly() {
        let ctx = context();
        assert!(ctx.shapes().len() >= 14);
        assert!(ctx.shapes().lookup("kaede.refcounted").is_some());
        assert!(ctx.module().functions().is_empty());
    }

    #[test]
    fn finalize_flushes_autolink_and_sets_flag_state() {
        let mut ctx = context();
        ctx.add_link_library(LinkLibrary::library("z"));
        assert!(!ctx.is_finalized());
        ctx.finalize();
        assert!(ctx.is_finalized());
        let module = ctx.release_module();
        assert!(module.flag(LINKER_OPTIONS_FLAG).is_some());
    }

    #[test]
    fn debug_info_flag_is_emitted_only_when_enabled() {
        let mut with_debug = RuntimeAbiContext::new(
            "main",
            TargetMachineBuilder::new().build(),
            BackendOptions {
                debug_info: true,
                ..BackendOptions::default()
            },
            Box::new(SharedSink::default()),
        );
        with_debug.finalize();
        assert!(with_debug.module().flag("Debug Info Version").is_some());

        let mut without = context();
        without.finalize();
        assert!(without.module().flag("Debug Info Version").is_none());
    }

    #[test]
    fn global_lists_are_flushed_at_finalize() {
        let mut ctx = context();
        ctx.add_to_global_list("kaede.used", "kaede_main");
        ctx.add_to_global_list("kaede.used", "kaede_entry");
        assert!(ctx.module().flag("kaede.used").is_none());
        ctx.finalize();
        let flag = ctx.module().flag("kaede.used").unwrap();
        assert_eq!(flag.entries.len(), 2);
    }

    #[test]
    fn diagnostics_forward_and_return_normally() {
        let sink = SharedSink::default();
        let mut ctx = RuntimeAbiContext::new(
            "main",
            TargetMachineBuilder::new().build(),
            BackendOptions::default(),
            Box::new(sink.clone()),
        );
        ctx.unimplemented(SourceLoc::new("main.kd", 1, 1), "generic metadata");
        ctx.error(SourceLoc::unknown(), "broken target description");
        let reports = sink.0.borrow();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].code, "irgen.unimplemented");
        assert_eq!(reports[1].code, "irgen.failure");
    }

    #[test]
    fn malformed_data_layout_reports_hard_failure_and_continues() {
        let sink = SharedSink::default();
        let machine = TargetMachineBuilder::new()
            .with_data_layout(DataLayoutSpec::new("e-p:banana:8"))
            .build();
        let ctx = RuntimeAbiContext::new(
            "main",
            machine,
            BackendOptions::default(),
            Box::new(sink.clone()),
        );
        assert_eq!(sink.0.borrow().len(), 1);
        assert_eq!(sink.0.borrow()[0].code, "irgen.failure");
        // 既定幅で構築自体は続く。
        assert_eq!(ctx.target_info().pointer_size, 8);
    }

    #[test]
    fn get_fn_routes_through_the_session_cache() {
        let mut ctx = context();
        let first = ctx.get_fn(RuntimeFunc::Retain);
        let second = ctx.get_fn(RuntimeFunc::Retain);
        assert_eq!(first, second);
        assert_eq!(ctx.module().functions().len(), 1);
    }

    #[test]
    fn empty_vtable_depends_on_target_quirk() {
        let mut simulator = RuntimeAbiContext::new(
            "main",
            TargetMachineBuilder::new()
                .with_triple(Triple::AppleiOSSimulator)
                .build(),
            BackendOptions::default(),
            Box::new(SharedSink::default()),
        );
        assert_eq!(simulator.objc_empty_vtable(), RuntimeGlobal::NullPointer);

        let mut darwin = RuntimeAbiContext::new(
            "main",
            TargetMachineBuilder::new()
                .with_triple(Triple::AppleDarwin)
                .build(),
            BackendOptions::default(),
            Box::new(SharedSink::default()),
        );
        match darwin.objc_empty_vtable() {
            RuntimeGlobal::Symbol(handle) => {
                assert_eq!(darwin.module().global(handle).name, "_objc_empty_vtable");
            }
            RuntimeGlobal::NullPointer => panic!("darwin はシンボル参照を使う"),
        }
    }

    #[test]
    fn well_known_globals_are_memoized() {
        let mut ctx = context();
        let first = ctx.empty_tuple_metadata();
        let second = ctx.empty_tuple_metadata();
        assert_eq!(first, second);
        assert_eq!(ctx.module().globals().len(), 1);
        assert_eq!(ctx.module().global(first).name, "_KMdT_");
    }
}
