//! Kaede LLVM バックエンドのランタイム型レイアウト/ABI 契約コア。
//!
//! `RuntimeAbiContext` がモジュール 1 つ分のセッションを束ね、
//! `ShapeTable`/`RuntimeTypeLayouts` が参照カウントヘッダやメタデータの
//! shape カタログを、`RuntimeFunctionTable` がランタイムエントリポイント
//! の宣言を提供する。レイアウト計算はすべて DataLayout のターゲット事実に
//! 従い、同一事実からの出力は決定的になる。

pub mod abi_snapshot;
pub mod autolink;
pub mod diagnostics;
pub mod layout;
pub mod module_ir;
pub mod runtime_functions;
pub mod runtime_types;
pub mod session;
pub mod target_info;
pub mod target_machine;
pub mod verify;

pub use abi_snapshot::{AbiSnapshot, FunctionSnapshot, GlobalSnapshot, ShapeSnapshot};
pub use autolink::{AutolinkCollector, LinkLibrary, LinkLibraryKind, LINKER_OPTIONS_FLAG};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, SourceLoc};
pub use layout::{
    FieldShape, FunctionShape, ReturnShape, ShapeId, ShapeTable, StructShape, TypeLayout,
};
pub use module_ir::{
    CallingConv, DeclaredFunction, DeclaredGlobal, FunctionAttr, FunctionHandle, GlobalHandle,
    ModuleFlag, ModuleIr,
};
pub use runtime_functions::{
    descriptor, AbiType, RuntimeFunc, RuntimeFunctionDescriptor, RuntimeFunctionTable,
};
pub use runtime_types::{RuntimeTypeLayouts, MAX_VALUE_WITNESSES};
pub use session::{BackendOptions, RuntimeAbiContext, RuntimeGlobal};
pub use target_info::RuntimeTargetInfo;
pub use target_machine::{
    CodeModel, DataLayoutParseError, DataLayoutSpec, OptimizationLevel, PointerSpec, RelocModel,
    TargetMachine, TargetMachineBuilder, Triple,
};
pub use verify::{AbiVerifier, AuditEntry, AuditLog, VerificationResult};
