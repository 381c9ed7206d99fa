//! セッション成果物の構造検証。
//!
//! shape カタログ・宣言テーブル・モジュールフラグが ABI 契約を満たすかを
//! 出力確定後に確認し、監査ログとして記録する。

use crate::autolink::LINKER_OPTIONS_FLAG;
use crate::diagnostics::Diagnostic;
use crate::layout::FieldShape;
use crate::session::RuntimeAbiContext;
use serde_json::Value;

/// 監査ログの一要素。
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub key: String,
    pub value: String,
}

impl AuditEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 監査ログ。
#[derive(Clone, Debug, Default)]
pub struct AuditLog {
    pub entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(AuditEntry::new(key, value));
    }

    pub fn record_value(&mut self, key: impl Into<String>, value: &Value) {
        let serialized = serde_json::to_string(value).unwrap_or_else(|_| format!("{:?}", value));
        self.record(key, serialized);
    }

    pub fn find(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }
}

/// 検証結果。
#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub passed: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub audit_log: AuditLog,
}

/// ランタイム ABI 契約の検証を担当する構造。
#[derive(Clone, Debug, Default)]
pub struct AbiVerifier;

impl AbiVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify_session(&self, ctx: &RuntimeAbiContext) -> VerificationResult {
        let mut diagnostics = Vec::new();
        let shapes = ctx.shapes();
        let module = ctx.module();

        if ctx.target().data_layout.description.is_empty() {
            diagnostics.push(
                Diagnostic::new(
                    "Backend",
                    "target.datalayout.missing",
                    "TargetMachine の DataLayout が不正です。",
                )
                .with_extension("backend", "rust"),
            );
        }

        for (_, shape) in shapes.iter() {
            let Some(fields) = shape.fields() else {
                continue;
            };
            // 可変長配列は末尾のみ。定義時にも assert されるが、契約違反は
            // 監査対象として診断にも残す。
            for (index, field) in fields.iter().enumerate() {
                if matches!(field, FieldShape::FlexArray(_)) && index + 1 != fields.len() {
                    diagnostics.push(
                        Diagnostic::new(
                            "Backend",
                            "abi.shape.flex_array_position",
                            format!("shape `{}` の可変長配列が末尾にありません。", shape.name()),
                        )
                        .with_extension("shape", shape.name().to_string()),
                    );
                }
                // 値埋め込みされる shape は閉じていなければオフセット計算が
                // 成立しない。
                if let FieldShape::Struct(inner) = field {
                    if shapes.shape(*inner).is_opaque() {
                        diagnostics.push(
                            Diagnostic::new(
                                "Backend",
                                "abi.shape.opaque_embed",
                                format!(
                                    "shape `{}` が opaque な `{}` を値埋め込みしています。",
                                    shape.name(),
                                    shapes.shape(*inner).name()
                                ),
                            )
                            .with_extension("shape", shape.name().to_string()),
                        );
                    }
                }
            }
        }

        // 参照カウントヘッダは閉じた構造で、かつランタイムと合意した幅を持つ。
        match shapes.lookup("kaede.refcounted") {
            Some(refcounted) if !shapes.shape(refcounted).is_opaque() => {
                let layout = shapes.struct_layout(refcounted);
                let expected = shapes.pointer().size + 8;
                if layout.size != expected {
                    diagnostics.push(
                        Diagnostic::new(
                            "Backend",
                            "abi.refcounted.size",
                            format!(
                                "参照カウントヘッダの幅が {} バイトになっています (期待 {})。",
                                layout.size, expected
                            ),
                        )
                        .with_extension("shape", "kaede.refcounted"),
                    );
                }
            }
            _ => {
                diagnostics.push(Diagnostic::new(
                    "Backend",
                    "abi.refcounted.missing",
                    "参照カウントヘッダ shape が定義されていません。",
                ));
            }
        }

        // プロトコル記述子はランタイム構造体と 1:1 のフィールド数を持つ。
        if let Some(protocol) = shapes.lookup("kaede.protocol") {
            let count = shapes.shape(protocol).fields().map_or(0, <[_]>::len);
            if count != 10 {
                diagnostics.push(
                    Diagnostic::new(
                        "Backend",
                        "abi.protocol.field_count",
                        format!("プロトコル記述子のフィールド数が {} です (期待 10)。", count),
                    )
                    .with_extension("shape", "kaede.protocol"),
                );
            }
        }

        // 宣言テーブルにシンボル重複がないこと。
        let mut seen = std::collections::HashSet::new();
        for func in module.functions() {
            if !seen.insert(func.name.as_str()) {
                diagnostics.push(
                    Diagnostic::new(
                        "Backend",
                        "abi.function.duplicate",
                        format!("関数 `{}` が重複宣言されています。", func.name),
                    )
                    .with_extension("function", func.name.clone()),
                );
            }
        }

        // Linker Options は空エントリを許さない。
        if let Some(flag) = module.flag(LINKER_OPTIONS_FLAG) {
            for entry in &flag.entries {
                if entry.is_empty() || entry.iter().any(String::is_empty) {
                    diagnostics.push(Diagnostic::new(
                        "Backend",
                        "abi.autolink.empty_entry",
                        "Linker Options に空のトークンが含まれています。",
                    ));
                }
            }
        }

        let mut audit = AuditLog::new();
        audit.record("audit.source", format!("abi.verify {}", module.name()));
        audit.record("backend.triple", format!("{:?}", ctx.target().triple));
        audit.record("backend.abi", ctx.target().backend_abi().to_string());
        audit.record(
            "backend.datalayout",
            ctx.target().data_layout.description.clone(),
        );
        audit.record_value(
            "backend.pointer_size",
            &Value::from(ctx.target_info().pointer_size),
        );
        audit.record_value("abi.shape_count", &Value::from(shapes.len() as u64));
        audit.record_value(
            "abi.function_count",
            &Value::from(module.functions().len() as u64),
        );
        audit.record_value(
            "abi.finalized",
            &Value::Bool(ctx.is_finalized()),
        );
        audit.record(
            "audit.verdict",
            if diagnostics.is_empty() { "pass" } else { "fail" },
        );

        VerificationResult {
            passed: diagnostics.is_empty(),
            diagnostics,
            audit_log: audit,
        }
    }
}
