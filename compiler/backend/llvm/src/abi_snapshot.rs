//! ABI 契約のスナップショット出力。
//!
//! セッションが確定した shape・宣言・リンクオプションを JSON へ直列化し、
//! セッション間・ターゲット間の差分検出に使う。同一ターゲット事実からは
//! バイト単位で同一の出力になる。

use serde::Serialize;

use crate::autolink::LINKER_OPTIONS_FLAG;
use crate::session::RuntimeAbiContext;

#[derive(Clone, Debug, Serialize)]
pub struct ShapeSnapshot {
    pub name: String,
    pub opaque: bool,
    pub fields: Vec<String>,
    pub offsets: Vec<u64>,
    pub size: u64,
    pub align: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionSnapshot {
    pub name: String,
    pub signature: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct GlobalSnapshot {
    pub name: String,
    pub shape: String,
}

/// セッション 1 回分の ABI 契約の写し。
#[derive(Clone, Debug, Serialize)]
pub struct AbiSnapshot {
    pub module: String,
    pub triple: String,
    pub data_layout: String,
    pub pointer_size: u64,
    pub shapes: Vec<ShapeSnapshot>,
    pub functions: Vec<FunctionSnapshot>,
    pub globals: Vec<GlobalSnapshot>,
    pub linker_options: Vec<Vec<String>>,
}

impl AbiSnapshot {
    pub fn capture(ctx: &RuntimeAbiContext) -> Self {
        let shapes = ctx.shapes();
        let module = ctx.module();

        let shape_snapshots = shapes
            .iter()
            .map(|(id, shape)| match shape.fields() {
                Some(fields) => {
                    let layout = shapes.struct_layout(id);
                    ShapeSnapshot {
                        name: shape.name().to_string(),
                        opaque: false,
                        fields: fields
                            .iter()
                            .map(|field| shapes.layout_of(field).description)
                            .collect(),
                        offsets: shapes.field_offsets(id),
                        size: layout.size,
                        align: layout.align,
                    }
                }
                None => ShapeSnapshot {
                    name: shape.name().to_string(),
                    opaque: true,
                    fields: Vec::new(),
                    offsets: Vec::new(),
                    size: 0,
                    align: 0,
                },
            })
            .collect();

        let functions = module
            .functions()
            .iter()
            .map(|func| FunctionSnapshot {
                name: func.name.clone(),
                signature: func.signature.render(shapes),
            })
            .collect();

        let globals = module
            .globals()
            .iter()
            .map(|global| GlobalSnapshot {
                name: global.name.clone(),
                shape: shapes.shape(global.shape).name().to_string(),
            })
            .collect();

        let linker_options = module
            .flag(LINKER_OPTIONS_FLAG)
            .map(|flag| flag.entries.clone())
            .unwrap_or_default();

        Self {
            module: module.name().to_string(),
            triple: ctx.target().triple.to_string(),
            data_layout: ctx.target().data_layout.description.clone(),
            pointer_size: ctx.target_info().pointer_size,
            shapes: shape_snapshots,
            functions,
            globals,
            linker_options,
        }
    }

    /// 決定的な JSON 表現。差分比較はこの文字列で行う。
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}
