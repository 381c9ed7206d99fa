use std::collections::HashMap;

use crate::layout::{FunctionShape, ShapeId, ShapeTable};

/// 呼び出し規約。ランタイム関数は現状 C 規約で宣言する。
// TODO(backend.todo.runtime_cc): 対応プラットフォームでは専用の軽量規約へ切り替える。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallingConv {
    C,
}

/// 宣言に付与する関数属性。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionAttr {
    NoUnwind,
    ReadNone,
    ReadOnly,
}

/// モジュール内で宣言済みの関数を指すハンドル。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionHandle(usize);

/// モジュール内で宣言済みのグローバルを指すハンドル。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlobalHandle(usize);

/// 外部関数の宣言レコード。
#[derive(Clone, Debug)]
pub struct DeclaredFunction {
    pub name: String,
    pub signature: FunctionShape,
    pub calling_conv: CallingConv,
    pub attributes: Vec<FunctionAttr>,
}

/// グローバルシンボルの宣言レコード。
#[derive(Clone, Debug)]
pub struct DeclaredGlobal {
    pub name: String,
    pub shape: ShapeId,
}

/// モジュールレベルのフラグ (名前付きメタデータ列)。
/// 同名フラグへの追記は置換ではなく append。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleFlag {
    pub name: String,
    pub entries: Vec<Vec<String>>,
}

/// 生成対象モジュールの出力コンテナ。
///
/// shape / 関数宣言 / リンカー指示メタデータの登録先であり、`finalize`
/// 後に呼び出し側へ所有権ごと引き渡される。
#[derive(Clone, Debug)]
pub struct ModuleIr {
    name: String,
    functions: Vec<DeclaredFunction>,
    function_lookup: HashMap<String, FunctionHandle>,
    globals: Vec<DeclaredGlobal>,
    global_lookup: HashMap<String, GlobalHandle>,
    flags: Vec<ModuleFlag>,
}

impl ModuleIr {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            function_lookup: HashMap::new(),
            globals: Vec::new(),
            global_lookup: HashMap::new(),
            flags: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 外部関数を宣言する (get-or-insert)。
    ///
    /// 既存宣言がある場合はシグネチャの一致を検査して同じハンドルを返す。
    /// 同名を異なるシグネチャで再宣言するのは呼び出し側のバグ。
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        signature: FunctionShape,
        calling_conv: CallingConv,
        attributes: Vec<FunctionAttr>,
    ) -> FunctionHandle {
        let name = name.into();
        if let Some(&handle) = self.function_lookup.get(&name) {
            let existing = &self.functions[handle.0];
            assert!(
                existing.signature == signature,
                "関数 `{}` が異なるシグネチャで再宣言されました",
                name
            );
            return handle;
        }
        let handle = FunctionHandle(self.functions.len());
        self.functions.push(DeclaredFunction {
            name: name.clone(),
            signature,
            calling_conv,
            attributes,
        });
        self.function_lookup.insert(name, handle);
        handle
    }

    pub fn function(&self, handle: FunctionHandle) -> &DeclaredFunction {
        &self.functions[handle.0]
    }

    pub fn functions(&self) -> &[DeclaredFunction] {
        &self.functions
    }

    /// グローバルシンボルを宣言する (get-or-insert)。
    pub fn get_or_insert_global(
        &mut self,
        name: impl Into<String>,
        shape: ShapeId,
    ) -> GlobalHandle {
        let name = name.into();
        if let Some(&handle) = self.global_lookup.get(&name) {
            return handle;
        }
        let handle = GlobalHandle(self.globals.len());
        self.globals.push(DeclaredGlobal {
            name: name.clone(),
            shape,
        });
        self.global_lookup.insert(name, handle);
        handle
    }

    pub fn global(&self, handle: GlobalHandle) -> &DeclaredGlobal {
        &self.globals[handle.0]
    }

    pub fn globals(&self) -> &[DeclaredGlobal] {
        &self.globals
    }

    /// 名前付きモジュールフラグへエントリ列を追記する。
    pub fn append_flag_entries(&mut self, name: &str, entries: Vec<Vec<String>>) {
        if let Some(flag) = self.flags.iter_mut().find(|flag| flag.name == name) {
            flag.entries.extend(entries);
            return;
        }
        self.flags.push(ModuleFlag {
            name: name.to_string(),
            entries,
        });
    }

    pub fn flag(&self, name: &str) -> Option<&ModuleFlag> {
        self.flags.iter().find(|flag| flag.name == name)
    }

    pub fn flags(&self) -> &[ModuleFlag] {
        &self.flags
    }

    pub fn describe(&self, shapes: &ShapeTable) -> String {
        let mut summary = Vec::new();
        summary.push(format!("module {}", self.name));
        summary.push(format!("functions: {}", self.functions.len()));
        summary.push(format!("globals: {}", self.globals.len()));
        summary.push(format!("shapes: {}", shapes.len()));
        for flag in &self.flags {
            summary.push(format!("flag {}: {} entries", flag.name, flag.entries.len()));
        }
        summary.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::{CallingConv, FunctionAttr, ModuleIr};
    use crate::layout::{FieldShape, FunctionShape, ReturnShape};

    fn void_fn() -> FunctionShape {
        FunctionShape::new(vec![FieldShape::RawPointer], ReturnShape::Void)
    }

    #[test]
    fn declare_function_is_get_or_insert() {
        let mut module = ModuleIr::new("m");
        let first = module.declare_function(
            "kaede_release",
            void_fn(),
            CallingConv::C,
            vec![FunctionAttr::NoUnwind],
        );
        let second =
            module.declare_function("kaede_release", void_fn(), CallingConv::C, vec![]);
        assert_eq!(first, second);
        assert_eq!(module.functions().len(), 1);
    }

    #[test]
    #[should_panic(expected = "再宣言")]
    fn redeclaring_with_different_signature_panics() {
        let mut module = ModuleIr::new("m");
        module.declare_function("kaede_retain", void_fn(), CallingConv::C, vec![]);
        let other = FunctionShape::new(
            vec![FieldShape::RawPointer],
            ReturnShape::Single(FieldShape::RawPointer),
        );
        module.declare_function("kaede_retain", other, CallingConv::C, vec![]);
    }

    #[test]
    fn flag_entries_append_instead_of_replacing() {
        let mut module = ModuleIr::new("m");
        module.append_flag_entries("Linker Options", vec![vec!["-lz".into()]]);
        module.append_flag_entries(
            "Linker Options",
            vec![vec!["-framework".into(), "Foundation".into()]],
        );
        let flag = module.flag("Linker Options").unwrap();
        assert_eq!(flag.entries.len(), 2);
    }
}
