//! ランタイムエントリポイントの宣言カタログ。
//!
//! カタログはプロセス全体で共有する読み取り専用の静的テーブルで、
//! セッション状態を持たない。宣言の実体化 (モジュールへの登録) は
//! セッション側の [`RuntimeFunctionTable`] が要求時に一度だけ行う。
//! 大半のモジュールはカタログの一部しか参照しないため、先行宣言で
//! 外部シンボル表を膨らませない設計にしている。

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::layout::{FieldShape, FunctionShape, ReturnShape};
use crate::module_ir::{CallingConv, FunctionAttr, FunctionHandle, ModuleIr};
use crate::runtime_types::RuntimeTypeLayouts;

/// カタログ内のエントリポイント識別子。identity はシンボル名と 1:1。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeFunc {
    AllocObject,
    DeallocObject,
    SlowAlloc,
    SlowRawDealloc,
    Retain,
    RetainNoResult,
    Release,
    AllocBox,
    WeakInit,
    WeakAssign,
    WeakLoadStrong,
    WeakTakeStrong,
    WeakDestroy,
    GetFunctionTypeMetadata,
    GetGenericMetadata,
    GetMetatypeMetadata,
    GetObjCClassMetadata,
    GetTupleTypeMetadata,
    DynamicCastClass,
    DynamicCastClassUnconditional,
}

/// 宣言シグネチャを構成する ABI 型の記号表現。
///
/// ShapeId はセッション状態なので、静的カタログには記号を置き、
/// 実体化時に [`RuntimeTypeLayouts`] で解決する。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiType {
    RefCountedPtr,
    TypeMetadataPtr,
    TupleTypeMetadataPtr,
    TypeMetadataPatternPtr,
    WeakReferencePtr,
    WitnessTablePtr,
    OpaquePtr,
    ObjCClassPtr,
    RawPtr,
    Size,
    Int32,
}

impl AbiType {
    pub fn resolve(self, layouts: &RuntimeTypeLayouts) -> FieldShape {
        match self {
            AbiType::RefCountedPtr => layouts.refcounted_ptr.clone(),
            AbiType::TypeMetadataPtr => layouts.type_metadata_ptr.clone(),
            AbiType::TupleTypeMetadataPtr => layouts.tuple_type_metadata_ptr.clone(),
            AbiType::TypeMetadataPatternPtr => layouts.type_metadata_pattern_ptr.clone(),
            AbiType::WeakReferencePtr => layouts.weak_reference_ptr.clone(),
            AbiType::WitnessTablePtr => layouts.witness_table_ptr.clone(),
            AbiType::OpaquePtr => layouts.opaque_ptr.clone(),
            AbiType::ObjCClassPtr => layouts.objc_class_ptr.clone(),
            AbiType::RawPtr => FieldShape::RawPointer,
            AbiType::Size => FieldShape::IntPtr,
            AbiType::Int32 => FieldShape::Int32,
        }
    }
}

/// ランタイム関数 1 件分の宣言記述子。
#[derive(Clone, Copy, Debug)]
pub struct RuntimeFunctionDescriptor {
    pub id: RuntimeFunc,
    pub symbol: &'static str,
    pub calling_conv: CallingConv,
    pub returns: &'static [AbiType],
    pub args: &'static [AbiType],
    pub attributes: &'static [FunctionAttr],
}

use AbiType::*;
use FunctionAttr::{NoUnwind, ReadNone, ReadOnly};

/// 固定カタログ。並びはシンボル名の論理グループ順で、識別子が identity。
pub static RUNTIME_FUNCTIONS: &[RuntimeFunctionDescriptor] = &[
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::AllocObject,
        symbol: "kaede_allocObject",
        calling_conv: CallingConv::C,
        returns: &[RefCountedPtr],
        args: &[TypeMetadataPtr, Size, Size],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::DeallocObject,
        symbol: "kaede_deallocObject",
        calling_conv: CallingConv::C,
        returns: &[],
        args: &[RefCountedPtr, Size],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::SlowAlloc,
        symbol: "kaede_slowAlloc",
        calling_conv: CallingConv::C,
        returns: &[RawPtr],
        args: &[Size, Size],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::SlowRawDealloc,
        symbol: "kaede_slowRawDealloc",
        calling_conv: CallingConv::C,
        returns: &[],
        args: &[RawPtr, Size],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::Retain,
        symbol: "kaede_retain",
        calling_conv: CallingConv::C,
        returns: &[RefCountedPtr],
        args: &[RefCountedPtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::RetainNoResult,
        symbol: "kaede_retain_noresult",
        calling_conv: CallingConv::C,
        returns: &[],
        args: &[RefCountedPtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::Release,
        symbol: "kaede_release",
        calling_conv: CallingConv::C,
        returns: &[],
        args: &[RefCountedPtr],
        attributes: &[NoUnwind],
    },
    // box 生成はヘッダと値領域の 2 値を返すため、戻り値は無名集約になる。
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::AllocBox,
        symbol: "kaede_allocBox",
        calling_conv: CallingConv::C,
        returns: &[RefCountedPtr, OpaquePtr],
        args: &[TypeMetadataPtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::WeakInit,
        symbol: "kaede_weakInit",
        calling_conv: CallingConv::C,
        returns: &[],
        args: &[WeakReferencePtr, RefCountedPtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::WeakAssign,
        symbol: "kaede_weakAssign",
        calling_conv: CallingConv::C,
        returns: &[],
        args: &[WeakReferencePtr, RefCountedPtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::WeakLoadStrong,
        symbol: "kaede_weakLoadStrong",
        calling_conv: CallingConv::C,
        returns: &[RefCountedPtr],
        args: &[WeakReferencePtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::WeakTakeStrong,
        symbol: "kaede_weakTakeStrong",
        calling_conv: CallingConv::C,
        returns: &[RefCountedPtr],
        args: &[WeakReferencePtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::WeakDestroy,
        symbol: "kaede_weakDestroy",
        calling_conv: CallingConv::C,
        returns: &[],
        args: &[WeakReferencePtr],
        attributes: &[NoUnwind],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::GetFunctionTypeMetadata,
        symbol: "kaede_getFunctionTypeMetadata",
        calling_conv: CallingConv::C,
        returns: &[TypeMetadataPtr],
        args: &[TypeMetadataPtr, TypeMetadataPtr],
        attributes: &[NoUnwind, ReadNone],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::GetGenericMetadata,
        symbol: "kaede_getGenericMetadata",
        calling_conv: CallingConv::C,
        returns: &[TypeMetadataPtr],
        args: &[TypeMetadataPatternPtr, RawPtr],
        attributes: &[NoUnwind, ReadOnly],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::GetMetatypeMetadata,
        symbol: "kaede_getMetatypeMetadata",
        calling_conv: CallingConv::C,
        returns: &[TypeMetadataPtr],
        args: &[TypeMetadataPtr],
        attributes: &[NoUnwind, ReadNone],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::GetObjCClassMetadata,
        symbol: "kaede_getObjCClassMetadata",
        calling_conv: CallingConv::C,
        returns: &[TypeMetadataPtr],
        args: &[ObjCClassPtr],
        attributes: &[NoUnwind, ReadNone],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::GetTupleTypeMetadata,
        symbol: "kaede_getTupleTypeMetadata",
        calling_conv: CallingConv::C,
        returns: &[TupleTypeMetadataPtr],
        args: &[Size, RawPtr, RawPtr, WitnessTablePtr],
        attributes: &[NoUnwind, ReadOnly],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::DynamicCastClass,
        symbol: "kaede_dynamicCastClass",
        calling_conv: CallingConv::C,
        returns: &[RawPtr],
        args: &[RawPtr, TypeMetadataPtr],
        attributes: &[NoUnwind, ReadOnly],
    },
    RuntimeFunctionDescriptor {
        id: RuntimeFunc::DynamicCastClassUnconditional,
        symbol: "kaede_dynamicCastClassUnconditional",
        calling_conv: CallingConv::C,
        returns: &[RawPtr],
        args: &[RawPtr, TypeMetadataPtr],
        attributes: &[NoUnwind, ReadOnly],
    },
];

static DESCRIPTOR_INDEX: Lazy<HashMap<RuntimeFunc, &'static RuntimeFunctionDescriptor>> =
    Lazy::new(|| {
        let mut index = HashMap::with_capacity(RUNTIME_FUNCTIONS.len());
        for descriptor in RUNTIME_FUNCTIONS {
            let previous = index.insert(descriptor.id, descriptor);
            assert!(previous.is_none(), "カタログ内で id が重複しています");
        }
        index
    });

/// 識別子に対応する記述子を返す。カタログは全 id を網羅している。
pub fn descriptor(id: RuntimeFunc) -> &'static RuntimeFunctionDescriptor {
    DESCRIPTOR_INDEX
        .get(&id)
        .expect("カタログに存在しない RuntimeFunc")
}

/// セッション単位の宣言キャッシュ。
///
/// 同じ id に対する 2 回目以降の要求は、宣言を再構築せずに同一の
/// ハンドルを返す。
#[derive(Debug, Default)]
pub struct RuntimeFunctionTable {
    handles: HashMap<RuntimeFunc, FunctionHandle>,
}

impl RuntimeFunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 記述子を解決してモジュールへ宣言し、ハンドルを memo 化して返す。
    pub fn get_fn(
        &mut self,
        module: &mut ModuleIr,
        layouts: &RuntimeTypeLayouts,
        id: RuntimeFunc,
    ) -> FunctionHandle {
        if let Some(&handle) = self.handles.get(&id) {
            return handle;
        }
        let descriptor = descriptor(id);
        let signature = materialize_signature(descriptor, layouts);
        let handle = module.declare_function(
            descriptor.symbol,
            signature,
            descriptor.calling_conv,
            descriptor.attributes.to_vec(),
        );
        self.handles.insert(id, handle);
        handle
    }

    pub fn materialized_count(&self) -> usize {
        self.handles.len()
    }
}

/// 戻り値 shape が 1 つなら直接返し、複数なら単一の無名集約に束ねる。
fn materialize_signature(
    descriptor: &RuntimeFunctionDescriptor,
    layouts: &RuntimeTypeLayouts,
) -> FunctionShape {
    let params = descriptor
        .args
        .iter()
        .map(|ty| ty.resolve(layouts))
        .collect();
    let ret = match descriptor.returns {
        [] => ReturnShape::Void,
        [single] => ReturnShape::Single(single.resolve(layouts)),
        many => ReturnShape::Aggregate(many.iter().map(|ty| ty.resolve(layouts)).collect()),
    };
    FunctionShape::new(params, ret)
}
