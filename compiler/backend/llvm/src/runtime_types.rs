//! Kaede ランタイムのオブジェクトモデルが要求する shape 一式の構築。
//!
//! ここで定義するフィールド順・幅はランタイムライブラリの C 側定義との
//! ABI 契約そのものであり、並べ替えは互換性破壊になる。構築は依存順に
//! 一度だけ行い、セッションの生存期間中は不変。

use crate::layout::{FieldShape, FunctionShape, ReturnShape, ShapeId, ShapeTable};

/// value witness スロットの上限数。スロット自体は遅延構築。
pub const MAX_VALUE_WITNESSES: usize = 12;

/// ランタイムメタデータ shape のカタログ。
///
/// `fixed_buffer` と `value_witness_shapes` は構築時点では未実体化
/// (`None`) のまま残し、別レイヤが遅延で埋める。利用側は同一セッション内で
/// `None` を許容しなければならない。
#[derive(Clone, Debug)]
pub struct RuntimeTypeLayouts {
    /// 参照カウント付きオブジェクトヘッダ (`kaede.refcounted`)。
    /// メタデータポインタ + 32bit 制御語 ×2。本体は back-patch で与える。
    pub refcounted: ShapeId,
    pub refcounted_ptr: FieldShape,
    /// 弱参照レコード (`kaede.weak`)。ヘッダポインタを包むだけ。
    pub weak_reference: ShapeId,
    pub weak_reference_ptr: FieldShape,
    /// 型メタデータレコードの基底 (`kaede.type`)。kind 判別子のみ。
    pub type_metadata: ShapeId,
    pub type_metadata_ptr: FieldShape,
    /// witness table 本体は opaque。ポインタ型のみを使う。
    pub witness_table: ShapeId,
    pub witness_table_ptr: FieldShape,
    /// プロトコル記述子 (`kaede.protocol`)。10 フィールドの並びは
    /// Objective-C 側プロトコル互換プレフィクスとの固定契約。
    pub protocol_descriptor: ShapeId,
    pub protocol_descriptor_ptr: FieldShape,
    /// タプル要素レコード (`kaede.tuple_element_type`)。
    pub tuple_element: ShapeId,
    /// タプル型メタデータ (`kaede.tuple_type`)。基底 + 要素数 + ラベル +
    /// 末尾可変長配列。
    pub tuple_type_metadata: ShapeId,
    pub tuple_type_metadata_ptr: FieldShape,
    /// address point 直前に witness table ポインタを置いた完全メタデータ
    /// (`kaede.full_type`)。
    pub full_type_metadata: ShapeId,
    pub full_type_metadata_ptr: FieldShape,
    /// ジェネリックメタデータの生成パターン (`kaede.type_pattern`)。
    /// 生成コードからは opaque ポインタ経由でのみ触るため本体は永遠に持たない。
    pub type_metadata_pattern: ShapeId,
    pub type_metadata_pattern_ptr: FieldShape,
    /// 解放デストラクタの関数 shape (void(kaede.refcounted*))。
    pub deallocating_dtor: FunctionShape,
    /// ヒープオブジェクト用完全メタデータ (`kaede.full_heapmetadata`)。
    /// デストラクタスロットを前置する点で `full_type` と異なる。
    pub full_heap_metadata: ShapeId,
    pub full_heap_metadata_ptr: FieldShape,
    /// クロージャ値 (コードポインタ, 環境ポインタ) (`kaede.function`)。
    pub function_pair: ShapeId,
    /// witness 呼び出し値 (コードポインタ, メタデータポインタ)
    /// (`kaede.witness_function`)。
    pub witness_function_pair: ShapeId,
    /// 不透明な値領域 (`kaede.opaque`)。
    pub opaque: ShapeId,
    pub opaque_ptr: FieldShape,
    /// Objective-C オブジェクト/クラス/super 呼び出しの最小 shape。
    /// ネイティブ定義の完全な再現ではなく、呼び出しに必要な範囲のみ。
    pub objc_object: ShapeId,
    pub objc_ptr: FieldShape,
    pub objc_class: ShapeId,
    pub objc_class_ptr: FieldShape,
    pub objc_super: ShapeId,
    /// 固定サイズバッファ shape。遅延構築のため初期値は `None`。
    pub fixed_buffer: Option<ShapeId>,
    /// value witness 関数 shape のスロット。遅延構築のため初期値は `None`。
    pub value_witness_shapes: Vec<Option<FunctionShape>>,
}

impl RuntimeTypeLayouts {
    /// 依存順に全 shape を構築する。セッション構築時に一度だけ呼ぶ。
    pub fn build(shapes: &mut ShapeTable) -> Self {
        // 1. ヘッダはメタデータポインタを抱えて自己参照するため、まず
        //    opaque で前方宣言してポインタ型だけ先に作る。
        let refcounted = shapes.declare_opaque("kaede.refcounted");
        let refcounted_ptr = shapes.pointer_to(refcounted);

        // 2. 弱参照はヘッダポインタ 1 つ。
        let weak_reference =
            shapes.define("kaede.weak", vec![refcounted_ptr.clone()]);
        let weak_reference_ptr = shapes.pointer_to(weak_reference);

        // 3. 型メタデータ基底。kind 判別子はポインタ幅の整数。
        let type_metadata = shapes.define("kaede.type", vec![FieldShape::IntPtr]);
        let type_metadata_ptr = shapes.pointer_to(type_metadata);

        let witness_table = shapes.declare_opaque("kaede.witness_table");
        let witness_table_ptr = shapes.pointer_to(witness_table);

        // 4. プロトコル記述子。isa / name / 継承リスト / メソッドリスト ×4 /
        //    プロパティリスト / size / flags の 10 フィールド固定。
        let protocol_descriptor = shapes.define(
            "kaede.protocol",
            vec![
                FieldShape::RawPointer, // objc isa
                FieldShape::RawPointer, // name
                FieldShape::RawPointer, // inherited protocols
                FieldShape::RawPointer, // required instance methods
                FieldShape::RawPointer, // required class methods
                FieldShape::RawPointer, // optional instance methods
                FieldShape::RawPointer, // optional class methods
                FieldShape::RawPointer, // properties
                FieldShape::Int32,      // size
                FieldShape::Int32,      // flags
            ],
        );
        let protocol_descriptor_ptr = shapes.pointer_to(protocol_descriptor);

        // 5. タプル。要素レコードは (メタデータポインタ, バイトオフセット)。
        let tuple_element = shapes.define(
            "kaede.tuple_element_type",
            vec![type_metadata_ptr.clone(), FieldShape::IntPtr],
        );
        let tuple_type_metadata = shapes.define(
            "kaede.tuple_type",
            vec![
                FieldShape::Struct(type_metadata),
                FieldShape::IntPtr,     // 要素数
                FieldShape::RawPointer, // ラベル文字列 (無ければ null)
                FieldShape::FlexArray(tuple_element),
            ],
        );
        let tuple_type_metadata_ptr = shapes.pointer_to(tuple_type_metadata);

        // 6. 完全メタデータ。witness table ポインタを address point の
        //    手前に置く。resilience 対応のための意図的な並びで、変更不可。
        let full_type_metadata = shapes.define(
            "kaede.full_type",
            vec![
                witness_table_ptr.clone(),
                FieldShape::Struct(type_metadata),
            ],
        );
        let full_type_metadata_ptr = shapes.pointer_to(full_type_metadata);

        // 7. メタデータパターン。本体は意図的に与えない。
        let type_metadata_pattern = shapes.declare_opaque("kaede.type_pattern");
        let type_metadata_pattern_ptr = shapes.pointer_to(type_metadata_pattern);

        // 8. デストラクタスロット付きのヒープ用完全メタデータ。
        let deallocating_dtor =
            FunctionShape::new(vec![refcounted_ptr.clone()], ReturnShape::Void);
        let full_heap_metadata = shapes.define(
            "kaede.full_heapmetadata",
            vec![
                FieldShape::FunctionPointer(Box::new(deallocating_dtor.clone())),
                witness_table_ptr.clone(),
                FieldShape::Struct(type_metadata),
            ],
        );
        let full_heap_metadata_ptr = shapes.pointer_to(full_heap_metadata);

        // ヘッダ本体の back-patch。メタデータポインタ + 参照カウント語 ×2。
        shapes.set_body(
            refcounted,
            vec![
                type_metadata_ptr.clone(),
                FieldShape::Int32,
                FieldShape::Int32,
            ],
        );

        // 9. (コードポインタ, 環境) のペア表現。
        let function_pair = shapes.define(
            "kaede.function",
            vec![FieldShape::CodePointer, refcounted_ptr.clone()],
        );
        let witness_function_pair = shapes.define(
            "kaede.witness_function",
            vec![FieldShape::CodePointer, type_metadata_ptr.clone()],
        );

        let opaque = shapes.declare_opaque("kaede.opaque");
        let opaque_ptr = shapes.pointer_to(opaque);

        // 10. Objective-C 連携 shape。
        let objc_object = shapes.declare_opaque("objc_object");
        let objc_ptr = shapes.pointer_to(objc_object);
        let objc_class = shapes.declare_opaque("objc_class");
        let objc_class_ptr = shapes.pointer_to(objc_class);
        shapes.set_body(
            objc_class,
            vec![
                objc_class_ptr.clone(), // isa
                objc_class_ptr.clone(), // superclass
                opaque_ptr.clone(),     // cache
                opaque_ptr.clone(),     // vtable
                FieldShape::IntPtr,     // data + flags
            ],
        );
        let objc_super = shapes.define(
            "objc_super",
            vec![objc_ptr.clone(), objc_class_ptr.clone()],
        );

        Self {
            refcounted,
            refcounted_ptr,
            weak_reference,
            weak_reference_ptr,
            type_metadata,
            type_metadata_ptr,
            witness_table,
            witness_table_ptr,
            protocol_descriptor,
            protocol_descriptor_ptr,
            tuple_element,
            tuple_type_metadata,
            tuple_type_metadata_ptr,
            full_type_metadata,
            full_type_metadata_ptr,
            type_metadata_pattern,
            type_metadata_pattern_ptr,
            deallocating_dtor,
            full_heap_metadata,
            full_heap_metadata_ptr,
            function_pair,
            witness_function_pair,
            opaque,
            opaque_ptr,
            objc_object,
            objc_ptr,
            objc_class,
            objc_class_ptr,
            objc_super,
            fixed_buffer: None,
            value_witness_shapes: vec![None; MAX_VALUE_WITNESSES],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeTypeLayouts;
    use crate::layout::ShapeTable;
    use crate::target_machine::PointerSpec;

    fn build() -> (ShapeTable, RuntimeTypeLayouts) {
        let mut shapes = ShapeTable::new(PointerSpec { size: 8, align: 8 });
        let layouts = RuntimeTypeLayouts::build(&mut shapes);
        (shapes, layouts)
    }

    #[test]
    fn refcounted_header_is_backpatched() {
        let (shapes, layouts) = build();
        let shape = shapes.shape(layouts.refcounted);
        assert!(!shape.is_opaque());
        assert_eq!(shape.fields().unwrap().len(), 3);
        // 64bit ではメタデータポインタ 8 + 4 + 4 = 16。
        assert_eq!(shapes.struct_layout(layouts.refcounted).size, 16);
    }

    #[test]
    fn protocol_descriptor_has_ten_fields_in_order() {
        let (shapes, layouts) = build();
        let fields = shapes
            .shape(layouts.protocol_descriptor)
            .fields()
            .unwrap()
            .to_vec();
        assert_eq!(fields.len(), 10);
        let offsets = shapes.field_offsets(layouts.protocol_descriptor);
        // 8 ポインタ + i32 ×2。
        assert_eq!(offsets[8], 64);
        assert_eq!(offsets[9], 68);
        assert_eq!(shapes.struct_layout(layouts.protocol_descriptor).size, 72);
    }

    #[test]
    fn full_type_places_witness_table_before_address_point() {
        let (shapes, layouts) = build();
        let offsets = shapes.field_offsets(layouts.full_type_metadata);
        assert!(offsets[0] < offsets[1]);
        assert_eq!(offsets[0], 0);
    }

    #[test]
    fn heap_metadata_prefixes_destructor_slot() {
        let (shapes, layouts) = build();
        let offsets = shapes.field_offsets(layouts.full_heap_metadata);
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets, vec![0, 8, 16]);
    }

    #[test]
    fn tuple_metadata_is_open() {
        let (shapes, layouts) = build();
        assert!(shapes.shape(layouts.tuple_type_metadata).is_open());
        assert!(!shapes.shape(layouts.tuple_element).is_open());
    }

    #[test]
    fn pattern_and_witness_table_stay_opaque() {
        let (shapes, layouts) = build();
        assert!(shapes.shape(layouts.type_metadata_pattern).is_opaque());
        assert!(shapes.shape(layouts.witness_table).is_opaque());
    }

    #[test]
    fn value_witness_slots_start_unmaterialized() {
        let (_, layouts) = build();
        assert!(layouts.fixed_buffer.is_none());
        assert!(layouts.value_witness_shapes.iter().all(Option::is_none));
    }

    #[test]
    fn objc_class_shape_matches_minimal_native_prefix() {
        let (shapes, layouts) = build();
        let fields = shapes.shape(layouts.objc_class).fields().unwrap();
        assert_eq!(fields.len(), 5);
        assert_eq!(shapes.struct_layout(layouts.objc_class).size, 40);
    }
}
