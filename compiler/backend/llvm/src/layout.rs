use indexmap::IndexMap;

use crate::target_machine::PointerSpec;

/// shape テーブル内の構造体 shape を指す識別子。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(usize);

/// 関数の戻り値 shape。複数 shape は単一の無名集約として扱う。
#[derive(Clone, Debug, PartialEq)]
pub enum ReturnShape {
    Void,
    Single(FieldShape),
    Aggregate(Vec<FieldShape>),
}

/// 関数 shape。ランタイム関数宣言とデストラクタスロットで使う。
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionShape {
    pub params: Vec<FieldShape>,
    pub ret: ReturnShape,
    pub variadic: bool,
}

impl FunctionShape {
    pub fn new(params: Vec<FieldShape>, ret: ReturnShape) -> Self {
        Self {
            params,
            ret,
            variadic: false,
        }
    }

    pub fn render(&self, table: &ShapeTable) -> String {
        let params = self
            .params
            .iter()
            .map(|shape| table.layout_of(shape).description)
            .collect::<Vec<_>>()
            .join(", ");
        let ret = match &self.ret {
            ReturnShape::Void => "void".to_string(),
            ReturnShape::Single(shape) => table.layout_of(shape).description,
            ReturnShape::Aggregate(shapes) => {
                let inner = shapes
                    .iter()
                    .map(|shape| table.layout_of(shape).description)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", inner)
            }
        };
        if self.variadic {
            format!("({}, ...) -> {}", params, ret)
        } else {
            format!("({}) -> {}", params, ret)
        }
    }
}

/// 構造体フィールド 1 つ分の shape。
///
/// `Pointer(ShapeId)` は shape 本体ではなく「その shape へのポインタ型」を
/// 参照する。opaque 宣言済みの shape も指せるため、自己参照や相互参照は
/// ポインタ越しに循環なしで表現できる。
#[derive(Clone, Debug, PartialEq)]
pub enum FieldShape {
    Int8,
    Int16,
    Int32,
    Int64,
    /// ポインタ幅の整数。
    IntPtr,
    /// 型付けしない生ポインタ (i8* 相当)。
    RawPointer,
    /// シグネチャ未指定のコードポインタ。
    CodePointer,
    /// シグネチャ付き関数ポインタ。
    FunctionPointer(Box<FunctionShape>),
    /// 名前付き構造体 shape へのポインタ。
    Pointer(ShapeId),
    /// 固定サイズの入れ子構造体。
    Struct(ShapeId),
    /// 末尾の可変長配列 ([0 x elem])。最終フィールドのみ許可。
    FlexArray(ShapeId),
}

/// 名前付き構造体 shape。`body == None` は opaque 前方宣言。
#[derive(Clone, Debug)]
pub struct StructShape {
    name: String,
    body: Option<Vec<FieldShape>>,
}

impl StructShape {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_opaque(&self) -> bool {
        self.body.is_none()
    }

    pub fn fields(&self) -> Option<&[FieldShape]> {
        self.body.as_deref()
    }

    /// 末尾可変長配列を持つ「open」な shape か。直接値としては実体化しない。
    pub fn is_open(&self) -> bool {
        matches!(
            self.body.as_deref().and_then(|fields| fields.last()),
            Some(FieldShape::FlexArray(_))
        )
    }
}

/// サイズ/アラインメントと表示用の説明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeLayout {
    pub size: u64,
    pub align: u64,
    pub description: String,
}

/// 名前をキーとする shape の定義テーブル。
///
/// フィールド順と幅はセッションの生存期間中固定で、ランタイムライブラリ側の
/// 同名構造体定義と一致しなければならない (ABI 契約)。名前の重複定義は
/// 呼び出し側のバグとして panic で扱う。
#[derive(Clone, Debug)]
pub struct ShapeTable {
    shapes: IndexMap<String, StructShape>,
    pointer: PointerSpec,
}

impl ShapeTable {
    pub fn new(pointer: PointerSpec) -> Self {
        Self {
            shapes: IndexMap::new(),
            pointer,
        }
    }

    pub fn pointer(&self) -> PointerSpec {
        self.pointer
    }

    /// 本体なしの opaque shape を前方宣言する。
    pub fn declare_opaque(&mut self, name: impl Into<String>) -> ShapeId {
        let name = name.into();
        assert!(
            !self.shapes.contains_key(&name),
            "shape `{}` は定義済みです",
            name
        );
        let id = ShapeId(self.shapes.len());
        self.shapes.insert(
            name.clone(),
            StructShape { name, body: None },
        );
        id
    }

    /// フィールド列から shape を定義する。
    pub fn define(&mut self, name: impl Into<String>, fields: Vec<FieldShape>) -> ShapeId {
        let id = self.declare_opaque(name);
        self.set_body(id, fields);
        id
    }

    /// opaque 宣言済み shape に本体を与える (back-patch)。
    pub fn set_body(&mut self, id: ShapeId, fields: Vec<FieldShape>) {
        Self::validate_fields(&fields);
        let shape = self
            .shapes
            .get_index_mut(id.0)
            .map(|(_, shape)| shape)
            .expect("未知の ShapeId");
        assert!(
            shape.body.is_none(),
            "shape `{}` の本体は設定済みです",
            shape.name
        );
        shape.body = Some(fields);
    }

    fn validate_fields(fields: &[FieldShape]) {
        for (index, field) in fields.iter().enumerate() {
            if matches!(field, FieldShape::FlexArray(_)) {
                assert!(
                    index + 1 == fields.len(),
                    "可変長配列は最終フィールドにのみ置けます"
                );
            }
        }
    }

    pub fn shape(&self, id: ShapeId) -> &StructShape {
        self.shapes
            .get_index(id.0)
            .map(|(_, shape)| shape)
            .expect("未知の ShapeId")
    }

    pub fn lookup(&self, name: &str) -> Option<ShapeId> {
        self.shapes.get_index_of(name).map(ShapeId)
    }

    /// shape へのポインタ型を導出する。
    pub fn pointer_to(&self, id: ShapeId) -> FieldShape {
        // opaque でも可。ポインタ型は本体に依存しない。
        let _ = self.shape(id);
        FieldShape::Pointer(id)
    }

    /// ポインタ型 shape の参照先を返す (概念上のデリファレンス)。
    pub fn pointee(&self, field: &FieldShape) -> Option<ShapeId> {
        match field {
            FieldShape::Pointer(id) => Some(*id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// 定義順の列挙。スナップショット生成に使う。
    pub fn iter(&self) -> impl Iterator<Item = (ShapeId, &StructShape)> {
        self.shapes
            .values()
            .enumerate()
            .map(|(index, shape)| (ShapeId(index), shape))
    }

    /// フィールド shape のサイズ/アラインメントを DataLayout に従って返す。
    pub fn layout_of(&self, field: &FieldShape) -> TypeLayout {
        match field {
            FieldShape::Int8 => TypeLayout {
                size: 1,
                align: 1,
                description: "i8".into(),
            },
            FieldShape::Int16 => TypeLayout {
                size: 2,
                align: 2,
                description: "i16".into(),
            },
            FieldShape::Int32 => TypeLayout {
                size: 4,
                align: 4,
                description: "i32".into(),
            },
            FieldShape::Int64 => TypeLayout {
                size: 8,
                align: 8,
                description: "i64".into(),
            },
            FieldShape::IntPtr => TypeLayout {
                size: self.pointer.size,
                align: self.pointer.align,
                description: format!("i{}", self.pointer.size * 8),
            },
            FieldShape::RawPointer => TypeLayout {
                size: self.pointer.size,
                align: self.pointer.align,
                description: "i8*".into(),
            },
            FieldShape::CodePointer => TypeLayout {
                size: self.pointer.size,
                align: self.pointer.align,
                description: "code*".into(),
            },
            FieldShape::FunctionPointer(signature) => TypeLayout {
                size: self.pointer.size,
                align: self.pointer.align,
                description: format!("{}*", signature.render(self)),
            },
            FieldShape::Pointer(id) => TypeLayout {
                size: self.pointer.size,
                align: self.pointer.align,
                description: format!("%{}*", self.shape(*id).name),
            },
            FieldShape::Struct(id) => self.struct_layout(*id),
            FieldShape::FlexArray(id) => {
                let element = self.struct_layout(*id);
                TypeLayout {
                    size: 0,
                    align: element.align,
                    description: format!("[0 x %{}]", self.shape(*id).name),
                }
            }
        }
    }

    /// 構造体 shape 全体のレイアウト。opaque への問い合わせは呼び出し側のバグ。
    pub fn struct_layout(&self, id: ShapeId) -> TypeLayout {
        let shape = self.shape(id);
        let fields = shape
            .fields()
            .unwrap_or_else(|| panic!("opaque shape `{}` にはレイアウトがありません", shape.name));
        let (_, size, align) = self.layout_fields(fields);
        TypeLayout {
            size,
            align,
            description: format!("%{}", shape.name),
        }
    }

    /// 各フィールドのバイトオフセット (定義順)。
    pub fn field_offsets(&self, id: ShapeId) -> Vec<u64> {
        let shape = self.shape(id);
        let fields = shape
            .fields()
            .unwrap_or_else(|| panic!("opaque shape `{}` にはオフセットがありません", shape.name));
        let (offsets, _, _) = self.layout_fields(fields);
        offsets
    }

    fn layout_fields(&self, fields: &[FieldShape]) -> (Vec<u64>, u64, u64) {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset: u64 = 0;
        let mut align: u64 = 1;
        for field in fields {
            if let FieldShape::Struct(inner) = field {
                assert!(
                    !self.shape(*inner).is_open(),
                    "open な shape `{}` は値として埋め込めません",
                    self.shape(*inner).name
                );
            }
            let layout = self.layout_of(field);
            align = align.max(layout.align);
            offset = align_up(offset, layout.align);
            offsets.push(offset);
            offset += layout.size;
        }
        (offsets, align_up(offset, align), align)
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::{FieldShape, ShapeTable};
    use crate::target_machine::PointerSpec;

    fn table() -> ShapeTable {
        ShapeTable::new(PointerSpec { size: 8, align: 8 })
    }

    #[test]
    fn struct_layout_aligns_fields() {
        let mut shapes = table();
        let id = shapes.define(
            "t.mixed",
            vec![FieldShape::Int32, FieldShape::RawPointer, FieldShape::Int8],
        );
        assert_eq!(shapes.field_offsets(id), vec![0, 8, 16]);
        let layout = shapes.struct_layout(id);
        assert_eq!(layout.size, 24);
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn backpatched_opaque_shape_gets_a_body() {
        let mut shapes = table();
        let header = shapes.declare_opaque("t.header");
        assert!(shapes.shape(header).is_opaque());
        shapes.set_body(
            header,
            vec![FieldShape::RawPointer, FieldShape::Int32, FieldShape::Int32],
        );
        assert!(!shapes.shape(header).is_opaque());
        assert_eq!(shapes.struct_layout(header).size, 16);
    }

    #[test]
    fn pointer_round_trip_preserves_field_list() {
        let mut shapes = table();
        let fields = vec![FieldShape::Int64, FieldShape::Int32, FieldShape::RawPointer];
        let id = shapes.define("t.roundtrip", fields.clone());
        let pointer = shapes.pointer_to(id);
        let pointee = shapes.pointee(&pointer).unwrap();
        assert_eq!(shapes.shape(pointee).fields().unwrap(), fields.as_slice());
    }

    #[test]
    fn flex_array_contributes_alignment_but_no_size() {
        let mut shapes = table();
        let element = shapes.define("t.elem", vec![FieldShape::RawPointer, FieldShape::IntPtr]);
        let open = shapes.define(
            "t.open",
            vec![FieldShape::IntPtr, FieldShape::FlexArray(element)],
        );
        assert!(shapes.shape(open).is_open());
        let layout = shapes.struct_layout(open);
        assert_eq!(layout.size, 8);
        assert_eq!(layout.align, 8);
    }

    #[test]
    #[should_panic(expected = "定義済み")]
    fn duplicate_name_is_a_programmer_error() {
        let mut shapes = table();
        shapes.define("t.dup", vec![FieldShape::Int32]);
        shapes.define("t.dup", vec![FieldShape::Int64]);
    }

    #[test]
    #[should_panic(expected = "最終フィールド")]
    fn flex_array_must_be_last() {
        let mut shapes = table();
        let element = shapes.define("t.elem", vec![FieldShape::Int32]);
        shapes.define(
            "t.bad",
            vec![FieldShape::FlexArray(element), FieldShape::Int32],
        );
    }

    #[test]
    fn pointer_width_tracks_data_layout() {
        let mut narrow = ShapeTable::new(PointerSpec { size: 4, align: 4 });
        let id = narrow.define("t.ptr", vec![FieldShape::RawPointer, FieldShape::IntPtr]);
        let layout = narrow.struct_layout(id);
        assert_eq!(layout.size, 8);
        assert_eq!(layout.align, 4);
        assert_eq!(narrow.layout_of(&FieldShape::IntPtr).description, "i32");
    }
}
