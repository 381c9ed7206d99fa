use crate::target_machine::{DataLayoutParseError, TargetMachine};

/// レイアウト構築と codegen 判断が参照するターゲット固有の事実。
///
/// セッション構築時に一度だけ計算し、以後は読み取り専用。対応外の
/// ターゲットはツールチェーン側で事前に拒否される前提のため、ここでは
/// DataLayout の解析失敗以外のエラー条件を持たない。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeTargetInfo {
    /// ポインタサイズ (バイト)。
    pub pointer_size: u64,
    /// ポインタのアラインメント (バイト)。
    pub pointer_align: u64,
    /// Objective-C ランタイムと相互運用するターゲットか。
    pub objc_interop: bool,
    /// `_objc_empty_vtable` を null 定数で代用してよいか。
    ///
    /// 絶対シンボルを正しく扱えない環境 (iOS シミュレータ等) では
    /// シンボル参照の代わりに null を埋める必要がある。
    pub objc_use_null_for_empty_vtable: bool,
}

impl RuntimeTargetInfo {
    pub fn from_target_machine(machine: &TargetMachine) -> Result<Self, DataLayoutParseError> {
        let pointer = machine.data_layout.pointer_spec()?;
        let is_apple = machine.triple.is_apple();
        Ok(Self {
            pointer_size: pointer.size,
            pointer_align: pointer.align,
            objc_interop: is_apple,
            objc_use_null_for_empty_vtable: matches!(
                machine.triple,
                crate::target_machine::Triple::AppleiOSSimulator
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeTargetInfo;
    use crate::target_machine::{TargetMachineBuilder, Triple};

    #[test]
    fn darwin_enables_objc_interop_with_real_vtable_symbol() {
        let machine = TargetMachineBuilder::new()
            .with_triple(Triple::AppleDarwin)
            .build();
        let info = RuntimeTargetInfo::from_target_machine(&machine).unwrap();
        assert!(info.objc_interop);
        assert!(!info.objc_use_null_for_empty_vtable);
        assert_eq!(info.pointer_size, 8);
    }

    #[test]
    fn simulator_substitutes_null_for_empty_vtable() {
        let machine = TargetMachineBuilder::new()
            .with_triple(Triple::AppleiOSSimulator)
            .build();
        let info = RuntimeTargetInfo::from_target_machine(&machine).unwrap();
        assert!(info.objc_use_null_for_empty_vtable);
    }

    #[test]
    fn linux_has_no_objc_interop() {
        let machine = TargetMachineBuilder::new()
            .with_triple(Triple::LinuxGNU)
            .build();
        let info = RuntimeTargetInfo::from_target_machine(&machine).unwrap();
        assert!(!info.objc_interop);
        assert!(!info.objc_use_null_for_empty_vtable);
    }
}
