use std::fmt;

use thiserror::Error;

/// Kaede LLVM バックエンドで想定するターゲット Triple。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Triple {
    LinuxGNU,
    AppleDarwin,
    AppleiOSSimulator,
    WindowsGNU,
    WindowsMSVC,
}

impl Triple {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Triple::LinuxGNU => "x86_64-unknown-linux-gnu",
            Triple::AppleDarwin => "x86_64-apple-darwin",
            Triple::AppleiOSSimulator => "x86_64-apple-ios-simulator",
            Triple::WindowsGNU => "x86_64-pc-windows-gnu",
            Triple::WindowsMSVC => "x86_64-pc-windows-msvc",
        }
    }

    /// Apple 系ターゲットかどうか。Objective-C ランタイム連携の有無を決める。
    pub fn is_apple(&self) -> bool {
        matches!(self, Triple::AppleDarwin | Triple::AppleiOSSimulator)
    }

    pub fn from_str(triple: &str) -> Option<Self> {
        match triple.to_ascii_lowercase().as_str() {
            "x86_64-unknown-linux-gnu" | "x86_64-linux-gnu" | "x86_64-linux" => {
                Some(Triple::LinuxGNU)
            }
            "x86_64-apple-darwin" => Some(Triple::AppleDarwin),
            "x86_64-apple-ios-simulator" | "x86_64-apple-ios" => Some(Triple::AppleiOSSimulator),
            "x86_64-pc-windows-gnu" | "x86_64-windows-gnu" => Some(Triple::WindowsGNU),
            "x86_64-pc-windows-msvc" | "x86_64-windows-msvc" => Some(Triple::WindowsMSVC),
            _ => None,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 再配置モデル。
#[derive(Clone, Copy, Debug)]
pub enum RelocModel {
    Default,
    Static,
    PIC,
    DynamicNoPic,
}

/// コードモデル。
#[derive(Clone, Copy, Debug)]
pub enum CodeModel {
    Default,
    Small,
    Kernel,
    Medium,
    Large,
}

/// 最適化レベル。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizationLevel {
    O0,
    O1,
    O2,
    O3,
    Os,
}

/// DataLayout 文字列の解析で発生するエラー。
#[derive(Debug, Error)]
pub enum DataLayoutParseError {
    #[error("DataLayout のポインタ指定 `{0}` を解析できません")]
    MalformedPointerSpec(String),
    #[error("ポインタ幅 {0} bit はバイト境界に揃っていません")]
    PointerWidthNotByteSized(u32),
}

/// DataLayout 文字列。ポインタ幅の導出元になる。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayoutSpec {
    pub description: String,
}

impl DataLayoutSpec {
    pub fn new(layout: impl Into<String>) -> Self {
        Self {
            description: layout.into(),
        }
    }

    pub fn system_v() -> Self {
        Self::new("e-m:e-p:64:64-f64:64:64-v128:128:128-a:0:64")
    }

    /// `p:<bits>:<abi>` 部分を解析してポインタのサイズ/アラインメント (バイト) を返す。
    /// `p:` 指定を持たない DataLayout は LLVM の既定に合わせて 64bit とみなす。
    pub fn pointer_spec(&self) -> Result<PointerSpec, DataLayoutParseError> {
        for chunk in self.description.split('-') {
            let Some(rest) = chunk.strip_prefix("p:") else {
                continue;
            };
            let mut parts = rest.split(':');
            let bits_text = parts.next().unwrap_or("");
            let bits: u32 = bits_text
                .parse()
                .map_err(|_| DataLayoutParseError::MalformedPointerSpec(chunk.to_string()))?;
            if bits == 0 || bits % 8 != 0 {
                return Err(DataLayoutParseError::PointerWidthNotByteSized(bits));
            }
            let align_bits: u32 = match parts.next() {
                Some(text) => text
                    .parse()
                    .map_err(|_| DataLayoutParseError::MalformedPointerSpec(chunk.to_string()))?,
                None => bits,
            };
            if align_bits == 0 || align_bits % 8 != 0 {
                return Err(DataLayoutParseError::PointerWidthNotByteSized(align_bits));
            }
            return Ok(PointerSpec {
                size: u64::from(bits / 8),
                align: u64::from(align_bits / 8),
            });
        }
        Ok(PointerSpec { size: 8, align: 8 })
    }
}

/// ポインタのサイズとアラインメント (バイト単位)。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerSpec {
    pub size: u64,
    pub align: u64,
}

#[derive(Clone, Copy, Debug)]
struct TargetSpec {
    triple: Triple,
    cpu: &'static str,
    default_features: &'static str,
    data_layout: &'static str,
    abi: &'static str,
}

impl TargetSpec {
    fn for_triple(triple: Triple) -> Self {
        match triple {
            Triple::LinuxGNU => TargetSpec {
                triple,
                cpu: "x86-64",
                default_features: "+sse4.2,+popcnt",
                data_layout: "e-m:e-p:64:64-f64:64:64-v128:128:128-a:0:64",
                abi: "system_v",
            },
            Triple::AppleDarwin => TargetSpec {
                triple,
                cpu: "x86-64",
                default_features: "",
                data_layout: "e-m:o-p:64:64-i64:64-f80:128-n8:16:32:64-S128",
                abi: "darwin",
            },
            Triple::AppleiOSSimulator => TargetSpec {
                triple,
                cpu: "x86-64",
                default_features: "",
                data_layout: "e-m:o-p:64:64-i64:64-f80:128-n8:16:32:64-S128",
                abi: "darwin_simulator",
            },
            Triple::WindowsGNU => TargetSpec {
                triple,
                cpu: "x86-64",
                default_features: "+sse4.2,+popcnt",
                data_layout: "e-m:w-p:64:64-f64:64:64-v128:128:128-a:0:64",
                abi: "gnu",
            },
            Triple::WindowsMSVC => TargetSpec {
                triple,
                cpu: "x86-64",
                default_features: "+sse4.2,+popcnt",
                data_layout: "e-m:w-p:64:64-f64:64:64-v128:128:128-a:0:64",
                abi: "msvc",
            },
        }
    }
}

/// TargetMachine を構成するためのビルダー。
#[derive(Clone, Debug)]
pub struct TargetMachineBuilder {
    triple: Triple,
    cpu: String,
    features: String,
    reloc_model: RelocModel,
    code_model: CodeModel,
    opt_level: OptimizationLevel,
    data_layout: DataLayoutSpec,
    backend_abi: String,
}

impl Default for TargetMachineBuilder {
    fn default() -> Self {
        let spec = TargetSpec::for_triple(Triple::LinuxGNU);
        Self {
            triple: spec.triple,
            cpu: spec.cpu.into(),
            features: spec.default_features.into(),
            reloc_model: RelocModel::Default,
            code_model: CodeModel::Default,
            opt_level: OptimizationLevel::O2,
            data_layout: DataLayoutSpec::new(spec.data_layout),
            backend_abi: spec.abi.into(),
        }
    }
}

impl TargetMachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triple から該当ターゲットの既定値一式を反映する。
    pub fn with_triple(mut self, triple: Triple) -> Self {
        let spec = TargetSpec::for_triple(triple);
        self.triple = spec.triple;
        self.cpu = spec.cpu.into();
        self.features = spec.default_features.into();
        self.data_layout = DataLayoutSpec::new(spec.data_layout);
        self.backend_abi = spec.abi.into();
        self
    }

    pub fn with_cpu(mut self, cpu: impl Into<String>) -> Self {
        self.cpu = cpu.into();
        self
    }

    pub fn with_features(mut self, features: impl Into<String>) -> Self {
        self.features = features.into();
        self
    }

    pub fn with_relocation_model(mut self, model: RelocModel) -> Self {
        self.reloc_model = model;
        self
    }

    pub fn with_code_model(mut self, model: CodeModel) -> Self {
        self.code_model = model;
        self
    }

    pub fn with_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_data_layout(mut self, layout: DataLayoutSpec) -> Self {
        self.data_layout = layout;
        self
    }

    pub fn build(self) -> TargetMachine {
        TargetMachine {
            triple: self.triple,
            cpu: self.cpu,
            features: self.features,
            reloc_model: self.reloc_model,
            code_model: self.code_model,
            opt_level: self.opt_level,
            data_layout: self.data_layout,
            backend_abi: self.backend_abi,
        }
    }
}

/// 実際の TargetMachine 設定を保持する構造。セッション構築後は読み取り専用。
#[derive(Clone, Debug)]
pub struct TargetMachine {
    pub triple: Triple,
    pub cpu: String,
    pub features: String,
    pub reloc_model: RelocModel,
    pub code_model: CodeModel,
    pub opt_level: OptimizationLevel,
    pub data_layout: DataLayoutSpec,
    backend_abi: String,
}

impl TargetMachine {
    pub fn backend_abi(&self) -> &str {
        &self.backend_abi
    }

    pub fn describe(&self) -> String {
        format!(
            "Triple={} ABI={} CPU={} features={} layout={}",
            self.triple, self.backend_abi, self.cpu, self.features, self.data_layout.description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{DataLayoutSpec, TargetMachineBuilder, Triple};

    #[test]
    fn pointer_spec_parses_64bit_layout() {
        let spec = DataLayoutSpec::system_v().pointer_spec().unwrap();
        assert_eq!(spec.size, 8);
        assert_eq!(spec.align, 8);
    }

    #[test]
    fn pointer_spec_parses_32bit_layout() {
        let layout = DataLayoutSpec::new("e-m:e-p:32:32-f64:64:64-a:0:32");
        let spec = layout.pointer_spec().unwrap();
        assert_eq!(spec.size, 4);
        assert_eq!(spec.align, 4);
    }

    #[test]
    fn pointer_spec_defaults_without_pointer_chunk() {
        let layout = DataLayoutSpec::new("e-m:e-f64:64:64");
        let spec = layout.pointer_spec().unwrap();
        assert_eq!(spec.size, 8);
    }

    #[test]
    fn pointer_spec_rejects_non_byte_width() {
        let layout = DataLayoutSpec::new("e-p:33:32");
        assert!(layout.pointer_spec().is_err());
    }

    #[test]
    fn builder_applies_triple_defaults() {
        let machine = TargetMachineBuilder::new()
            .with_triple(Triple::AppleDarwin)
            .build();
        assert_eq!(machine.backend_abi(), "darwin");
        assert!(machine.data_layout.description.contains("m:o"));
    }
}
