use std::fmt::Display;

use ash::vk;
use prism_gfx::GfxError;

use crate::{binding_allocator::DecorationKind, spirv::SpirvError, stage::ShaderStageType};

/// 编译、链接、接口映射以及反射阶段的失败，都是致命的：程序不可用，只能用修正后的源码重新创建
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("shader compiler is not available")]
    CompilerUnavailable,

    #[error("Error parsing {stage} shader:\n\n{log}")]
    Parse { stage: ShaderStageType, log: String },

    #[error("link failed: {0}")]
    Link(String),

    #[error("interface mapping failed: {0}")]
    InterfaceMapping(String),

    #[error("invalid SPIR-V in {stage} shader: {source}")]
    InvalidSpirv {
        stage: ShaderStageType,
        #[source]
        source: SpirvError,
    },

    /// 反射信息和 SPIR-V 二进制不一致
    #[error("could not get binary offset for {name} {kind}")]
    BindingOffsetNotFound { name: String, kind: DecorationKind },

    #[error("unimplemented: {0}")]
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error(transparent)]
    Gfx(#[from] GfxError),

    #[error("no free range of {count} {kind} slots below {limit}")]
    SlotsExhausted { kind: DecorationKind, count: u32, limit: u32 },

    #[error("failed to allocate descriptor set: {0}")]
    DescriptorSet(vk::Result),
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("uniform variable {name} is not set.")]
    UnsetResource { name: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
impl From<GfxError> for ShaderError {
    fn from(e: GfxError) -> Self {
        Self::Allocation(AllocationError::Gfx(e))
    }
}

/// 绑定资源时单个元素的校验失败：只跳过这个元素，不影响同一次调用中的其他元素
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingValidationError {
    TextureTypeMismatch { uniform: String, expected: &'static str, actual: &'static str },
    DataBaseTypeMismatch { uniform: String },
    DepthSamplerMismatch { uniform: String, expected: bool },
    NotReadable { uniform: String, resource: String },
    NotStorage { uniform: String, resource: String },
    MissingUsage { uniform: String, resource: String, usage: vk::BufferUsageFlags },
    MissingTexelView { uniform: String, resource: String },
}
impl Display for BindingValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TextureTypeMismatch { uniform, expected, actual } => {
                write!(f, "texture type mismatch for '{uniform}': expected {expected}, got {actual}")
            }
            Self::DataBaseTypeMismatch { uniform } => {
                write!(f, "texture data type mismatch for '{uniform}'")
            }
            Self::DepthSamplerMismatch { uniform, expected } => {
                if *expected {
                    write!(f, "depth comparison sampler required for '{uniform}'")
                } else {
                    write!(f, "depth comparison sampler not allowed for '{uniform}'")
                }
            }
            Self::NotReadable { uniform, resource } => {
                write!(f, "'{resource}' is not readable and cannot be sent to '{uniform}'")
            }
            Self::NotStorage { uniform, resource } => {
                write!(f, "'{resource}' was not created with storage support and cannot be sent to '{uniform}'")
            }
            Self::MissingUsage { uniform, resource, usage } => {
                write!(f, "'{resource}' lacks {usage:?} usage required by '{uniform}'")
            }
            Self::MissingTexelView { uniform, resource } => {
                write!(f, "'{resource}' has no texel view and cannot be sent to '{uniform}'")
            }
        }
    }
}
