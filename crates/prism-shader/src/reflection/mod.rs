//! shader 资源接口：声明的 uniform 表，以及把 SPIR-V 反射结果匹配到这些表上的过程

mod builder;
mod infer;
mod interface;

pub use builder::{LocalBlockLayout, ReflectionBuilder, ReflectionOutput, VertexAttributeInfo};
pub use infer::infer_interface;
pub(crate) use infer::is_local_block;
pub use interface::{ProgramInterface, UniformId};

use ash::vk;
use prism_gfx::{DataBaseType, TextureType};

use crate::stage::ShaderStageMask;

/// 存放松散 uniform 的 block 名字
pub const LOCAL_UNIFORM_BLOCK: &str = "DefaultUniformBlock";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Matrix,
    Int,
    Uint,
    Bool,
    Sampler,
    StorageTexture,
    TexelBuffer,
    StorageBuffer,
}
impl UniformType {
    /// 数据存放在 local uniform block 中的类型
    #[inline]
    pub fn uses_local_data(self) -> bool {
        matches!(self, Self::Float | Self::Matrix | Self::Int | Self::Uint | Self::Bool)
    }

    #[inline]
    pub fn is_texture(self) -> bool {
        matches!(self, Self::Sampler | Self::StorageTexture)
    }

    #[inline]
    pub fn is_buffer(self) -> bool {
        matches!(self, Self::TexelBuffer | Self::StorageBuffer)
    }

    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Sampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageTexture => vk::DescriptorType::STORAGE_IMAGE,
            Self::TexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            _ => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        }
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// 一个具名资源的描述
///
/// 声明部分（名字、类型、数量等）由上层给出；反射部分（`location`、`active`、偏移等）在编译时填入。
#[derive(Clone, Debug, PartialEq)]
pub struct UniformInfo {
    pub name: String,
    pub base_type: UniformType,
    pub count: usize,
    /// 向量分量数；矩阵为行数
    pub components: usize,
    /// 矩阵的 (列数, 行数)
    pub matrix: Option<(usize, usize)>,
    pub data_base_type: DataBaseType,
    pub texture_type: Option<TextureType>,
    pub is_depth_sampler: bool,
    pub access: AccessFlags,

    /// 使用该资源的 stage
    pub stage_mask: ShaderStageMask,
    /// binding slot
    pub location: Option<u32>,
    /// SPIR-V 中真正被引用
    pub active: bool,
    /// local uniform 在 block 中占用的字节数
    pub data_size: usize,
    /// local uniform 在 staging buffer 中的偏移
    pub data_offset: Option<usize>,
    /// 在程序的纹理数组或 buffer 数组中的起始下标
    pub resource_index: Option<usize>,
    /// 在 descriptor table 对应数组中的起始下标
    pub binding_start_index: Option<usize>,
}
// new & init
impl UniformInfo {
    fn new(name: impl Into<String>, base_type: UniformType) -> Self {
        Self {
            name: name.into(),
            base_type,
            count: 1,
            components: 1,
            matrix: None,
            data_base_type: DataBaseType::Float,
            texture_type: None,
            is_depth_sampler: false,
            access: AccessFlags::READ,

            stage_mask: ShaderStageMask::empty(),
            location: None,
            active: false,
            data_size: 0,
            data_offset: None,
            resource_index: None,
            binding_start_index: None,
        }
    }

    /// float / int / uint / bool 的标量或向量
    pub fn scalar(name: impl Into<String>, base_type: UniformType, components: usize) -> Self {
        debug_assert!(matches!(
            base_type,
            UniformType::Float | UniformType::Int | UniformType::Uint | UniformType::Bool
        ));
        let data_base_type = match base_type {
            UniformType::Int => DataBaseType::Int,
            UniformType::Uint | UniformType::Bool => DataBaseType::Uint,
            _ => DataBaseType::Float,
        };
        Self {
            components,
            data_base_type,
            ..Self::new(name, base_type)
        }
    }

    pub fn matrix(name: impl Into<String>, columns: usize, rows: usize) -> Self {
        Self {
            components: rows,
            matrix: Some((columns, rows)),
            ..Self::new(name, UniformType::Matrix)
        }
    }

    pub fn sampler(name: impl Into<String>, texture_type: TextureType) -> Self {
        Self {
            texture_type: Some(texture_type),
            ..Self::new(name, UniformType::Sampler)
        }
    }

    pub fn storage_texture(name: impl Into<String>, texture_type: TextureType, access: AccessFlags) -> Self {
        Self {
            texture_type: Some(texture_type),
            access,
            ..Self::new(name, UniformType::StorageTexture)
        }
    }

    pub fn texel_buffer(name: impl Into<String>, data_base_type: DataBaseType) -> Self {
        Self {
            data_base_type,
            ..Self::new(name, UniformType::TexelBuffer)
        }
    }

    pub fn storage_buffer(name: impl Into<String>, access: AccessFlags) -> Self {
        Self {
            access,
            ..Self::new(name, UniformType::StorageBuffer)
        }
    }
}
// builder
impl UniformInfo {
    #[inline]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    #[inline]
    pub fn with_data_base_type(mut self, data_base_type: DataBaseType) -> Self {
        self.data_base_type = data_base_type;
        self
    }

    #[inline]
    pub fn with_depth_sampler(mut self) -> Self {
        self.is_depth_sampler = true;
        self
    }
}
// getters
impl UniformInfo {
    /// 单个数组元素占用的字节数
    #[inline]
    pub fn element_size(&self) -> usize {
        self.data_size / self.count.max(1)
    }

    /// 清空上一次编译留下的反射结果
    pub(crate) fn reset_reflection(&mut self) {
        self.stage_mask = ShaderStageMask::empty();
        self.location = None;
        self.active = false;
        self.data_size = 0;
        self.data_offset = None;
        self.binding_start_index = None;
    }
}

/// 按名字识别的内置 uniform
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinUniform {
    MainTexture,
    VideoY,
    VideoCb,
    VideoCr,
    /// 每次 draw 自动写入的 [`prism_gfx::BuiltinUniformData`]
    UniformsPerDraw,
}
impl BuiltinUniform {
    pub const COUNT: usize = 5;
    pub const ALL: [Self; Self::COUNT] = [Self::MainTexture, Self::VideoY, Self::VideoCb, Self::VideoCr, Self::UniformsPerDraw];

    pub fn name(self) -> &'static str {
        match self {
            Self::MainTexture => "MainTex",
            Self::VideoY => "VideoYChannel",
            Self::VideoCb => "VideoCbChannel",
            Self::VideoCr => "VideoCrChannel",
            Self::UniformsPerDraw => "BuiltinUniformsPerDraw",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// 按名字识别的内置顶点属性，location 固定
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinVertexAttribute {
    Position = 0,
    TexCoord = 1,
    Color = 2,
}
impl BuiltinVertexAttribute {
    /// 自定义顶点属性从这里开始编号
    pub const COUNT: u32 = 3;

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "VertexPosition" => Some(Self::Position),
            "VertexTexCoord" => Some(Self::TexCoord),
            "VertexColor" => Some(Self::Color),
            _ => None,
        }
    }
}

/// 去掉编译器加上的前后缀：`DefaultUniformBlock.` 前缀，以及单元素数组的 `[0]` 后缀
pub fn canonicalize_uniform_name(name: &str) -> &str {
    let name = name.strip_prefix(LOCAL_UNIFORM_BLOCK).and_then(|n| n.strip_prefix('.')).unwrap_or(name);
    name.strip_suffix("[0]").unwrap_or(name)
}
