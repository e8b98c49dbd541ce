use std::fmt::Display;

use ash::vk;

use crate::spirv::ExecutionModel;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStageType {
    Vertex,
    Pixel,
    Compute,
}
impl Display for ShaderStageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
impl ShaderStageType {
    pub const ALL: [Self; 3] = [Self::Vertex, Self::Pixel, Self::Compute];

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Pixel => "pixel",
            Self::Compute => "compute",
        }
    }

    #[inline]
    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Pixel => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    #[inline]
    pub fn mask(self) -> ShaderStageMask {
        match self {
            Self::Vertex => ShaderStageMask::VERTEX,
            Self::Pixel => ShaderStageMask::PIXEL,
            Self::Compute => ShaderStageMask::COMPUTE,
        }
    }

    #[inline]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Pixel => "frag",
            Self::Compute => "comp",
        }
    }

    /// 根据文件扩展名判断 stage：`.vert` / `.frag` / `.comp`
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Pixel),
            "comp" => Some(Self::Compute),
            _ => None,
        }
    }

    /// SPIR-V 中对应的 ExecutionModel
    #[inline]
    pub(crate) fn execution_model(self) -> ExecutionModel {
        match self {
            Self::Vertex => ExecutionModel::Vertex,
            Self::Pixel => ExecutionModel::Fragment,
            Self::Compute => ExecutionModel::GLCompute,
        }
    }

    #[inline]
    pub(crate) fn shaderc_kind(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::Pixel => shaderc::ShaderKind::Fragment,
            Self::Compute => shaderc::ShaderKind::Compute,
        }
    }
}

bitflags::bitflags! {
    /// 一个资源被哪些 stage 使用
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStageMask: u8 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}
impl ShaderStageMask {
    pub fn vk_stage_flags(self) -> vk::ShaderStageFlags {
        ShaderStageType::ALL
            .iter()
            .filter(|stage| self.contains(stage.mask()))
            .fold(vk::ShaderStageFlags::empty(), |flags, stage| flags | stage.vk_stage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mask_to_vk() {
        let mask = ShaderStageMask::VERTEX | ShaderStageMask::PIXEL;
        assert_eq!(mask.vk_stage_flags(), vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ShaderStageMask::empty().vk_stage_flags(), vk::ShaderStageFlags::empty());
    }

    #[test]
    fn test_stage_from_extension() {
        assert_eq!(ShaderStageType::from_extension("frag"), Some(ShaderStageType::Pixel));
        assert_eq!(ShaderStageType::from_extension("glsl"), None);
    }
}
