//! shader 程序对纹理和缓冲的访问契约
//!
//! 纹理和缓冲对象本身由上层持有，shader 程序只通过这两个 trait 读取它们的
//! Vulkan 句柄和形状信息，并通过 `Rc` 在绑定期间持有引用。

use ash::vk;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    Tex2D,
    Volume,
    Array2D,
    Cube,
}
impl TextureType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tex2D => "2d",
            Self::Volume => "volume",
            Self::Array2D => "array",
            Self::Cube => "cube",
        }
    }
}

/// 纹理/texel buffer 元素的基础数据类型，对应 shader 中的 `sampler2D` / `isampler2D` / `usampler2D`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DataBaseType {
    #[default]
    Float,
    Int,
    Uint,
}

pub trait ShaderTexture {
    fn texture_type(&self) -> TextureType;
    fn data_base_type(&self) -> DataBaseType;
    /// 是否带有 depth compare sampler（对应 `sampler2DShadow`）
    fn is_depth_sampler(&self) -> bool;
    fn is_readable(&self) -> bool;
    /// 是否可以作为 storage image 使用
    fn is_storage(&self) -> bool;

    fn image_view(&self) -> vk::ImageView;
    fn image_layout(&self) -> vk::ImageLayout;
    /// sampler 可能在纹理绑定之后被修改，因此每次绑定 descriptor set 之前都会重新读取
    fn sampler(&self) -> vk::Sampler;

    fn debug_name(&self) -> &str;
}

pub trait ShaderBuffer {
    fn buffer(&self) -> vk::Buffer;
    fn size(&self) -> vk::DeviceSize;
    fn usage(&self) -> vk::BufferUsageFlags;

    /// texel buffer 的 view，普通 buffer 为 None
    fn texel_view(&self) -> Option<vk::BufferView>;
    /// texel 元素的基础数据类型，只有 `texel_view` 存在时才有意义
    fn texel_data_base_type(&self) -> DataBaseType;

    fn debug_name(&self) -> &str;
}
