use ash::vk;

/// 可以被设置 debug name 的 Vulkan 对象
pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

macro_rules! impl_debug_type {
    ($ty:ty, $name:literal) => {
        impl DebugType for $ty {
            fn debug_type_name() -> &'static str {
                $name
            }

            fn vk_handle(&self) -> impl vk::Handle {
                *self
            }
        }
    };
}

impl_debug_type!(vk::ShaderModule, "ShaderModule");
impl_debug_type!(vk::DescriptorSetLayout, "DescriptorSetLayout");
impl_debug_type!(vk::PipelineLayout, "PipelineLayout");
impl_debug_type!(vk::Pipeline, "Pipeline");
impl_debug_type!(vk::DescriptorPool, "DescriptorPool");
impl_debug_type!(vk::Buffer, "Buffer");

/// debug name 的统一格式：`<类型>::<名字>`
#[inline]
pub fn debug_object_name<T: DebugType>(name: &str) -> String {
    format!("{}::{}", T::debug_type_name(), name)
}
