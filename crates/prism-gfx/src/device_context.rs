use std::rc::Rc;

use ash::vk;

use crate::{
    builtin_data::BuiltinUniformData,
    cleanup::GpuObject,
    error::GfxError,
    pipeline_config::GraphicsPipelineConfiguration,
    resource::{DataBaseType, ShaderBuffer, ShaderTexture, TextureType},
};

/// local uniform 数据被映射到 GPU 可见内存之后的位置
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LocalUniformMapping {
    pub buffer: vk::Buffer,
    /// 作为 dynamic offset 传给 `vkCmdBindDescriptorSets`
    pub offset: u32,
    /// descriptor 中记录的 range，即 local uniform block 的大小
    pub range: vk::DeviceSize,
}

/// 管线中的一个 shader stage，入口函数统一为 `main`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShaderStageModule {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
}
impl ShaderStageModule {
    pub const ENTRY_POINT: &'static std::ffi::CStr = c"main";
}

/// shader 程序对设备的全部需求
///
/// 所有方法都只在渲染线程上调用，因此使用 `&self`，实现方自行使用内部可变性。
pub trait DeviceContext {
    fn create_shader_module(&self, code: &[u32], debug_name: Option<&str>) -> Result<vk::ShaderModule, GfxError>;

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        debug_name: Option<&str>,
    ) -> Result<vk::DescriptorSetLayout, GfxError>;

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        debug_name: Option<&str>,
    ) -> Result<vk::PipelineLayout, GfxError>;

    fn create_compute_pipeline(
        &self,
        stage: &ShaderStageModule,
        layout: vk::PipelineLayout,
        debug_name: Option<&str>,
    ) -> Result<vk::Pipeline, GfxError>;

    fn create_graphics_pipeline(
        &self,
        stages: &[ShaderStageModule],
        layout: vk::PipelineLayout,
        config: &GraphicsPipelineConfiguration,
        debug_name: Option<&str>,
    ) -> Result<vk::Pipeline, GfxError>;

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, GfxError>;

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), GfxError>;

    /// 返回原始的 `vk::Result`，调用方需要区分 `ERROR_OUT_OF_POOL_MEMORY`
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result>;

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );

    /// 把 local uniform 数据拷贝到当前帧的 uniform 流缓冲中
    fn map_local_uniform_data(&self, data: &[u8]) -> Result<LocalUniformMapping, GfxError>;

    /// 当前 draw 的内置 uniform 数据
    fn builtin_uniform_data(&self) -> BuiltinUniformData;

    /// 传入空纹理时使用的默认纹理
    fn default_texture(
        &self,
        texture_type: TextureType,
        data_base_type: DataBaseType,
        is_depth_sampler: bool,
    ) -> Option<Rc<dyn ShaderTexture>>;

    fn default_storage_buffer(&self) -> Option<Rc<dyn ShaderBuffer>>;

    fn default_texel_buffer(&self, data_base_type: DataBaseType) -> Option<Rc<dyn ShaderBuffer>>;

    /// 延迟销毁：等到当前所有 in-flight 帧完成之后再销毁
    fn queue_cleanup(&self, objects: Vec<GpuObject>);

    fn debug_names_enabled(&self) -> bool;
}
