use ash::vk;
use prism_gfx::{GfxError, GpuObject, GraphicsPipelineConfiguration};
use rustc_hash::FxHashMap;

/// 按 [`GraphicsPipelineConfiguration`] 的原始字节缓存 graphics pipeline
///
/// 条目在程序的整个生命周期内都不会被淘汰。
#[derive(Default)]
pub struct PipelineCache {
    pipelines: FxHashMap<GraphicsPipelineConfiguration, vk::Pipeline>,
}
// new & init
impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }
}
// getters
impl PipelineCache {
    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    #[inline]
    pub fn get(&self, config: &GraphicsPipelineConfiguration) -> Option<vk::Pipeline> {
        self.pipelines.get(config).copied()
    }
}
// update
impl PipelineCache {
    /// 命中时直接返回，否则调用 `create` 创建并插入
    pub fn get_or_create(
        &mut self,
        config: &GraphicsPipelineConfiguration,
        create: impl FnOnce(&GraphicsPipelineConfiguration) -> Result<vk::Pipeline, GfxError>,
    ) -> Result<vk::Pipeline, GfxError> {
        if let Some(&pipeline) = self.pipelines.get(config) {
            return Ok(pipeline);
        }

        let pipeline = create(config)?;
        self.pipelines.insert(*config, pipeline);
        log::debug!("graphics pipeline cache: {} entries", self.pipelines.len());
        Ok(pipeline)
    }

    /// 取出全部 pipeline 交给延迟销毁
    pub fn drain(&mut self) -> impl Iterator<Item = GpuObject> + '_ {
        self.pipelines.drain().map(|(_, pipeline)| GpuObject::Pipeline(pipeline))
    }
}
