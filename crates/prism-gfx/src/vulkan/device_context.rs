use std::{
    cell::{Cell, RefCell},
    ffi::CString,
    rc::Rc,
};

use ash::vk;

use crate::{
    builtin_data::BuiltinUniformData,
    cleanup::{CleanupQueue, GpuObject},
    debug::{DebugType, debug_object_name},
    device_context::{DeviceContext, LocalUniformMapping, ShaderStageModule},
    error::GfxError,
    frame_counter::FrameCounter,
    pipeline_config::GraphicsPipelineConfiguration,
    resource::{DataBaseType, ShaderBuffer, ShaderTexture, TextureType},
    vulkan::{pipeline, stream_buffer::UniformStreamBuffer},
};

pub struct AshDeviceContextCreateInfo {
    /// 每个 in-flight 帧的 uniform 流缓冲初始大小，写满之后会翻倍重建
    pub uniform_stream_size: vk::DeviceSize,
    /// 需要 instance 开启 `VK_EXT_debug_utils`
    pub enable_debug_names: bool,
}
impl Default for AshDeviceContextCreateInfo {
    fn default() -> Self {
        Self {
            uniform_stream_size: 64 * 1024,
            enable_debug_names: cfg!(debug_assertions),
        }
    }
}

/// 传入空资源时使用的默认资源，由上层在创建设备时提供
#[derive(Default)]
pub struct DefaultResources {
    pub textures: Vec<Rc<dyn ShaderTexture>>,
    pub storage_buffer: Option<Rc<dyn ShaderBuffer>>,
    pub texel_buffers: Vec<Rc<dyn ShaderBuffer>>,
}

/// 基于 ash 的设备上下文
///
/// 持有 uniform 流缓冲和延迟销毁队列，由渲染循环在每帧开始时调用 [`Self::begin_frame`]。
pub struct AshDeviceContext {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    allocator: vk_mem::Allocator,

    min_uniform_alignment: vk::DeviceSize,

    frame_counter: RefCell<FrameCounter>,
    /// 每个 in-flight 帧一个
    uniform_streams: RefCell<Vec<UniformStreamBuffer>>,
    retired_streams: RefCell<CleanupQueue<UniformStreamBuffer>>,
    pending_destroy: RefCell<CleanupQueue<GpuObject>>,

    builtin_data: Cell<BuiltinUniformData>,
    default_resources: DefaultResources,

    #[cfg(debug_assertions)]
    destroyed: Cell<bool>,
}
// new & init
impl AshDeviceContext {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        device: ash::Device,
        create_info: &AshDeviceContextCreateInfo,
        default_resources: DefaultResources,
    ) -> Result<Self, GfxError> {
        let _span = tracy_client::span!("AshDeviceContext::new");

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, &device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci).map_err(GfxError::vulkan("vmaCreateAllocator"))? };

        let limits = unsafe { instance.get_physical_device_properties(pdevice).limits };
        let debug_utils =
            create_info.enable_debug_names.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        let uniform_streams = FrameCounter::frame_labels()
            .iter()
            .map(|_| UniformStreamBuffer::new(&allocator, create_info.uniform_stream_size))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "device context created: uniform stream {} bytes x {}, ubo alignment {}",
            create_info.uniform_stream_size,
            FrameCounter::fif_count(),
            limits.min_uniform_buffer_offset_alignment
        );

        Ok(Self {
            device,
            debug_utils,
            allocator,
            min_uniform_alignment: limits.min_uniform_buffer_offset_alignment,
            frame_counter: RefCell::new(FrameCounter::default()),
            uniform_streams: RefCell::new(uniform_streams),
            retired_streams: RefCell::new(CleanupQueue::new()),
            pending_destroy: RefCell::new(CleanupQueue::new()),
            builtin_data: Cell::new(BuiltinUniformData::default()),
            default_resources,

            #[cfg(debug_assertions)]
            destroyed: Cell::new(false),
        })
    }

    /// 需要在 device idle 之后调用
    pub fn destroy(&self) {
        log::info!("destroying device context");

        #[cfg(debug_assertions)]
        self.destroyed.set(true);

        self.pending_destroy.borrow_mut().flush(|object| self.destroy_object(object));
        self.retired_streams.borrow_mut().flush(|stream| stream.destroy(&self.allocator));
        self.uniform_streams.borrow_mut().drain(..).for_each(|stream| stream.destroy(&self.allocator));
    }
}
impl Drop for AshDeviceContext {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed.get(), "AshDeviceContext must be destroyed before being dropped.");
    }
}
// update
impl AshDeviceContext {
    /// 进入下一帧：释放已经过期的 GPU 对象，重置这一帧的 uniform 流缓冲
    ///
    /// 调用方需要保证这一帧上一轮提交的 command buffer 已经执行完毕。
    pub fn begin_frame(&self) {
        let _span = tracy_client::span!("AshDeviceContext::begin_frame");

        let mut frame_counter = self.frame_counter.borrow_mut();
        frame_counter.next_frame();
        let frame_id = frame_counter.frame_id();

        let destroyed = self.pending_destroy.borrow_mut().retire(frame_id, |object| self.destroy_object(object));
        if destroyed > 0 {
            log::debug!("{} destroyed {} gpu objects", frame_counter.frame_name(), destroyed);
        }
        self.retired_streams.borrow_mut().retire(frame_id, |stream| stream.destroy(&self.allocator));

        self.uniform_streams.borrow_mut()[*frame_counter.frame_label()].reset();
    }

    #[inline]
    pub fn set_builtin_uniform_data(&self, data: BuiltinUniformData) {
        self.builtin_data.set(data);
    }
}
// getters
impl AshDeviceContext {
    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.borrow().frame_id()
    }
}
// tools
impl AshDeviceContext {
    fn set_debug_name<T: DebugType>(&self, handle: &T, name: Option<&str>) {
        let (Some(debug_utils), Some(name)) = (&self.debug_utils, name) else {
            return;
        };
        let Ok(debug_name) = CString::new(debug_object_name::<T>(name)) else {
            log::warn!("debug name contains interior nul: {name}");
            return;
        };
        let result = unsafe {
            debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default()
                    .object_name(debug_name.as_c_str())
                    .object_handle(handle.vk_handle()),
            )
        };
        if let Err(e) = result {
            log::warn!("failed to set debug name {name}: {e}");
        }
    }

    fn destroy_object(&self, object: GpuObject) {
        unsafe {
            match object {
                GpuObject::ShaderModule(h) => self.device.destroy_shader_module(h, None),
                GpuObject::DescriptorSetLayout(h) => self.device.destroy_descriptor_set_layout(h, None),
                GpuObject::PipelineLayout(h) => self.device.destroy_pipeline_layout(h, None),
                GpuObject::Pipeline(h) => self.device.destroy_pipeline(h, None),
                GpuObject::DescriptorPool(h) => self.device.destroy_descriptor_pool(h, None),
            }
        }
    }
}
impl DeviceContext for AshDeviceContext {
    fn create_shader_module(&self, code: &[u32], debug_name: Option<&str>) -> Result<vk::ShaderModule, GfxError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe {
            self.device.create_shader_module(&create_info, None).map_err(GfxError::vulkan("vkCreateShaderModule"))?
        };
        self.set_debug_name(&module, debug_name);
        Ok(module)
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        debug_name: Option<&str>,
    ) -> Result<vk::DescriptorSetLayout, GfxError> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(GfxError::vulkan("vkCreateDescriptorSetLayout"))?
        };
        self.set_debug_name(&layout, debug_name);
        Ok(layout)
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        debug_name: Option<&str>,
    ) -> Result<vk::PipelineLayout, GfxError> {
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let layout = unsafe {
            self.device.create_pipeline_layout(&create_info, None).map_err(GfxError::vulkan("vkCreatePipelineLayout"))?
        };
        self.set_debug_name(&layout, debug_name);
        Ok(layout)
    }

    fn create_compute_pipeline(
        &self,
        stage: &ShaderStageModule,
        layout: vk::PipelineLayout,
        debug_name: Option<&str>,
    ) -> Result<vk::Pipeline, GfxError> {
        let _span = tracy_client::span!("AshDeviceContext::create_compute_pipeline");
        let pipeline = pipeline::create_compute_pipeline(&self.device, stage, layout)?;
        self.set_debug_name(&pipeline, debug_name);
        Ok(pipeline)
    }

    fn create_graphics_pipeline(
        &self,
        stages: &[ShaderStageModule],
        layout: vk::PipelineLayout,
        config: &GraphicsPipelineConfiguration,
        debug_name: Option<&str>,
    ) -> Result<vk::Pipeline, GfxError> {
        let _span = tracy_client::span!("AshDeviceContext::create_graphics_pipeline");
        let pipeline = pipeline::create_graphics_pipeline(&self.device, stages, layout, config)?;
        self.set_debug_name(&pipeline, debug_name);
        Ok(pipeline)
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, GfxError> {
        let create_info = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(pool_sizes);
        unsafe {
            self.device.create_descriptor_pool(&create_info, None).map_err(|result| GfxError::OutOfMemory {
                what: format!("descriptor pool ({max_sets} sets)"),
                result,
            })
        }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), GfxError> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(GfxError::vulkan("vkResetDescriptorPool"))
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        unsafe {
            self.device.update_descriptor_sets(writes, &[]);
        }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                bind_point,
                layout,
                0,
                std::slice::from_ref(&set),
                dynamic_offsets,
            );
        }
    }

    fn map_local_uniform_data(&self, data: &[u8]) -> Result<LocalUniformMapping, GfxError> {
        let frame_label = self.frame_counter.borrow().frame_label();
        let mut streams = self.uniform_streams.borrow_mut();
        let stream = &mut streams[*frame_label];

        let offset = match stream.write(&self.allocator, data, self.min_uniform_alignment)? {
            Some(offset) => offset,
            None => {
                // 写满了：换一个更大的，旧的等这一帧完成之后再销毁
                let new_size = (stream.size() * 2).max(data.len() as vk::DeviceSize * 2);
                log::info!("uniform stream buffer {frame_label} full, growing to {new_size} bytes");
                let old = std::mem::replace(stream, UniformStreamBuffer::new(&self.allocator, new_size)?);
                self.retired_streams.borrow_mut().push(self.frame_id(), old);

                stream.write(&self.allocator, data, self.min_uniform_alignment)?.ok_or_else(|| {
                    GfxError::InvalidArgument(format!("local uniform data too large: {} bytes", data.len()))
                })?
            }
        };

        Ok(LocalUniformMapping {
            buffer: stream.vk_buffer(),
            offset: offset as u32,
            range: data.len() as vk::DeviceSize,
        })
    }

    fn builtin_uniform_data(&self) -> BuiltinUniformData {
        self.builtin_data.get()
    }

    fn default_texture(
        &self,
        texture_type: TextureType,
        data_base_type: DataBaseType,
        is_depth_sampler: bool,
    ) -> Option<Rc<dyn ShaderTexture>> {
        let textures = &self.default_resources.textures;
        textures
            .iter()
            .find(|t| {
                t.texture_type() == texture_type
                    && t.data_base_type() == data_base_type
                    && t.is_depth_sampler() == is_depth_sampler
            })
            .or_else(|| textures.iter().find(|t| t.texture_type() == texture_type))
            .cloned()
    }

    fn default_storage_buffer(&self) -> Option<Rc<dyn ShaderBuffer>> {
        self.default_resources.storage_buffer.clone()
    }

    fn default_texel_buffer(&self, data_base_type: DataBaseType) -> Option<Rc<dyn ShaderBuffer>> {
        self.default_resources.texel_buffers.iter().find(|b| b.texel_data_base_type() == data_base_type).cloned()
    }

    fn queue_cleanup(&self, objects: Vec<GpuObject>) {
        self.pending_destroy.borrow_mut().extend(self.frame_id(), objects);
    }

    fn debug_names_enabled(&self) -> bool {
        self.debug_utils.is_some()
    }
}
