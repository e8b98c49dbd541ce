//! shader 程序：编译结果、GPU 对象、资源绑定以及逐帧的 descriptor 状态

use std::{collections::BTreeMap, rc::Rc};

use ash::vk;
use itertools::Itertools;
use prism_gfx::{
    DeviceContext, GpuObject, GraphicsPipelineConfiguration, ShaderBuffer, ShaderStageModule, ShaderTexture,
};

use crate::{
    compiler::{CompileOptions, CompilePhase, CompiledProgram, ProgramCompiler, ShaderStageSource},
    descriptor_pool::FrameDescriptorPools,
    descriptor_table::{DescriptorTable, validate_buffer, validate_texture},
    error::ShaderError,
    local_uniforms::LocalUniformBuffer,
    pipeline_cache::PipelineCache,
    reflection::{AccessFlags, BuiltinUniform, ProgramInterface, UniformId, UniformInfo, UniformType, VertexAttributeInfo},
    render_context::{ProgramId, RenderContext},
    stage::ShaderStageType,
};

/// 编译并创建好全部 GPU 对象之后的状态，卸载时整体丢弃
struct LoadedProgram {
    interface: ProgramInterface,
    builtins: [Option<UniformId>; BuiltinUniform::COUNT],
    attributes: BTreeMap<String, VertexAttributeInfo>,
    local_uniforms: Option<LocalUniformBuffer>,

    modules: Vec<(ShaderStageType, vk::ShaderModule)>,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    compute_pipeline: Option<vk::Pipeline>,

    table: DescriptorTable,
    pools: FrameDescriptorPools,
    current_set: Option<vk::DescriptorSet>,
    pipelines: PipelineCache,

    /// 按 `UniformInfo::resource_index` 存放当前绑定的纹理和缓冲
    textures: Vec<Option<Rc<dyn ShaderTexture>>>,
    buffers: Vec<Option<Rc<dyn ShaderBuffer>>>,
}
impl LoadedProgram {
    fn into_gpu_objects(mut self) -> Vec<GpuObject> {
        let mut objects = self.pools.drain().collect_vec();
        objects.extend(self.modules.iter().map(|&(_, module)| GpuObject::ShaderModule(module)));
        objects.push(GpuObject::DescriptorSetLayout(self.set_layout));
        objects.push(GpuObject::PipelineLayout(self.pipeline_layout));
        objects.extend(self.compute_pipeline.map(GpuObject::Pipeline));
        objects.extend(self.pipelines.drain());
        objects
    }
}

fn same_resource<T: ?Sized>(a: &Option<Rc<T>>, b: &Option<Rc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// 句柄来自其他程序的 interface
fn foreign_uniform(id: UniformId) -> ShaderError {
    ShaderError::InvalidOperation(format!("{id:?} does not belong to this shader program"))
}

/// 保存下来、用于 reload 之后重新绑定的资源
#[derive(Default)]
struct RetainedBindings {
    textures: Vec<(String, Vec<Option<Rc<dyn ShaderTexture>>>)>,
    buffers: Vec<(String, Vec<Option<Rc<dyn ShaderBuffer>>>)>,
}

pub struct ShaderProgram {
    id: ProgramId,
    ctx: Rc<RenderContext>,
    device: Rc<dyn DeviceContext>,

    sources: Vec<ShaderStageSource>,
    declared: Option<ProgramInterface>,
    options: CompileOptions,
    is_compute: bool,

    phase: CompilePhase,
    loaded: Option<LoadedProgram>,
}
// new & init
impl ShaderProgram {
    /// 编译全部 stage 并创建 GPU 对象；任何一步失败都不会得到可用的程序
    ///
    /// `interface` 为 None 时从 SPIR-V 推导接口。
    pub fn new(
        ctx: &Rc<RenderContext>,
        sources: Vec<ShaderStageSource>,
        interface: Option<ProgramInterface>,
        options: CompileOptions,
    ) -> Result<Self, ShaderError> {
        let is_compute = sources.iter().any(|s| s.stage == ShaderStageType::Compute);
        let mut program = Self {
            id: ctx.allocate_program_id(),
            ctx: ctx.clone(),
            device: ctx.device().clone(),

            sources,
            declared: interface,
            options,
            is_compute,

            phase: CompilePhase::Uncompiled,
            loaded: None,
        };
        program.load()?;
        Ok(program)
    }

    fn load(&mut self) -> Result<(), ShaderError> {
        let mut compiler = ProgramCompiler::new(self.options.clone());
        let compiled = compiler
            .parse(&self.sources)
            .and_then(|_| compiler.link())
            .and_then(|_| compiler.reflect(self.declared.clone()));
        self.phase = compiler.phase();
        let compiled = compiled?;

        let mut created = vec![];
        match self.create_gpu_objects(compiled, &mut created) {
            Ok(loaded) => {
                self.loaded = Some(loaded);
                self.phase = CompilePhase::Ready;
                log::info!("shader program '{}' is ready", self.options.program_name);
                Ok(())
            }
            Err(e) => {
                self.device.queue_cleanup(created);
                self.phase = CompilePhase::Failed;
                log::error!("failed to create shader program '{}': {e}", self.options.program_name);
                Err(e)
            }
        }
    }

    fn debug_name(&self, what: impl std::fmt::Display) -> Option<String> {
        self.device.debug_names_enabled().then(|| format!("{what}: {}", self.options.program_name))
    }

    fn create_gpu_objects(
        &mut self,
        compiled: CompiledProgram,
        created: &mut Vec<GpuObject>,
    ) -> Result<LoadedProgram, ShaderError> {
        let CompiledProgram {
            stages,
            mut interface,
            local_uniforms,
            builtins,
            attributes,
        } = compiled;

        let mut modules = vec![];
        for stage in &stages {
            let name = self.debug_name(format_args!("{} shader", stage.stage));
            let module = self.device.create_shader_module(&stage.spirv, name.as_deref())?;
            created.push(GpuObject::ShaderModule(module));
            modules.push((stage.stage, module));
        }
        self.phase = CompilePhase::Compiled;

        let table = DescriptorTable::build(&mut interface, local_uniforms.as_ref(), self.is_compute);
        let set_layout =
            self.device.create_descriptor_set_layout(&table.layout_bindings(), self.debug_name("descriptor set layout").as_deref())?;
        created.push(GpuObject::DescriptorSetLayout(set_layout));
        let pipeline_layout =
            self.device.create_pipeline_layout(&[set_layout], self.debug_name("pipeline layout").as_deref())?;
        created.push(GpuObject::PipelineLayout(pipeline_layout));

        let compute_pipeline = match modules.first() {
            Some(&(ShaderStageType::Compute, module)) => {
                let stage = ShaderStageModule {
                    stage: vk::ShaderStageFlags::COMPUTE,
                    module,
                };
                let pipeline =
                    self.device.create_compute_pipeline(&stage, pipeline_layout, self.debug_name("compute pipeline").as_deref())?;
                created.push(GpuObject::Pipeline(pipeline));
                Some(pipeline)
            }
            _ => None,
        };

        let (texture_count, buffer_count) = interface.assign_resource_indices();
        let pools = FrameDescriptorPools::new(&table.pool_sizes());

        Ok(LoadedProgram {
            interface,
            builtins,
            attributes,
            local_uniforms,

            modules,
            set_layout,
            pipeline_layout,
            compute_pipeline,

            table,
            pools,
            current_set: None,
            pipelines: PipelineCache::new(),

            textures: vec![None; texture_count],
            buffers: vec![None; buffer_count],
        })
    }

    /// 把全部 GPU 对象交给延迟销毁，并释放绑定的资源
    pub fn unload(&mut self) {
        self.ctx.detach(self.id);
        if let Some(loaded) = self.loaded.take() {
            self.device.queue_cleanup(loaded.into_gpu_objects());
            log::info!("shader program '{}' unloaded", self.options.program_name);
        }
        self.phase = CompilePhase::Uncompiled;
    }

    /// 用保存的源码重新创建，之前绑定的纹理和缓冲会按名字重新绑定
    pub fn reload(&mut self) -> Result<(), ShaderError> {
        let retained = self.retain_bindings();
        self.unload();
        self.load()?;

        for (name, textures) in retained.textures {
            if let Some(id) = self.uniform(&name) {
                self.send_textures(id, &textures)?;
            }
        }
        for (name, buffers) in retained.buffers {
            if let Some(id) = self.uniform(&name) {
                self.send_buffers(id, &buffers)?;
            }
        }
        Ok(())
    }

    fn retain_bindings(&self) -> RetainedBindings {
        let Some(loaded) = &self.loaded else {
            return RetainedBindings::default();
        };

        let mut retained = RetainedBindings::default();
        for (_, info) in loaded.interface.active() {
            let Some(start) = info.resource_index else {
                continue;
            };
            let range = start..start + info.count;
            if info.base_type.is_texture() {
                retained.textures.push((info.name.clone(), loaded.textures[range].to_vec()));
            } else if info.base_type.is_buffer() {
                retained.buffers.push((info.name.clone(), loaded.buffers[range].to_vec()));
            }
        }
        retained
    }
}
impl Drop for ShaderProgram {
    fn drop(&mut self) {
        self.unload();
    }
}
// getters
impl ShaderProgram {
    #[inline]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.options.program_name
    }

    #[inline]
    pub fn phase(&self) -> CompilePhase {
        self.phase
    }

    #[inline]
    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    fn loaded(&self) -> Result<&LoadedProgram, ShaderError> {
        self.loaded
            .as_ref()
            .ok_or_else(|| ShaderError::InvalidOperation(format!("shader program '{}' is not loaded", self.name())))
    }

    fn loaded_mut(&mut self) -> Result<&mut LoadedProgram, ShaderError> {
        match self.loaded.as_mut() {
            Some(loaded) => Ok(loaded),
            None => Err(ShaderError::InvalidOperation(format!(
                "shader program '{}' is not loaded",
                self.options.program_name
            ))),
        }
    }

    /// 反射之后的资源接口
    pub fn interface(&self) -> Option<&ProgramInterface> {
        self.loaded.as_ref().map(|l| &l.interface)
    }

    pub fn uniform(&self, name: &str) -> Option<UniformId> {
        self.loaded.as_ref()?.interface.find(name)
    }

    pub fn uniform_info(&self, id: UniformId) -> Option<&UniformInfo> {
        self.loaded.as_ref()?.interface.try_get(id)
    }

    /// 程序使用到的内置 uniform
    pub fn builtin_uniform(&self, builtin: BuiltinUniform) -> Option<UniformId> {
        self.loaded.as_ref()?.builtins[builtin.index()]
    }

    /// 顶点属性的 location
    pub fn vertex_attribute_index(&self, name: &str) -> Option<u32> {
        Some(self.loaded.as_ref()?.attributes.get(name)?.index)
    }

    pub fn vertex_attributes(&self) -> Option<&BTreeMap<String, VertexAttributeInfo>> {
        self.loaded.as_ref().map(|l| &l.attributes)
    }

    /// 创建 pipeline 时使用的 stage 列表
    pub fn shader_stages(&self) -> Vec<ShaderStageModule> {
        self.loaded
            .iter()
            .flat_map(|l| l.modules.iter())
            .map(|&(stage, module)| ShaderStageModule {
                stage: stage.vk_stage(),
                module,
            })
            .collect()
    }

    pub fn graphics_pipeline_layout(&self) -> Result<vk::PipelineLayout, ShaderError> {
        if self.is_compute {
            return Err(ShaderError::InvalidOperation(format!(
                "shader program '{}' is a compute program and has no graphics pipeline layout",
                self.name()
            )));
        }
        Ok(self.loaded()?.pipeline_layout)
    }

    pub fn compute_pipeline(&self) -> Result<vk::Pipeline, ShaderError> {
        self.loaded()?.compute_pipeline.ok_or_else(|| {
            ShaderError::InvalidOperation(format!("shader program '{}' is not a compute program", self.name()))
        })
    }

    /// 上层写入 local uniform 的 staging 数据，写入之后调用 [`Self::update_uniform`] 生效
    pub fn uniform_data_mut(&mut self, id: UniformId) -> Option<&mut [u8]> {
        let loaded = self.loaded.as_mut()?;
        let info = loaded.interface.try_get(id)?;
        let offset = info.data_offset?;
        let size = info.data_size;
        Some(loaded.local_uniforms.as_mut()?.staging_range_mut(offset, size))
    }

    /// 下一次 draw 时交给设备的 local uniform 数据
    pub fn local_uniform_data(&self) -> Option<&[u8]> {
        Some(self.loaded.as_ref()?.local_uniforms.as_ref()?.live())
    }

    /// 当前绑定的纹理
    pub fn bound_texture(&self, id: UniformId, index: usize) -> Option<Rc<dyn ShaderTexture>> {
        let loaded = self.loaded.as_ref()?;
        let info = loaded.interface.try_get(id)?;
        if !info.base_type.is_texture() || index >= info.count {
            return None;
        }
        loaded.textures.get(info.resource_index? + index)?.clone()
    }

    pub fn is_descriptor_set_dirty(&self) -> bool {
        self.loaded.as_ref().is_some_and(|l| l.table.is_dirty())
    }
}
// update
impl ShaderProgram {
    /// 之后的 draw / dispatch 使用这个程序
    pub fn attach(&self) {
        if self.is_compute {
            self.ctx.attach_compute(self.id);
        } else {
            self.ctx.attach_graphics(self.id);
        }
    }

    /// 把 staging 中 `count` 个元素同步到 live
    pub fn update_uniform(&mut self, id: UniformId, count: usize) -> Result<(), ShaderError> {
        self.ctx.flush_if_active(self.id);

        let loaded = self.loaded_mut()?;
        let info = loaded.interface.try_get(id).ok_or_else(|| foreign_uniform(id))?;
        if !info.base_type.uses_local_data() {
            return Err(ShaderError::InvalidOperation(format!("uniform '{}' is not a local uniform", info.name)));
        }
        let (Some(offset), Some(local)) = (info.data_offset, loaded.local_uniforms.as_mut()) else {
            log::debug!("uniform '{}' is not used by the shader", info.name);
            return Ok(());
        };

        local.commit(offset, info.element_size() * count.min(info.count));
        Ok(())
    }

    /// 发送纹理；`None` 使用设备提供的默认纹理
    ///
    /// 数量会被截断到声明的数量。校验失败的元素只会被跳过，不影响其他元素。
    pub fn send_textures(&mut self, id: UniformId, textures: &[Option<Rc<dyn ShaderTexture>>]) -> Result<(), ShaderError> {
        let device = self.device.clone();
        self.ctx.flush_if_active(self.id);

        let loaded = self.loaded_mut()?;
        let LoadedProgram {
            interface,
            table,
            textures: bound,
            ..
        } = loaded;
        let info = interface.try_get(id).ok_or_else(|| foreign_uniform(id))?;
        if !info.base_type.is_texture() {
            return Err(ShaderError::InvalidOperation(format!("uniform '{}' is not a texture", info.name)));
        }
        let Some(start) = info.resource_index else {
            log::debug!("texture '{}' is not used by the shader", info.name);
            return Ok(());
        };

        for (i, texture) in textures.iter().take(info.count).enumerate() {
            if let Some(texture) = texture
                && let Err(e) = validate_texture(info, texture.as_ref())
            {
                log::warn!("{e}");
                continue;
            }

            let texture = texture.clone().or_else(|| {
                let texture_type = info.texture_type?;
                device.default_texture(texture_type, info.data_base_type, info.is_depth_sampler)
            });
            let slot = &mut bound[start + i];
            if same_resource(slot, &texture) {
                continue;
            }

            // 写入 null descriptor：可写的 slot 不能使用默认纹理
            let write_null = textures[i].is_none() && info.access.contains(AccessFlags::WRITE) && info.base_type == UniformType::StorageTexture;
            let descriptor = if write_null { None } else { texture.as_deref() };
            table.set_texture_descriptor(info, i, descriptor);
            *slot = texture;
        }
        Ok(())
    }

    /// 发送缓冲；`None` 使用设备提供的默认缓冲
    pub fn send_buffers(&mut self, id: UniformId, buffers: &[Option<Rc<dyn ShaderBuffer>>]) -> Result<(), ShaderError> {
        let device = self.device.clone();
        self.ctx.flush_if_active(self.id);

        let loaded = self.loaded_mut()?;
        let LoadedProgram {
            interface,
            table,
            buffers: bound,
            ..
        } = loaded;
        let info = interface.try_get(id).ok_or_else(|| foreign_uniform(id))?;
        if !info.base_type.is_buffer() {
            return Err(ShaderError::InvalidOperation(format!("uniform '{}' is not a buffer", info.name)));
        }
        let Some(start) = info.resource_index else {
            log::debug!("buffer '{}' is not used by the shader", info.name);
            return Ok(());
        };

        for (i, buffer) in buffers.iter().take(info.count).enumerate() {
            if let Some(buffer) = buffer
                && let Err(e) = validate_buffer(info, buffer.as_ref())
            {
                log::warn!("{e}");
                continue;
            }

            let buffer = buffer.clone().or_else(|| match info.base_type {
                UniformType::TexelBuffer => device.default_texel_buffer(info.data_base_type),
                _ => device.default_storage_buffer(),
            });
            let slot = &mut bound[start + i];
            if same_resource(slot, &buffer) {
                continue;
            }

            let write_null = buffers[i].is_none()
                && info.access.contains(AccessFlags::WRITE)
                && info.base_type == UniformType::StorageBuffer;
            let descriptor = if write_null { None } else { buffer.as_deref() };
            table.set_buffer_descriptor(info, i, descriptor);
            *slot = buffer;
        }
        Ok(())
    }

    /// 视频纹理的三个平面；程序没有使用的通道会被跳过
    pub fn set_video_textures(
        &mut self,
        y: Option<Rc<dyn ShaderTexture>>,
        cb: Option<Rc<dyn ShaderTexture>>,
        cr: Option<Rc<dyn ShaderTexture>>,
    ) -> Result<(), ShaderError> {
        let channels = [(BuiltinUniform::VideoY, y), (BuiltinUniform::VideoCb, cb), (BuiltinUniform::VideoCr, cr)];
        for (builtin, texture) in channels {
            if let Some(id) = self.builtin_uniform(builtin) {
                self.send_textures(id, &[texture])?;
            }
        }
        Ok(())
    }

    pub fn set_main_tex(&mut self, texture: Option<Rc<dyn ShaderTexture>>) -> Result<(), ShaderError> {
        match self.builtin_uniform(BuiltinUniform::MainTexture) {
            Some(id) => self.send_textures(id, &[texture]),
            None => Ok(()),
        }
    }

    /// 帧开始：切换到下一帧的 descriptor pool，下一次绑定时重新分配 descriptor set
    pub fn new_frame(&mut self) -> Result<(), ShaderError> {
        let device = self.device.clone();
        let loaded = self.loaded_mut()?;
        loaded.current_set = None;
        loaded.table.mark_dirty();
        loaded.pools.new_frame(device.as_ref())
    }

    /// draw / dispatch 之前绑定 descriptor set
    ///
    /// 写入内置 uniform、映射 local uniform、刷新 sampler；descriptor set 变脏时重新分配并写入。
    pub fn cmd_push_descriptor_sets(
        &mut self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
    ) -> Result<(), ShaderError> {
        let device = self.device.clone();
        let loaded = self.loaded_mut()?;
        if !loaded.table.has_bindings() {
            return Ok(());
        }

        let mut dynamic_offsets = vec![];
        if let Some(local) = &mut loaded.local_uniforms {
            local.write_builtin_data(&device.builtin_uniform_data());
            let mapping = device.map_local_uniform_data(local.live())?;
            loaded.table.set_local_uniform_buffer(mapping.buffer, mapping.range);
            dynamic_offsets.push(mapping.offset);
        }

        for id in loaded.interface.sampled_textures() {
            let info = loaded.interface.get(id);
            let Some(start) = info.resource_index else {
                continue;
            };
            for i in 0..info.count {
                let Some(texture) = &loaded.textures[start + i] else {
                    return Err(ShaderError::UnsetResource { name: info.name.clone() });
                };
                loaded.table.refresh_sampler(info, i, texture.sampler());
            }
        }

        let set = match loaded.current_set {
            Some(set) if !loaded.table.is_dirty() => set,
            _ => {
                let set = loaded.pools.allocate(device.as_ref(), loaded.set_layout)?;
                device.update_descriptor_sets(&loaded.table.vk_writes(set));
                loaded.table.clear_dirty();
                loaded.current_set = Some(set);
                set
            }
        };

        device.cmd_bind_descriptor_sets(command_buffer, bind_point, loaded.pipeline_layout, set, &dynamic_offsets);
        Ok(())
    }

    /// 按配置查找或创建 graphics pipeline
    pub fn cached_graphics_pipeline(&mut self, config: &GraphicsPipelineConfiguration) -> Result<vk::Pipeline, ShaderError> {
        if self.is_compute {
            return Err(ShaderError::InvalidOperation(format!(
                "shader program '{}' is a compute program and has no graphics pipelines",
                self.name()
            )));
        }

        let device = self.device.clone();
        let stages = self.shader_stages();
        let debug_name = self.debug_name("graphics pipeline");
        let loaded = self.loaded_mut()?;
        let layout = loaded.pipeline_layout;
        let pipeline = loaded
            .pipelines
            .get_or_create(config, |config| device.create_graphics_pipeline(&stages, layout, config, debug_name.as_deref()))?;
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use ash::vk::Handle;
    use prism_gfx::TextureType;

    use super::*;
    use crate::test_utils::{
        MockBuffer, MockTexture, RecordingDevice, palette_sources, particle_sources, sprite_sources, video_sources,
    };

    fn setup() -> (Rc<RecordingDevice>, Rc<RenderContext>) {
        let device = Rc::new(RecordingDevice::new());
        let ctx = Rc::new(RenderContext::new(device.clone()));
        (device, ctx)
    }

    fn sprite(ctx: &Rc<RenderContext>) -> ShaderProgram {
        ShaderProgram::new(ctx, sprite_sources(), None, CompileOptions::default().with_name("sprite")).unwrap()
    }

    fn push(program: &mut ShaderProgram) -> Result<(), ShaderError> {
        program.cmd_push_descriptor_sets(vk::CommandBuffer::null(), vk::PipelineBindPoint::GRAPHICS)
    }

    fn push_compute(program: &mut ShaderProgram) -> Result<(), ShaderError> {
        program.cmd_push_descriptor_sets(vk::CommandBuffer::null(), vk::PipelineBindPoint::COMPUTE)
    }

    #[test]
    fn test_main_tex_single_update() {
        let (device, ctx) = setup();
        let mut program = sprite(&ctx);
        assert_eq!(program.phase(), CompilePhase::Ready);

        let main_tex = program.builtin_uniform(BuiltinUniform::MainTexture).unwrap();
        assert!(program.uniform_info(main_tex).unwrap().active);

        // 还没有绑定纹理
        let err = push(&mut program).unwrap_err();
        assert_eq!(err.to_string(), "uniform variable MainTex is not set.");
        assert_eq!(device.update_calls.get(), 0);

        let texture = MockTexture::tex_2d(100);
        program.set_main_tex(Some(texture.clone())).unwrap();
        push(&mut program).unwrap();
        assert_eq!(device.update_calls.get(), 1);

        program.set_main_tex(Some(texture.clone())).unwrap();
        assert!(!program.is_descriptor_set_dirty());
        push(&mut program).unwrap();
        assert_eq!(device.update_calls.get(), 1);
        assert_eq!(device.binds.borrow().len(), 2);

        // 写入的 image info 指向这个纹理
        let writes = device.writes.borrow();
        let image_write = writes.iter().find(|w| w.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER).unwrap();
        assert_eq!(image_write.images[0].image_view, texture.image_view());
        assert_eq!(image_write.images[0].sampler, texture.sampler());
    }

    #[test]
    fn test_local_uniforms_bind_with_dynamic_offset() {
        let (device, ctx) = setup();
        let mut program = sprite(&ctx);
        program.set_main_tex(Some(MockTexture::tex_2d(100))).unwrap();

        push(&mut program).unwrap();
        push(&mut program).unwrap();
        let binds = device.binds.borrow();
        assert_eq!(binds[0].dynamic_offsets, vec![0]);
        assert_eq!(binds[1].dynamic_offsets, vec![256]);
        assert_eq!(binds[0].set, binds[1].set);

        // 内置数据写在 block 的开头
        let mapped = device.mapped.borrow();
        let builtin = device.builtin_data.get();
        assert_eq!(&mapped[0][..prism_gfx::BuiltinUniformData::SIZE], builtin.as_bytes());

        let writes = device.writes.borrow();
        let ubo = writes.iter().find(|w| w.descriptor_type == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC).unwrap();
        assert_eq!(ubo.buffers[0].buffer, device.uniform_buffer.get());
        assert_eq!(ubo.buffers[0].range, 288);
    }

    #[test]
    fn test_uniform_round_trip() {
        let (device, ctx) = setup();
        let mut program = sprite(&ctx);
        let tint = program.uniform("tint").unwrap();
        let offset = program.uniform_info(tint).unwrap().data_offset.unwrap();

        let value = [0.1f32, 0.2, 0.3, 0.4];
        program.uniform_data_mut(tint).unwrap().copy_from_slice(bytemuck::cast_slice(&value));
        assert_ne!(&program.local_uniform_data().unwrap()[offset..offset + 16], bytemuck::cast_slice::<f32, u8>(&value));

        program.update_uniform(tint, 1).unwrap();
        assert_eq!(&program.local_uniform_data().unwrap()[offset..offset + 16], bytemuck::cast_slice::<f32, u8>(&value));

        program.set_main_tex(Some(MockTexture::tex_2d(100))).unwrap();
        push(&mut program).unwrap();
        assert_eq!(&device.mapped.borrow()[0][offset..offset + 16], bytemuck::cast_slice::<f32, u8>(&value));

        // 纹理不是 local uniform
        let main_tex = program.uniform("MainTex").unwrap();
        assert!(matches!(program.update_uniform(main_tex, 1), Err(ShaderError::InvalidOperation(_))));
    }

    #[test]
    fn test_new_frame_allocates_fresh_set() {
        let (device, ctx) = setup();
        let mut program = sprite(&ctx);
        program.set_main_tex(Some(MockTexture::tex_2d(100))).unwrap();

        push(&mut program).unwrap();
        program.new_frame().unwrap();
        push(&mut program).unwrap();

        let sets = device.allocated_sets.borrow();
        assert_eq!(sets.len(), 2);
        assert_ne!(sets[0], sets[1]);
        assert_eq!(device.update_calls.get(), 2);
    }

    #[test]
    fn test_exhausted_pool_creates_another() {
        let (device, ctx) = setup();
        device.pool_capacity.set(1);
        let mut program = sprite(&ctx);

        program.set_main_tex(Some(MockTexture::tex_2d(100))).unwrap();
        push(&mut program).unwrap();
        program.set_main_tex(Some(MockTexture::tex_2d(200))).unwrap();
        assert!(program.is_descriptor_set_dirty());
        push(&mut program).unwrap();

        assert_eq!(device.pools.borrow().len(), 2);
        assert_eq!(device.allocated_sets.borrow().len(), 2);
    }

    #[test]
    fn test_invalid_texture_is_skipped() {
        let (_device, ctx) = setup();
        let mut program = sprite(&ctx);
        let main_tex = program.uniform("MainTex").unwrap();

        let cube: Rc<dyn ShaderTexture> = Rc::new(MockTexture::new(100, TextureType::Cube));
        program.send_textures(main_tex, &[Some(cube)]).unwrap();
        assert!(program.bound_texture(main_tex, 0).is_none());

        // 多出来的元素被截断
        let texture = MockTexture::tex_2d(200);
        program.send_textures(main_tex, &[Some(texture.clone()), Some(MockTexture::tex_2d(300))]).unwrap();
        assert!(Rc::ptr_eq(&program.bound_texture(main_tex, 0).unwrap(), &texture));

        // 空纹理使用默认纹理
        program.send_textures(main_tex, &[None]).unwrap();
        assert_eq!(program.bound_texture(main_tex, 0).unwrap().debug_name(), "default-2d");

        assert!(matches!(
            program.send_buffers(main_tex, &[Some(MockBuffer::storage(1, 16))]),
            Err(ShaderError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_references_released_on_rebind() {
        let (_device, ctx) = setup();
        let mut program = sprite(&ctx);
        let first = MockTexture::tex_2d(100);
        let second = MockTexture::tex_2d(200);

        program.set_main_tex(Some(first.clone())).unwrap();
        assert_eq!(Rc::strong_count(&first), 2);
        program.set_main_tex(Some(second.clone())).unwrap();
        assert_eq!(Rc::strong_count(&first), 1);
        assert_eq!(Rc::strong_count(&second), 2);

        drop(program);
        assert_eq!(Rc::strong_count(&second), 1);
    }

    #[test]
    fn test_compute_program() {
        let (device, ctx) = setup();
        let mut program = ShaderProgram::new(&ctx, particle_sources(), None, CompileOptions::default()).unwrap();

        assert!(program.is_compute());
        assert_eq!(program.shader_stages().len(), 1);
        assert!(program.compute_pipeline().is_ok());
        assert_eq!(device.compute_pipelines.borrow().len(), 1);
        assert!(matches!(program.graphics_pipeline_layout(), Err(ShaderError::InvalidOperation(_))));
        assert!(matches!(
            program.cached_graphics_pipeline(&GraphicsPipelineConfiguration::default()),
            Err(ShaderError::InvalidOperation(_))
        ));

        // 可写的 storage buffer 传入空值：保留默认缓冲，但写入 null descriptor
        let particles = program.uniform("Particles").unwrap();
        program.send_buffers(particles, &[None]).unwrap();
        push_compute(&mut program).unwrap();
        {
            let writes = device.writes.borrow();
            let ssbo = writes.iter().find(|w| w.descriptor_type == vk::DescriptorType::STORAGE_BUFFER).unwrap();
            assert_eq!(ssbo.buffers[0].buffer, vk::Buffer::null());
        }

        let buffer = MockBuffer::storage(500, 1024);
        program.send_buffers(particles, &[Some(buffer)]).unwrap();
        assert!(program.is_descriptor_set_dirty());
        push_compute(&mut program).unwrap();

        let binds = device.binds.borrow();
        assert_eq!(binds[0].bind_point, vk::PipelineBindPoint::COMPUTE);
        assert!(binds[0].dynamic_offsets.is_empty());
        let writes = device.writes.borrow();
        let ssbo = writes.iter().rev().find(|w| w.descriptor_type == vk::DescriptorType::STORAGE_BUFFER).unwrap();
        assert_eq!(ssbo.buffers[0].buffer, vk::Buffer::from_raw(500));
        assert_eq!(ssbo.buffers[0].range, 1024);
    }

    #[test]
    fn test_texel_buffer_binding() {
        let (device, ctx) = setup();
        let mut program = ShaderProgram::new(&ctx, palette_sources(), None, CompileOptions::default()).unwrap();
        let palette = program.uniform("Palette").unwrap();
        assert_eq!(program.uniform_info(palette).unwrap().base_type, UniformType::TexelBuffer);
        let particles = program.uniform("Particles").unwrap();
        program.send_buffers(particles, &[Some(MockBuffer::storage(500, 1024))]).unwrap();

        // 空值使用设备的默认 texel buffer
        program.send_buffers(palette, &[None]).unwrap();
        push_compute(&mut program).unwrap();
        {
            let writes = device.writes.borrow();
            let texel = writes.iter().find(|w| w.descriptor_type == vk::DescriptorType::UNIFORM_TEXEL_BUFFER).unwrap();
            assert_eq!(texel.texel_views, vec![vk::BufferView::from_raw(8101)]);
        }

        // 没有 texel view 的缓冲被跳过
        program.send_buffers(palette, &[Some(MockBuffer::storage(600, 64))]).unwrap();
        assert!(!program.is_descriptor_set_dirty());

        program.send_buffers(palette, &[Some(MockBuffer::texel(700, 64))]).unwrap();
        assert!(program.is_descriptor_set_dirty());
        push_compute(&mut program).unwrap();
        let writes = device.writes.borrow();
        let texel = writes.iter().rev().find(|w| w.descriptor_type == vk::DescriptorType::UNIFORM_TEXEL_BUFFER).unwrap();
        assert_eq!(texel.texel_views, vec![vk::BufferView::from_raw(701)]);
    }

    #[test]
    fn test_video_textures() {
        let (device, ctx) = setup();
        let mut program = ShaderProgram::new(&ctx, video_sources(), None, CompileOptions::default()).unwrap();
        let channels = [BuiltinUniform::VideoY, BuiltinUniform::VideoCb, BuiltinUniform::VideoCr]
            .map(|builtin| program.builtin_uniform(builtin).unwrap());
        assert!(program.builtin_uniform(BuiltinUniform::MainTexture).is_none());

        let planes = [MockTexture::tex_2d(100), MockTexture::tex_2d(200), MockTexture::tex_2d(300)];
        program
            .set_video_textures(Some(planes[0].clone()), Some(planes[1].clone()), Some(planes[2].clone()))
            .unwrap();
        for (id, plane) in channels.iter().zip(&planes) {
            assert!(Rc::ptr_eq(&program.bound_texture(*id, 0).unwrap(), plane));
        }

        push(&mut program).unwrap();
        {
            let writes = device.writes.borrow();
            let views = writes
                .iter()
                .filter(|w| w.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .flat_map(|w| w.images.iter().map(|i| i.image_view))
                .collect::<Vec<_>>();
            for plane in &planes {
                assert!(views.contains(&plane.image_view()));
            }
        }

        // 空的通道使用默认纹理
        program.set_video_textures(Some(planes[0].clone()), None, Some(planes[2].clone())).unwrap();
        assert_eq!(program.bound_texture(channels[1], 0).unwrap().debug_name(), "default-2d");
        assert_eq!(Rc::strong_count(&planes[1]), 1);

        // 没有声明视频通道的程序直接忽略
        let mut plain = sprite(&ctx);
        let texture = MockTexture::tex_2d(400);
        plain.set_video_textures(Some(texture.clone()), None, None).unwrap();
        assert_eq!(Rc::strong_count(&texture), 1);
        assert!(plain.bound_texture(plain.uniform("MainTex").unwrap(), 0).is_none());
    }

    #[test]
    fn test_foreign_uniform_id_is_rejected() {
        let (_device, ctx) = setup();
        let mut program = sprite(&ctx);

        let mut other = ProgramInterface::new();
        let foreign = (0..64)
            .map(|i| other.declare(UniformInfo::scalar(format!("u{i}"), UniformType::Float, 4)))
            .last()
            .unwrap();
        assert!(program.uniform_info(foreign).is_none());

        assert!(matches!(program.update_uniform(foreign, 1), Err(ShaderError::InvalidOperation(_))));
        assert!(matches!(program.send_textures(foreign, &[None]), Err(ShaderError::InvalidOperation(_))));
        assert!(matches!(program.send_buffers(foreign, &[None]), Err(ShaderError::InvalidOperation(_))));
    }

    #[test]
    fn test_pipeline_cache_keys() {
        let (device, ctx) = setup();
        let mut program = sprite(&ctx);

        let mut solid = GraphicsPipelineConfiguration::default();
        solid.color_attachments(&[vk::Format::B8G8R8A8_UNORM]).unwrap();
        let mut wireframe = solid;
        wireframe.wireframe(true);

        let a = program.cached_graphics_pipeline(&solid).unwrap();
        let b = program.cached_graphics_pipeline(&wireframe).unwrap();
        let c = program.cached_graphics_pipeline(&solid).unwrap();

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(device.graphics_pipelines.borrow().len(), 2);
    }

    #[test]
    fn test_unload_queues_gpu_objects() {
        let (device, ctx) = setup();
        let mut program = sprite(&ctx);
        program.set_main_tex(Some(MockTexture::tex_2d(100))).unwrap();
        push(&mut program).unwrap();
        program.cached_graphics_pipeline(&GraphicsPipelineConfiguration::default()).unwrap();
        program.attach();
        assert!(ctx.is_active(program.id()));

        program.unload();
        assert!(!ctx.is_active(program.id()));
        assert_eq!(program.phase(), CompilePhase::Uncompiled);

        let cleanup = device.cleanup.borrow();
        let count = |pred: fn(&GpuObject) -> bool| cleanup.iter().filter(|o| pred(*o)).count();
        assert_eq!(count(|o| matches!(o, GpuObject::ShaderModule(_))), 2);
        assert_eq!(count(|o| matches!(o, GpuObject::DescriptorSetLayout(_))), 1);
        assert_eq!(count(|o| matches!(o, GpuObject::PipelineLayout(_))), 1);
        assert_eq!(count(|o| matches!(o, GpuObject::DescriptorPool(_))), 1);
        assert_eq!(count(|o| matches!(o, GpuObject::Pipeline(_))), 1);

        assert!(matches!(push(&mut program), Err(ShaderError::InvalidOperation(_))));
    }

    #[test]
    fn test_reload_keeps_bound_textures() {
        let (device, ctx) = setup();
        let mut program = sprite(&ctx);
        let texture = MockTexture::tex_2d(100);
        program.set_main_tex(Some(texture.clone())).unwrap();

        program.reload().unwrap();
        assert_eq!(program.phase(), CompilePhase::Ready);
        assert_eq!(device.shader_modules.borrow().len(), 4);

        let main_tex = program.builtin_uniform(BuiltinUniform::MainTexture).unwrap();
        assert!(Rc::ptr_eq(&program.bound_texture(main_tex, 0).unwrap(), &texture));
        push(&mut program).unwrap();
    }

    #[test]
    fn test_attach_flushes_batched_draws() {
        let (_device, ctx) = setup();
        let flushes = Rc::new(Cell::new(0));
        let counter = flushes.clone();
        ctx.set_batch_flusher(move || counter.set(counter.get() + 1));

        let mut a = sprite(&ctx);
        let b = sprite(&ctx);
        a.attach();
        a.attach();
        assert_eq!(flushes.get(), 1);

        // 修改当前程序的资源之前先提交
        a.set_main_tex(Some(MockTexture::tex_2d(100))).unwrap();
        assert_eq!(flushes.get(), 2);

        b.attach();
        assert_eq!(flushes.get(), 3);
        a.set_main_tex(None).unwrap();
        assert_eq!(flushes.get(), 3);
    }

    #[test]
    fn test_debug_names() {
        let (device, ctx) = setup();
        let _program = sprite(&ctx);
        let modules = device.shader_modules.borrow();
        assert_eq!(modules[0].1.as_deref(), Some("vertex shader: sprite"));
        assert_eq!(modules[1].1.as_deref(), Some("pixel shader: sprite"));
    }

    #[test]
    fn test_parse_failure_returns_error() {
        let (device, ctx) = setup();
        let sources = vec![ShaderStageSource::new(ShaderStageType::Pixel, "#version 450\nvoid main() { oops }\n")];
        let err = ShaderProgram::new(&ctx, sources, None, CompileOptions::default()).err().unwrap();
        assert!(matches!(err, ShaderError::Compile(_)));
        assert!(device.shader_modules.borrow().is_empty());
    }
}
