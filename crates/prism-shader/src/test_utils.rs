//! 测试用的 GLSL 以及记录所有调用的 [`DeviceContext`]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use ash::vk::{self, Handle};
use prism_gfx::{
    BuiltinUniformData, DataBaseType, DeviceContext, GfxError, GpuObject, GraphicsPipelineConfiguration,
    LocalUniformMapping, ShaderBuffer, ShaderStageModule, ShaderTexture, TextureType,
};

use crate::{compiler::ShaderStageSource, stage::ShaderStageType};

pub const SPRITE_VERTEX: &str = r#"#version 450

in vec4 VertexPosition;
in vec4 VertexTexCoord;
in vec4 VertexColor;

out vec4 VaryingTexCoord;
out vec4 VaryingColor;

uniform DefaultUniformBlock {
    vec4 BuiltinUniformsPerDraw[13];
    vec4 tint;
    mat4 model;
} udata;

void main() {
    mat4 transform = mat4(
        udata.BuiltinUniformsPerDraw[0],
        udata.BuiltinUniformsPerDraw[1],
        udata.BuiltinUniformsPerDraw[2],
        udata.BuiltinUniformsPerDraw[3]);
    VaryingTexCoord = VertexTexCoord;
    VaryingColor = VertexColor * udata.tint;
    gl_Position = transform * udata.model * VertexPosition;
}
"#;

pub const SPRITE_PIXEL: &str = r#"#version 450

in vec4 VaryingTexCoord;
in vec4 VaryingColor;

out vec4 FragColor;

uniform DefaultUniformBlock {
    vec4 BuiltinUniformsPerDraw[13];
    vec4 tint;
    mat4 model;
} udata;

uniform sampler2D MainTex;

void main() {
    FragColor = texture(MainTex, VaryingTexCoord.xy) * VaryingColor * udata.tint;
}
"#;

pub const PARTICLE_COMPUTE: &str = r#"#version 450
layout(local_size_x = 64) in;

layout(std430) buffer Particles {
    vec4 positions[];
} particles;

layout(rgba8) uniform writeonly image2D OutputImage;

void main() {
    uint i = gl_GlobalInvocationID.x;
    particles.positions[i] += vec4(0.01);
    imageStore(OutputImage, ivec2(int(i), 0), particles.positions[i]);
}
"#;

/// 和 [`SPRITE_VERTEX`] 搭配，三个平面分别采样
pub const VIDEO_PIXEL: &str = r#"#version 450

in vec4 VaryingTexCoord;
in vec4 VaryingColor;

out vec4 FragColor;

uniform sampler2D VideoYChannel;
uniform sampler2D VideoCbChannel;
uniform sampler2D VideoCrChannel;

void main() {
    vec2 uv = VaryingTexCoord.xy;
    vec3 ycbcr = vec3(texture(VideoYChannel, uv).r, texture(VideoCbChannel, uv).r, texture(VideoCrChannel, uv).r);
    FragColor = vec4(ycbcr, 1.0) * VaryingColor;
}
"#;

pub const PALETTE_COMPUTE: &str = r#"#version 450
layout(local_size_x = 64) in;

uniform samplerBuffer Palette;

layout(std430) buffer Particles {
    vec4 positions[];
} particles;

void main() {
    uint i = gl_GlobalInvocationID.x;
    particles.positions[i] = texelFetch(Palette, int(i));
}
"#;

pub fn sprite_sources() -> Vec<ShaderStageSource> {
    vec![
        ShaderStageSource::new(ShaderStageType::Vertex, SPRITE_VERTEX),
        ShaderStageSource::new(ShaderStageType::Pixel, SPRITE_PIXEL),
    ]
}

pub fn particle_sources() -> Vec<ShaderStageSource> {
    vec![ShaderStageSource::new(ShaderStageType::Compute, PARTICLE_COMPUTE)]
}

pub fn video_sources() -> Vec<ShaderStageSource> {
    vec![
        ShaderStageSource::new(ShaderStageType::Vertex, SPRITE_VERTEX),
        ShaderStageSource::new(ShaderStageType::Pixel, VIDEO_PIXEL),
    ]
}

pub fn palette_sources() -> Vec<ShaderStageSource> {
    vec![ShaderStageSource::new(ShaderStageType::Compute, PALETTE_COMPUTE)]
}

pub struct MockTexture {
    pub texture_type: TextureType,
    pub data_base_type: DataBaseType,
    pub depth_sampler: bool,
    pub readable: bool,
    pub storage: bool,
    pub view: vk::ImageView,
    pub sampler: Cell<vk::Sampler>,
    pub name: String,
}
impl MockTexture {
    pub fn new(id: u64, texture_type: TextureType) -> Self {
        Self {
            texture_type,
            data_base_type: DataBaseType::Float,
            depth_sampler: false,
            readable: true,
            storage: false,
            view: vk::ImageView::from_raw(id),
            sampler: Cell::new(vk::Sampler::from_raw(id + 1)),
            name: format!("texture-{id}"),
        }
    }

    pub fn tex_2d(id: u64) -> Rc<dyn ShaderTexture> {
        Rc::new(Self::new(id, TextureType::Tex2D))
    }
}
impl ShaderTexture for MockTexture {
    fn texture_type(&self) -> TextureType {
        self.texture_type
    }
    fn data_base_type(&self) -> DataBaseType {
        self.data_base_type
    }
    fn is_depth_sampler(&self) -> bool {
        self.depth_sampler
    }
    fn is_readable(&self) -> bool {
        self.readable
    }
    fn is_storage(&self) -> bool {
        self.storage
    }
    fn image_view(&self) -> vk::ImageView {
        self.view
    }
    fn image_layout(&self) -> vk::ImageLayout {
        if self.storage { vk::ImageLayout::GENERAL } else { vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL }
    }
    fn sampler(&self) -> vk::Sampler {
        self.sampler.get()
    }
    fn debug_name(&self) -> &str {
        &self.name
    }
}

pub struct MockBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub texel_view: Option<vk::BufferView>,
    pub texel_data_base_type: DataBaseType,
    pub name: String,
}
impl MockBuffer {
    pub fn storage(id: u64, size: vk::DeviceSize) -> Rc<dyn ShaderBuffer> {
        Rc::new(Self {
            buffer: vk::Buffer::from_raw(id),
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            texel_view: None,
            texel_data_base_type: DataBaseType::Float,
            name: format!("buffer-{id}"),
        })
    }

    /// view 的句柄是 `id + 1`
    pub fn texel(id: u64, size: vk::DeviceSize) -> Rc<dyn ShaderBuffer> {
        Rc::new(Self {
            buffer: vk::Buffer::from_raw(id),
            size,
            usage: vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER,
            texel_view: Some(vk::BufferView::from_raw(id + 1)),
            texel_data_base_type: DataBaseType::Float,
            name: format!("texel-buffer-{id}"),
        })
    }

    pub fn vertex(id: u64, size: vk::DeviceSize) -> Rc<dyn ShaderBuffer> {
        Rc::new(Self {
            buffer: vk::Buffer::from_raw(id),
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            texel_view: None,
            texel_data_base_type: DataBaseType::Float,
            name: format!("buffer-{id}"),
        })
    }
}
impl ShaderBuffer for MockBuffer {
    fn buffer(&self) -> vk::Buffer {
        self.buffer
    }
    fn size(&self) -> vk::DeviceSize {
        self.size
    }
    fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }
    fn texel_view(&self) -> Option<vk::BufferView> {
        self.texel_view
    }
    fn texel_data_base_type(&self) -> DataBaseType {
        self.texel_data_base_type
    }
    fn debug_name(&self) -> &str {
        &self.name
    }
}

/// 一次 `vkUpdateDescriptorSets` 中的一条 write
#[derive(Clone, Debug)]
pub struct RecordedWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub images: Vec<vk::DescriptorImageInfo>,
    pub buffers: Vec<vk::DescriptorBufferInfo>,
    pub texel_views: Vec<vk::BufferView>,
}

#[derive(Clone, Debug)]
pub struct RecordedBind {
    pub bind_point: vk::PipelineBindPoint,
    pub layout: vk::PipelineLayout,
    pub set: vk::DescriptorSet,
    pub dynamic_offsets: Vec<u32>,
}

#[derive(Copy, Clone, Debug)]
pub struct RecordedPool {
    pub pool: vk::DescriptorPool,
    pub allocated: u32,
    pub resets: u32,
}

/// 只记录调用的设备，所有句柄都是递增的假值
pub struct RecordingDevice {
    next_handle: Cell<u64>,
    /// 每个 pool 实际可以分配的 set 数量，用于模拟 pool 耗尽
    pub pool_capacity: Cell<u32>,
    pub debug_names: Cell<bool>,
    pub uniform_buffer: Cell<vk::Buffer>,

    pub shader_modules: RefCell<Vec<(vk::ShaderModule, Option<String>)>>,
    pub set_layouts: RefCell<Vec<Vec<(u32, vk::DescriptorType, u32, vk::ShaderStageFlags)>>>,
    pub pipeline_layouts: Cell<usize>,
    pub graphics_pipelines: RefCell<Vec<(vk::Pipeline, GraphicsPipelineConfiguration)>>,
    pub compute_pipelines: RefCell<Vec<vk::Pipeline>>,
    pub pools: RefCell<Vec<RecordedPool>>,
    pub pool_sizes: RefCell<Vec<vk::DescriptorPoolSize>>,
    pub allocated_sets: RefCell<Vec<vk::DescriptorSet>>,
    pub update_calls: Cell<usize>,
    pub writes: RefCell<Vec<RecordedWrite>>,
    pub binds: RefCell<Vec<RecordedBind>>,
    pub mapped: RefCell<Vec<Vec<u8>>>,
    pub cleanup: RefCell<Vec<GpuObject>>,
    pub builtin_data: Cell<BuiltinUniformData>,

    default_textures: Vec<Rc<dyn ShaderTexture>>,
    default_storage_buffer: Rc<dyn ShaderBuffer>,
    default_texel_buffer: Rc<dyn ShaderBuffer>,
}
impl RecordingDevice {
    pub fn new() -> Self {
        let default_textures = [TextureType::Tex2D, TextureType::Volume, TextureType::Array2D, TextureType::Cube]
            .into_iter()
            .enumerate()
            .map(|(i, ty)| {
                let mut texture = MockTexture::new(9000 + 10 * i as u64, ty);
                texture.storage = true;
                texture.name = format!("default-{}", ty.name());
                Rc::new(texture) as Rc<dyn ShaderTexture>
            })
            .collect();

        Self {
            next_handle: Cell::new(1),
            pool_capacity: Cell::new(u32::MAX),
            debug_names: Cell::new(true),
            uniform_buffer: Cell::new(vk::Buffer::from_raw(7000)),

            shader_modules: RefCell::new(vec![]),
            set_layouts: RefCell::new(vec![]),
            pipeline_layouts: Cell::new(0),
            graphics_pipelines: RefCell::new(vec![]),
            compute_pipelines: RefCell::new(vec![]),
            pools: RefCell::new(vec![]),
            pool_sizes: RefCell::new(vec![]),
            allocated_sets: RefCell::new(vec![]),
            update_calls: Cell::new(0),
            writes: RefCell::new(vec![]),
            binds: RefCell::new(vec![]),
            mapped: RefCell::new(vec![]),
            cleanup: RefCell::new(vec![]),
            builtin_data: Cell::new(BuiltinUniformData::default()),

            default_textures,
            default_storage_buffer: MockBuffer::storage(8000, 16),
            default_texel_buffer: MockBuffer::texel(8100, 16),
        }
    }

    fn handle(&self) -> u64 {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        handle
    }
}
impl DeviceContext for RecordingDevice {
    fn create_shader_module(&self, _code: &[u32], debug_name: Option<&str>) -> Result<vk::ShaderModule, GfxError> {
        let module = vk::ShaderModule::from_raw(self.handle());
        self.shader_modules.borrow_mut().push((module, debug_name.map(str::to_string)));
        Ok(module)
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        _debug_name: Option<&str>,
    ) -> Result<vk::DescriptorSetLayout, GfxError> {
        self.set_layouts.borrow_mut().push(
            bindings.iter().map(|b| (b.binding, b.descriptor_type, b.descriptor_count, b.stage_flags)).collect(),
        );
        Ok(vk::DescriptorSetLayout::from_raw(self.handle()))
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _debug_name: Option<&str>,
    ) -> Result<vk::PipelineLayout, GfxError> {
        self.pipeline_layouts.set(self.pipeline_layouts.get() + 1);
        Ok(vk::PipelineLayout::from_raw(self.handle()))
    }

    fn create_compute_pipeline(
        &self,
        _stage: &ShaderStageModule,
        _layout: vk::PipelineLayout,
        _debug_name: Option<&str>,
    ) -> Result<vk::Pipeline, GfxError> {
        let pipeline = vk::Pipeline::from_raw(self.handle());
        self.compute_pipelines.borrow_mut().push(pipeline);
        Ok(pipeline)
    }

    fn create_graphics_pipeline(
        &self,
        _stages: &[ShaderStageModule],
        _layout: vk::PipelineLayout,
        config: &GraphicsPipelineConfiguration,
        _debug_name: Option<&str>,
    ) -> Result<vk::Pipeline, GfxError> {
        let pipeline = vk::Pipeline::from_raw(self.handle());
        self.graphics_pipelines.borrow_mut().push((pipeline, *config));
        Ok(pipeline)
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, GfxError> {
        let pool = vk::DescriptorPool::from_raw(self.handle());
        *self.pool_sizes.borrow_mut() = pool_sizes.to_vec();
        self.pools.borrow_mut().push(RecordedPool {
            pool,
            allocated: 0,
            resets: 0,
        });
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), GfxError> {
        if let Some(p) = self.pools.borrow_mut().iter_mut().find(|p| p.pool == pool) {
            p.allocated = 0;
            p.resets += 1;
        }
        Ok(())
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let mut pools = self.pools.borrow_mut();
        let pool = pools.iter_mut().find(|p| p.pool == pool).ok_or(vk::Result::ERROR_UNKNOWN)?;
        if pool.allocated >= self.pool_capacity.get() {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        pool.allocated += 1;

        let set = vk::DescriptorSet::from_raw(self.handle());
        self.allocated_sets.borrow_mut().push(set);
        Ok(set)
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        self.update_calls.set(self.update_calls.get() + 1);

        let mut recorded = self.writes.borrow_mut();
        for w in writes {
            let count = w.descriptor_count as usize;
            // SAFETY: 指针来自调用方传入的切片，在这次调用期间有效
            let (images, buffers, texel_views) = unsafe {
                (
                    if w.p_image_info.is_null() { vec![] } else { std::slice::from_raw_parts(w.p_image_info, count).to_vec() },
                    if w.p_buffer_info.is_null() { vec![] } else { std::slice::from_raw_parts(w.p_buffer_info, count).to_vec() },
                    if w.p_texel_buffer_view.is_null() {
                        vec![]
                    } else {
                        std::slice::from_raw_parts(w.p_texel_buffer_view, count).to_vec()
                    },
                )
            };
            recorded.push(RecordedWrite {
                set: w.dst_set,
                binding: w.dst_binding,
                descriptor_type: w.descriptor_type,
                images,
                buffers,
                texel_views,
            });
        }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        self.binds.borrow_mut().push(RecordedBind {
            bind_point,
            layout,
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn map_local_uniform_data(&self, data: &[u8]) -> Result<LocalUniformMapping, GfxError> {
        let mut mapped = self.mapped.borrow_mut();
        let offset = mapped.len() as u32 * 256;
        mapped.push(data.to_vec());
        Ok(LocalUniformMapping {
            buffer: self.uniform_buffer.get(),
            offset,
            range: data.len() as vk::DeviceSize,
        })
    }

    fn builtin_uniform_data(&self) -> BuiltinUniformData {
        self.builtin_data.get()
    }

    fn default_texture(
        &self,
        texture_type: TextureType,
        _data_base_type: DataBaseType,
        _is_depth_sampler: bool,
    ) -> Option<Rc<dyn ShaderTexture>> {
        self.default_textures.iter().find(|t| t.texture_type() == texture_type).cloned()
    }

    fn default_storage_buffer(&self) -> Option<Rc<dyn ShaderBuffer>> {
        Some(self.default_storage_buffer.clone())
    }

    fn default_texel_buffer(&self, data_base_type: DataBaseType) -> Option<Rc<dyn ShaderBuffer>> {
        (data_base_type == DataBaseType::Float).then(|| self.default_texel_buffer.clone())
    }

    fn queue_cleanup(&self, objects: Vec<GpuObject>) {
        self.cleanup.borrow_mut().extend(objects);
    }

    fn debug_names_enabled(&self) -> bool {
        self.debug_names.get()
    }
}
