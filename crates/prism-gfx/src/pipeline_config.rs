//! 图形管线的打包配置
//!
//! 所有字段都是 4 字节的整数，没有 padding，因此可以直接按字节比较和哈希，
//! 作为 pipeline cache 的 key 时不会漏掉任何字段。

use std::hash::{Hash, Hasher};

use ash::vk;

use crate::GfxError;

pub const MAX_COLOR_ATTACHMENTS: usize = 8;
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
pub const MAX_VERTEX_BUFFERS: usize = 8;

fn check_binding(binding: u32) -> Result<(), GfxError> {
    if binding as usize >= MAX_VERTEX_BUFFERS {
        return Err(GfxError::InvalidArgument(format!("vertex buffer binding out of range: {binding}")));
    }
    Ok(())
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexAttribute {
    pub binding: u32,
    /// `vk::Format` 的原始值
    pub format: i32,
    pub offset: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexAttributes {
    /// 第 i 位表示第 i 个 attribute location 是否启用
    pub enable_mask: u32,
    /// 第 i 位表示第 i 个 vertex buffer binding 是否按 instance 步进
    pub instance_mask: u32,
    pub attributes: [VertexAttribute; MAX_VERTEX_ATTRIBUTES],
    pub binding_strides: [u32; MAX_VERTEX_BUFFERS],
}
impl VertexAttributes {
    pub fn set_attribute(
        &mut self,
        location: u32,
        binding: u32,
        format: vk::Format,
        offset: u32,
    ) -> Result<&mut Self, GfxError> {
        if location as usize >= MAX_VERTEX_ATTRIBUTES {
            return Err(GfxError::InvalidArgument(format!("vertex attribute location out of range: {location}")));
        }
        check_binding(binding)?;
        self.attributes[location as usize] = VertexAttribute {
            binding,
            format: format.as_raw(),
            offset,
        };
        self.enable_mask |= 1 << location;
        Ok(self)
    }

    pub fn set_binding(&mut self, binding: u32, stride: u32, per_instance: bool) -> Result<&mut Self, GfxError> {
        check_binding(binding)?;
        self.binding_strides[binding as usize] = stride;
        if per_instance {
            self.instance_mask |= 1 << binding;
        } else {
            self.instance_mask &= !(1 << binding);
        }
        Ok(self)
    }

    /// 字段是公开的，越界的 binding 直接忽略
    fn used_binding_mask(&self) -> u32 {
        self.enabled_locations()
            .map(|location| self.attributes[location as usize].binding)
            .filter(|&binding| (binding as usize) < MAX_VERTEX_BUFFERS)
            .fold(0, |mask, binding| mask | (1 << binding))
    }

    pub fn enabled_locations(&self) -> impl Iterator<Item = u32> + '_ {
        (0..MAX_VERTEX_ATTRIBUTES as u32).filter(|i| self.enable_mask & (1 << i) != 0)
    }

    pub fn vk_attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.enabled_locations()
            .map(|location| {
                let attribute = &self.attributes[location as usize];
                vk::VertexInputAttributeDescription {
                    location,
                    binding: attribute.binding,
                    format: vk::Format::from_raw(attribute.format),
                    offset: attribute.offset,
                }
            })
            .collect()
    }

    pub fn vk_binding_descriptions(&self) -> Vec<vk::VertexInputBindingDescription> {
        let used = self.used_binding_mask();
        (0..MAX_VERTEX_BUFFERS as u32)
            .filter(|binding| used & (1 << binding) != 0)
            .map(|binding| vk::VertexInputBindingDescription {
                binding,
                stride: self.binding_strides[binding as usize],
                input_rate: if self.instance_mask & (1 << binding) != 0 {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                },
            })
            .collect()
    }
}

/// 所有 color attachment 共用的混合状态
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlendState {
    pub enable: u32,
    pub src_color_factor: i32,
    pub dst_color_factor: i32,
    pub color_op: i32,
    pub src_alpha_factor: i32,
    pub dst_alpha_factor: i32,
    pub alpha_op: i32,
}
impl BlendState {
    /// 预乘 alpha 之前的标准 alpha 混合
    pub fn alpha() -> Self {
        Self {
            enable: 1,
            src_color_factor: vk::BlendFactor::SRC_ALPHA.as_raw(),
            dst_color_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA.as_raw(),
            color_op: vk::BlendOp::ADD.as_raw(),
            src_alpha_factor: vk::BlendFactor::ONE.as_raw(),
            dst_alpha_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA.as_raw(),
            alpha_op: vk::BlendOp::ADD.as_raw(),
        }
    }

    fn vk_attachment_state(&self, color_write_mask: vk::ColorComponentFlags) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.enable,
            src_color_blend_factor: vk::BlendFactor::from_raw(self.src_color_factor),
            dst_color_blend_factor: vk::BlendFactor::from_raw(self.dst_color_factor),
            color_blend_op: vk::BlendOp::from_raw(self.color_op),
            src_alpha_blend_factor: vk::BlendFactor::from_raw(self.src_alpha_factor),
            dst_alpha_blend_factor: vk::BlendFactor::from_raw(self.dst_alpha_factor),
            alpha_blend_op: vk::BlendOp::from_raw(self.alpha_op),
            color_write_mask,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StencilState {
    pub enable: u32,
    pub compare_op: i32,
    pub pass_op: i32,
    pub fail_op: i32,
    pub depth_fail_op: i32,
    pub reference: u32,
    pub compare_mask: u32,
    pub write_mask: u32,
}
impl StencilState {
    fn vk_op_state(&self) -> vk::StencilOpState {
        vk::StencilOpState {
            fail_op: vk::StencilOp::from_raw(self.fail_op),
            pass_op: vk::StencilOp::from_raw(self.pass_op),
            depth_fail_op: vk::StencilOp::from_raw(self.depth_fail_op),
            compare_op: vk::CompareOp::from_raw(self.compare_op),
            compare_mask: self.compare_mask,
            write_mask: self.write_mask,
            reference: self.reference,
        }
    }
}

/// 一个图形管线的全部可变状态，shader 程序用它作为 pipeline cache 的 key
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GraphicsPipelineConfiguration {
    /// dynamic render 需要的 framebuffer 信息
    color_formats: [i32; MAX_COLOR_ATTACHMENTS],
    num_color_attachments: u32,
    /// dynamic render 需要的 framebuffer 信息，UNDEFINED 表示没有 depth attachment
    depth_stencil_format: i32,

    vertex_attributes: VertexAttributes,

    blend: BlendState,
    color_write_mask: u32,
    msaa_samples: u32,
    primitive_topology: i32,

    wireframe: u32,
    cull_mode: u32,
    front_face: i32,

    depth_compare_op: i32,
    depth_write: u32,
    stencil: StencilState,
}
impl Default for GraphicsPipelineConfiguration {
    fn default() -> Self {
        let mut config: Self = bytemuck::Zeroable::zeroed();
        config.depth_stencil_format = vk::Format::UNDEFINED.as_raw();
        config.color_write_mask = vk::ColorComponentFlags::RGBA.as_raw();
        config.msaa_samples = vk::SampleCountFlags::TYPE_1.as_raw();
        config.primitive_topology = vk::PrimitiveTopology::TRIANGLE_LIST.as_raw();
        config.cull_mode = vk::CullModeFlags::NONE.as_raw();
        // 按照 OpenGL 的传统，将 CCW 视为 front face
        config.front_face = vk::FrontFace::COUNTER_CLOCKWISE.as_raw();
        config.depth_compare_op = vk::CompareOp::ALWAYS.as_raw();
        config.stencil.compare_op = vk::CompareOp::ALWAYS.as_raw();
        config.stencil.compare_mask = 0xff;
        config.stencil.write_mask = 0xff;
        config
    }
}
impl PartialEq for GraphicsPipelineConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}
impl Eq for GraphicsPipelineConfiguration {}
impl Hash for GraphicsPipelineConfiguration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}
// builder
impl GraphicsPipelineConfiguration {
    pub fn color_attachments(&mut self, formats: &[vk::Format]) -> Result<&mut Self, GfxError> {
        if formats.len() > MAX_COLOR_ATTACHMENTS {
            return Err(GfxError::InvalidArgument(format!("too many color attachments: {}", formats.len())));
        }
        self.color_formats = [0; MAX_COLOR_ATTACHMENTS];
        for (dst, format) in self.color_formats.iter_mut().zip(formats) {
            *dst = format.as_raw();
        }
        self.num_color_attachments = formats.len() as u32;
        Ok(self)
    }

    #[inline]
    pub fn depth_stencil_format(&mut self, format: vk::Format) -> &mut Self {
        self.depth_stencil_format = format.as_raw();
        self
    }

    #[inline]
    pub fn vertex_attributes_mut(&mut self) -> &mut VertexAttributes {
        &mut self.vertex_attributes
    }

    #[inline]
    pub fn blend(&mut self, blend: BlendState) -> &mut Self {
        self.blend = blend;
        self
    }

    #[inline]
    pub fn color_write_mask(&mut self, mask: vk::ColorComponentFlags) -> &mut Self {
        self.color_write_mask = mask.as_raw();
        self
    }

    #[inline]
    pub fn msaa_samples(&mut self, samples: vk::SampleCountFlags) -> &mut Self {
        self.msaa_samples = samples.as_raw();
        self
    }

    #[inline]
    pub fn primitive_topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.primitive_topology = topology.as_raw();
        self
    }

    #[inline]
    pub fn wireframe(&mut self, wireframe: bool) -> &mut Self {
        self.wireframe = wireframe as u32;
        self
    }

    #[inline]
    pub fn cull_mode(&mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> &mut Self {
        self.cull_mode = mode.as_raw();
        self.front_face = front_face.as_raw();
        self
    }

    #[inline]
    pub fn depth_state(&mut self, compare_op: vk::CompareOp, write: bool) -> &mut Self {
        self.depth_compare_op = compare_op.as_raw();
        self.depth_write = write as u32;
        self
    }

    #[inline]
    pub fn stencil(&mut self, stencil: StencilState) -> &mut Self {
        self.stencil = stencil;
        self
    }
}
// getters
impl GraphicsPipelineConfiguration {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn color_formats(&self) -> Vec<vk::Format> {
        self.color_formats[..self.num_color_attachments as usize].iter().map(|f| vk::Format::from_raw(*f)).collect()
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        vk::Format::from_raw(self.depth_stencil_format)
    }

    #[inline]
    pub fn vertex_attributes(&self) -> &VertexAttributes {
        &self.vertex_attributes
    }

    #[inline]
    pub fn is_wireframe(&self) -> bool {
        self.wireframe != 0
    }

    #[inline]
    pub fn vk_primitive_topology(&self) -> vk::PrimitiveTopology {
        vk::PrimitiveTopology::from_raw(self.primitive_topology)
    }

    #[inline]
    pub fn vk_msaa_samples(&self) -> vk::SampleCountFlags {
        vk::SampleCountFlags::from_raw(self.msaa_samples)
    }

    pub fn vk_rasterization_state(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(if self.is_wireframe() { vk::PolygonMode::LINE } else { vk::PolygonMode::FILL })
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::from_raw(self.cull_mode))
            .front_face(vk::FrontFace::from_raw(self.front_face))
            .depth_bias_enable(false)
    }

    pub fn vk_color_blend_attachments(&self) -> Vec<vk::PipelineColorBlendAttachmentState> {
        let state = self.blend.vk_attachment_state(vk::ColorComponentFlags::from_raw(self.color_write_mask));
        vec![state; self.num_color_attachments as usize]
    }

    pub fn vk_depth_stencil_state(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        let has_depth = self.depth_format() != vk::Format::UNDEFINED;
        let stencil = self.stencil.vk_op_state();
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth)
            .depth_write_enable(has_depth && self.depth_write != 0)
            .depth_compare_op(vk::CompareOp::from_raw(self.depth_compare_op))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(self.stencil.enable != 0)
            .front(stencil)
            .back(stencil)
    }
}
