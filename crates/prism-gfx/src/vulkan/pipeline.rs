use ash::vk;
use itertools::Itertools;

use crate::{device_context::ShaderStageModule, error::GfxError, pipeline_config::GraphicsPipelineConfiguration};

fn vk_stage_info(stage: &ShaderStageModule) -> vk::PipelineShaderStageCreateInfo<'static> {
    vk::PipelineShaderStageCreateInfo::default()
        .stage(stage.stage)
        .module(stage.module)
        .name(ShaderStageModule::ENTRY_POINT)
}

pub(super) fn create_graphics_pipeline(
    device: &ash::Device,
    stages: &[ShaderStageModule],
    layout: vk::PipelineLayout,
    config: &GraphicsPipelineConfiguration,
) -> Result<vk::Pipeline, GfxError> {
    // dynamic rendering 需要的 framebuffer 信息
    let color_formats = config.color_formats();
    let depth_format = config.depth_format();
    let stencil_format = if has_stencil(depth_format) { depth_format } else { vk::Format::UNDEFINED };
    let mut attach_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format)
        .stencil_attachment_format(stencil_format);

    let shader_stages_info = stages.iter().map(vk_stage_info).collect_vec();

    // 顶点和 index
    let vertex_bindings = config.vertex_attributes().vk_binding_descriptions();
    let vertex_attributes = config.vertex_attributes().vk_attribute_descriptions();
    let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(config.vk_primitive_topology())
        .primitive_restart_enable(false);

    // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
    let viewport_info = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let rasterize_state_info = config.vk_rasterization_state();

    let msaa_info = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(config.vk_msaa_samples());

    // 混合设置：需要为每个 color attachment 分别指定
    let color_blend_attachments = config.vk_color_blend_attachments();
    let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .blend_constants([0.0, 0.0, 0.0, 0.0])
        .attachments(&color_blend_attachments);

    let depth_stencil_info = config.vk_depth_stencil_state();

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages_info)
        .vertex_input_state(&vertex_input_state_info)
        .input_assembly_state(&input_assembly_info)
        .viewport_state(&viewport_info)
        .rasterization_state(&rasterize_state_info)
        .multisample_state(&msaa_info)
        .color_blend_state(&color_blend_info)
        .depth_stencil_state(&depth_stencil_info)
        .layout(layout)
        .dynamic_state(&dynamic_state_info)
        .push_next(&mut attach_info);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
            .map_err(|(_, result)| GfxError::vulkan("vkCreateGraphicsPipelines")(result))?
    };
    Ok(pipelines[0])
}

pub(super) fn create_compute_pipeline(
    device: &ash::Device,
    stage: &ShaderStageModule,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline, GfxError> {
    let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(vk_stage_info(stage)).layout(layout);

    let pipelines = unsafe {
        device
            .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
            .map_err(|(_, result)| GfxError::vulkan("vkCreateComputePipelines")(result))?
    };
    Ok(pipelines[0])
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT | vk::Format::S8_UINT
    )
}
