//! 没有声明接口时，直接从 SPIR-V 推导出接口

use prism_gfx::{DataBaseType, TextureType};

use super::{AccessFlags, LOCAL_UNIFORM_BLOCK, ProgramInterface, UniformInfo, UniformType, canonicalize_uniform_name};
use crate::spirv::{BlockMember, Decoration, Dim, Resource, ScalarKind, SpirvModule, SpirvType};

fn data_base_type(kind: Option<ScalarKind>) -> DataBaseType {
    match kind {
        Some(ScalarKind::Int) => DataBaseType::Int,
        Some(ScalarKind::Uint | ScalarKind::Bool) => DataBaseType::Uint,
        _ => DataBaseType::Float,
    }
}

fn texture_type(dim: Dim, arrayed: bool) -> TextureType {
    match (dim, arrayed) {
        (Dim::Dim3D, _) => TextureType::Volume,
        (Dim::DimCube, _) => TextureType::Cube,
        (_, true) => TextureType::Array2D,
        _ => TextureType::Tex2D,
    }
}

pub(crate) fn is_local_block(module: &SpirvModule, resource: &Resource) -> bool {
    resource.name == LOCAL_UNIFORM_BLOCK || module.name(resource.id) == Some(LOCAL_UNIFORM_BLOCK)
}

/// local uniform block 中的一个叶子成员
pub(crate) fn local_member_info(module: &SpirvModule, member: &BlockMember) -> Option<UniformInfo> {
    let name = canonicalize_uniform_name(&member.name);
    let count = module.array_length(member.type_id).unwrap_or(1) as usize;
    let kind = module.scalar_kind(member.type_id)?;

    let info = match module.ty(module.strip_arrays(member.type_id))? {
        SpirvType::Matrix { column, columns } => {
            let Some(SpirvType::Vector { count: rows, .. }) = module.ty(*column) else {
                return None;
            };
            UniformInfo::matrix(name, *columns as usize, *rows as usize)
        }
        SpirvType::Vector { count: components, .. } => {
            UniformInfo::scalar(name, scalar_uniform_type(kind), *components as usize)
        }
        _ => UniformInfo::scalar(name, scalar_uniform_type(kind), 1),
    };
    Some(info.with_count(count))
}

fn scalar_uniform_type(kind: ScalarKind) -> UniformType {
    match kind {
        ScalarKind::Bool => UniformType::Bool,
        ScalarKind::Int => UniformType::Int,
        ScalarKind::Uint => UniformType::Uint,
        ScalarKind::Float => UniformType::Float,
    }
}

/// sampler 或 texel buffer
pub(crate) fn sampled_image_info(module: &SpirvModule, resource: &Resource) -> Option<UniformInfo> {
    let shape = module.image_shape(resource.type_id)?;
    let name = canonicalize_uniform_name(&resource.name);
    let base = data_base_type(module.scalar_kind(shape.sampled_type));
    let count = module.array_length(resource.type_id).unwrap_or(1) as usize;

    if shape.dim == Dim::DimBuffer {
        return Some(UniformInfo::texel_buffer(name, base).with_count(count));
    }

    let info = UniformInfo::sampler(name, texture_type(shape.dim, shape.arrayed)).with_data_base_type(base).with_count(count);
    Some(if shape.depth { info.with_depth_sampler() } else { info })
}

pub(crate) fn storage_image_info(module: &SpirvModule, resource: &Resource) -> Option<UniformInfo> {
    let shape = module.image_shape(resource.type_id)?;
    let mut access = AccessFlags::READ | AccessFlags::WRITE;
    if module.has_decoration(resource.id, Decoration::NonWritable) {
        access.remove(AccessFlags::WRITE);
    }
    if module.has_decoration(resource.id, Decoration::NonReadable) {
        access.remove(AccessFlags::READ);
    }

    let info = UniformInfo::storage_texture(
        canonicalize_uniform_name(&resource.name),
        texture_type(shape.dim, shape.arrayed),
        access,
    );
    Some(
        info.with_data_base_type(data_base_type(module.scalar_kind(shape.sampled_type)))
            .with_count(module.array_length(resource.type_id).unwrap_or(1) as usize),
    )
}

/// glslang 把 `readonly` / `writeonly` 记在 block 的成员上
pub(crate) fn storage_buffer_info(module: &SpirvModule, resource: &Resource) -> UniformInfo {
    let member_count = match module.ty(resource.base_type_id) {
        Some(SpirvType::Struct { members }) => members.len() as u32,
        _ => 0,
    };
    let all_members =
        |dec: Decoration| member_count > 0 && (0..member_count).all(|i| module.has_member_decoration(resource.base_type_id, i, dec));

    let mut access = AccessFlags::READ | AccessFlags::WRITE;
    if all_members(Decoration::NonWritable) || module.has_decoration(resource.id, Decoration::NonWritable) {
        access.remove(AccessFlags::WRITE);
    }
    if all_members(Decoration::NonReadable) || module.has_decoration(resource.id, Decoration::NonReadable) {
        access.remove(AccessFlags::READ);
    }

    UniformInfo::storage_buffer(canonicalize_uniform_name(&resource.name), access)
        .with_count(module.array_length(resource.type_id).unwrap_or(1) as usize)
}

/// 把每个 stage 中出现的资源都声明出来，已经声明过的名字保持第一次的结果
pub fn infer_interface<'a>(modules: impl IntoIterator<Item = &'a SpirvModule>) -> ProgramInterface {
    let mut interface = ProgramInterface::new();
    let mut declare = |info: Option<UniformInfo>| {
        if let Some(info) = info
            && interface.find(&info.name).is_none()
        {
            interface.declare(info);
        }
    };

    for module in modules {
        let resources = module.shader_resources();

        for block in resources.uniform_buffers.iter().filter(|r| is_local_block(module, r)) {
            for member in module.flatten_block_members(block.base_type_id) {
                declare(local_member_info(module, &member));
            }
        }
        for resource in &resources.sampled_images {
            declare(sampled_image_info(module, resource));
        }
        for resource in &resources.storage_images {
            declare(storage_image_info(module, resource));
        }
        for resource in &resources.storage_buffers {
            declare(Some(storage_buffer_info(module, resource)));
        }
    }

    interface
}
