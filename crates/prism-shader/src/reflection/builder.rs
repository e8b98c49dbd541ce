use std::collections::BTreeMap;

use prism_gfx::DataBaseType;

use super::{
    BuiltinUniform, BuiltinVertexAttribute, ProgramInterface, UniformId, UniformType, canonicalize_uniform_name, infer,
};
use crate::{
    binding_allocator::{BindingAllocator, DecorationKind},
    error::{CompileError, ShaderError},
    spirv::{Decoration, Resource, ScalarKind, SpirvModule},
    stage::ShaderStageType,
};

/// 顶点属性的 location 和基础数据类型
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VertexAttributeInfo {
    pub index: u32,
    pub base_type: DataBaseType,
}

/// local uniform block 的 binding 和大小
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LocalBlockLayout {
    pub location: u32,
    pub size: usize,
}

pub struct ReflectionOutput {
    pub interface: ProgramInterface,
    pub local_block: Option<LocalBlockLayout>,
    pub builtins: [Option<UniformId>; BuiltinUniform::COUNT],
    /// `BuiltinUniformsPerDraw` 在 local uniform block 中的偏移
    pub builtin_data_offset: Option<usize>,
    pub attributes: BTreeMap<String, VertexAttributeInfo>,
}

/// 逐个 stage 反射 SPIR-V，并把结果写入 [`ProgramInterface`]
///
/// 所有 stage 共享同一个 binding 分配器和同一个 location 分配器，
/// 因此同名资源在每个 stage 中得到相同的 binding，vertex 输出和 pixel 输入得到相同的 location。
pub struct ReflectionBuilder {
    interface: ProgramInterface,
    bindings: BindingAllocator,
    io_locations: BindingAllocator,

    local_block: Option<LocalBlockLayout>,
    builtins: [Option<UniformId>; BuiltinUniform::COUNT],
    builtin_data_offset: Option<usize>,

    attributes: BTreeMap<String, VertexAttributeInfo>,
    next_attribute: u32,
}
// new & init
impl ReflectionBuilder {
    pub fn new(mut interface: ProgramInterface, max_binding_slots: u32, max_location_slots: u32) -> Self {
        interface.reset_reflection();
        Self {
            interface,
            bindings: BindingAllocator::new(DecorationKind::Binding, max_binding_slots),
            io_locations: BindingAllocator::new(DecorationKind::Location, max_location_slots),

            local_block: None,
            builtins: [None; BuiltinUniform::COUNT],
            builtin_data_offset: None,

            attributes: BTreeMap::new(),
            next_attribute: BuiltinVertexAttribute::COUNT,
        }
    }
}
// getters
impl ReflectionBuilder {
    #[inline]
    pub fn interface(&self) -> &ProgramInterface {
        &self.interface
    }

    #[inline]
    pub fn bindings(&self) -> &BindingAllocator {
        &self.bindings
    }

    #[inline]
    pub fn io_locations(&self) -> &BindingAllocator {
        &self.io_locations
    }
}
// update
impl ReflectionBuilder {
    /// 反射一个 stage，必要时直接修改 `module` 中的 binding 和 location
    pub fn reflect_stage(&mut self, stage: ShaderStageType, module: &mut SpirvModule) -> Result<(), ShaderError> {
        let resources = module.shader_resources();
        let active = module.active_resource_ids().map_err(|source| CompileError::InvalidSpirv { stage, source })?;

        for block in &resources.uniform_buffers {
            if !active.contains(&block.id) {
                continue;
            }
            if !infer::is_local_block(module, block) {
                return Err(CompileError::Unsupported(format!(
                    "non-default uniform blocks ('{}' in {stage} shader)",
                    block.name
                ))
                .into());
            }
            self.reflect_local_block(stage, module, block)?;
        }

        for resource in resources.sampled_images.iter() {
            if !active.contains(&resource.id) {
                continue;
            }
            let Some(inferred) = infer::sampled_image_info(module, resource) else {
                continue;
            };
            let expected = inferred.base_type;
            self.reflect_resource(stage, module, resource, expected, || inferred)?;
        }
        for resource in resources.storage_images.iter() {
            if !active.contains(&resource.id) {
                continue;
            }
            let Some(inferred) = infer::storage_image_info(module, resource) else {
                continue;
            };
            self.reflect_resource(stage, module, resource, UniformType::StorageTexture, || inferred)?;
        }
        for resource in resources.storage_buffers.iter() {
            if !active.contains(&resource.id) {
                continue;
            }
            let inferred = infer::storage_buffer_info(module, resource);
            self.reflect_resource(stage, module, resource, UniformType::StorageBuffer, || inferred)?;
        }

        match stage {
            ShaderStageType::Vertex => {
                for input in &resources.stage_inputs {
                    self.reflect_vertex_attribute(module, input)?;
                }
                for output in &resources.stage_outputs {
                    self.reflect_varying(module, output)?;
                }
            }
            ShaderStageType::Pixel => {
                for input in &resources.stage_inputs {
                    self.reflect_varying(module, input)?;
                }
            }
            ShaderStageType::Compute => {}
        }

        Ok(())
    }

    fn reflect_local_block(
        &mut self,
        stage: ShaderStageType,
        module: &mut SpirvModule,
        block: &Resource,
    ) -> Result<(), ShaderError> {
        let location = self.bindings.assign(module, super::LOCAL_UNIFORM_BLOCK, 1, block.id)?;
        let size = module.declared_struct_size(block.base_type_id).unwrap_or(0);
        match self.local_block {
            Some(ref mut layout) => layout.size = layout.size.max(size),
            None => self.local_block = Some(LocalBlockLayout { location, size }),
        }

        for member in module.flatten_block_members(block.base_type_id) {
            let name = canonicalize_uniform_name(&member.name);
            let builtin = BuiltinUniform::from_name(name);
            if builtin == Some(BuiltinUniform::UniformsPerDraw) {
                self.builtin_data_offset = Some(member.offset);
            }

            let id = match self.interface.find(name) {
                Some(id) => id,
                None => match builtin.and_then(|_| infer::local_member_info(module, &member)) {
                    Some(info) => self.interface.declare(info),
                    None => {
                        log::warn!("unknown uniform '{name}' in {stage} shader");
                        continue;
                    }
                },
            };

            let info = self.interface.get_mut(id);
            if !info.base_type.uses_local_data() {
                log::warn!(
                    "uniform '{name}' is declared as {:?} but is a block member in {stage} shader",
                    info.base_type
                );
                continue;
            }

            info.active = true;
            info.stage_mask |= stage.mask();
            info.location = Some(location);
            info.count = module.array_length(member.type_id).unwrap_or(1) as usize;
            info.data_size = member.size;
            info.data_offset = Some(member.offset);

            if let Some(builtin) = builtin {
                self.builtins[builtin.index()] = Some(id);
            }
        }

        Ok(())
    }

    /// 纹理、texel buffer、storage buffer：在各自的声明表中查找，并分配 binding
    fn reflect_resource(
        &mut self,
        stage: ShaderStageType,
        module: &mut SpirvModule,
        resource: &Resource,
        expected: UniformType,
        inferred: impl FnOnce() -> super::UniformInfo,
    ) -> Result<(), ShaderError> {
        let name = canonicalize_uniform_name(&resource.name);
        let builtin = BuiltinUniform::from_name(name);

        let id = match (self.interface.find(name), builtin) {
            (Some(id), _) => id,
            (None, Some(_)) => self.interface.declare(inferred()),
            (None, None) => {
                log::warn!("unknown {expected:?} uniform '{name}' in {stage} shader");
                return Ok(());
            }
        };
        if self.interface.get(id).base_type != expected {
            log::warn!(
                "uniform '{name}' is declared as {:?} but is used as {expected:?} in {stage} shader",
                self.interface.get(id).base_type
            );
            return Ok(());
        }

        let count = module.array_length(resource.type_id).unwrap_or(1);
        let location = self.bindings.assign(module, name, count, resource.id)?;

        let info = self.interface.get_mut(id);
        if info.count != count as usize {
            log::debug!("uniform '{name}' declared with {} elements, shader uses {count}", info.count);
            info.count = count as usize;
        }
        info.active = true;
        info.stage_mask |= stage.mask();
        info.location = Some(location);

        if let Some(builtin) = builtin {
            self.builtins[builtin.index()] = Some(id);
        }
        Ok(())
    }

    /// 内置属性使用固定的 location，其他属性依次编号；未使用的输入同样需要合法的 location
    fn reflect_vertex_attribute(&mut self, module: &mut SpirvModule, input: &Resource) -> Result<(), ShaderError> {
        let index = match self.attributes.get(&input.name) {
            Some(attribute) => attribute.index,
            None => match BuiltinVertexAttribute::from_name(&input.name) {
                Some(builtin) => builtin as u32,
                None => {
                    let index = self.next_attribute;
                    self.next_attribute += module.location_count(input.type_id).max(1);
                    index
                }
            },
        };

        module.set_decoration(input.id, Decoration::Location, index).ok_or_else(|| {
            CompileError::BindingOffsetNotFound {
                name: input.name.clone(),
                kind: DecorationKind::Location,
            }
        })?;

        let base_type = match module.scalar_kind(input.type_id) {
            Some(ScalarKind::Int) => DataBaseType::Int,
            Some(ScalarKind::Uint | ScalarKind::Bool) => DataBaseType::Uint,
            _ => DataBaseType::Float,
        };
        self.attributes.insert(input.name.clone(), VertexAttributeInfo { index, base_type });
        Ok(())
    }

    fn reflect_varying(&mut self, module: &mut SpirvModule, varying: &Resource) -> Result<(), ShaderError> {
        let count = module.location_count(varying.type_id);
        self.io_locations.assign(module, &varying.name, count, varying.id)?;
        Ok(())
    }

    pub fn finish(mut self) -> ReflectionOutput {
        for (_, info) in self.interface.iter().filter(|(_, info)| !info.active) {
            log::debug!("uniform '{}' is declared but not used by the shader", info.name);
        }
        self.interface.assign_resource_indices();

        ReflectionOutput {
            interface: self.interface,
            local_block: self.local_block,
            builtins: self.builtins,
            builtin_data_offset: self.builtin_data_offset,
            attributes: self.attributes,
        }
    }
}
