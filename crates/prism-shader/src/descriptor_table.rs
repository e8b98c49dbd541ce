//! descriptor 写入记录
//!
//! 编译完成之后按活跃资源的数量一次性确定各个数组的大小，之后重新绑定资源只会原地修改其中的元素。
//! 任何元素发生变化都会让整个 descriptor set 变脏，下一次绑定时重新分配并写入。

use ash::vk;
use prism_gfx::{ShaderBuffer, ShaderTexture};

use crate::{
    error::BindingValidationError,
    local_uniforms::LocalUniformBuffer,
    reflection::{ProgramInterface, UniformInfo, UniformType},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DescriptorArray {
    Buffer,
    Image,
    TexelView,
}
impl DescriptorArray {
    fn of(descriptor_type: vk::DescriptorType) -> Self {
        match descriptor_type {
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER | vk::DescriptorType::STORAGE_IMAGE => Self::Image,
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER => Self::TexelView,
            _ => Self::Buffer,
        }
    }
}

/// 一个 binding 在 descriptor 数组中占用的区间
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stage_flags: vk::ShaderStageFlags,
    /// 在对应数组中的起始下标
    pub start: usize,
    pub count: u32,
}

pub struct DescriptorTable {
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
    image_infos: Vec<vk::DescriptorImageInfo>,
    texel_views: Vec<vk::BufferView>,
    writes: Vec<DescriptorWrite>,
    dirty: bool,
}
// new & init
impl DescriptorTable {
    /// 顺序：local uniform buffer、sampler、storage image、texel buffer、storage buffer，每类按名字排序
    ///
    /// 同时把每个资源在数组中的起始位置写回 `binding_start_index`。
    pub fn build(interface: &mut ProgramInterface, local: Option<&LocalUniformBuffer>, is_compute: bool) -> Self {
        let mut table = Self {
            buffer_infos: vec![],
            image_infos: vec![],
            texel_views: vec![],
            writes: vec![],
            dirty: true,
        };

        if let Some(local) = local {
            table.buffer_infos.push(vk::DescriptorBufferInfo::default().range(local.size() as vk::DeviceSize));
            table.writes.push(DescriptorWrite {
                binding: local.location(),
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                stage_flags: if is_compute {
                    vk::ShaderStageFlags::COMPUTE
                } else {
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
                },
                start: 0,
                count: 1,
            });
        }

        let ids = [
            interface.sampled_textures(),
            interface.storage_textures(),
            interface.texel_buffers(),
            interface.storage_buffers(),
        ];
        for id in ids.into_iter().flatten() {
            let info = interface.get_mut(id);
            let (true, Some(binding)) = (info.active, info.location) else {
                continue;
            };

            let descriptor_type = info.base_type.descriptor_type();
            let start = match DescriptorArray::of(descriptor_type) {
                DescriptorArray::Buffer => grow(&mut table.buffer_infos, info.count),
                DescriptorArray::Image => {
                    let layout = if info.base_type == UniformType::StorageTexture {
                        vk::ImageLayout::GENERAL
                    } else {
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    };
                    let start = grow(&mut table.image_infos, info.count);
                    table.image_infos[start..].iter_mut().for_each(|image| image.image_layout = layout);
                    start
                }
                DescriptorArray::TexelView => grow(&mut table.texel_views, info.count),
            };

            info.binding_start_index = Some(start);
            table.writes.push(DescriptorWrite {
                binding,
                descriptor_type,
                stage_flags: info.stage_mask.vk_stage_flags(),
                start,
                count: info.count as u32,
            });
        }

        table
    }
}

fn grow<T: Default + Clone>(array: &mut Vec<T>, count: usize) -> usize {
    let start = array.len();
    array.resize(start + count, T::default());
    start
}

fn same_image(a: &vk::DescriptorImageInfo, b: &vk::DescriptorImageInfo) -> bool {
    a.sampler == b.sampler && a.image_view == b.image_view && a.image_layout == b.image_layout
}

fn same_buffer(a: &vk::DescriptorBufferInfo, b: &vk::DescriptorBufferInfo) -> bool {
    a.buffer == b.buffer && a.offset == b.offset && a.range == b.range
}

// getters
impl DescriptorTable {
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 没有任何 binding 的程序不需要 descriptor set
    #[inline]
    pub fn has_bindings(&self) -> bool {
        !self.writes.is_empty()
    }

    #[inline]
    pub fn writes(&self) -> &[DescriptorWrite] {
        &self.writes
    }

    #[inline]
    pub fn image_info(&self, index: usize) -> Option<&vk::DescriptorImageInfo> {
        self.image_infos.get(index)
    }

    #[inline]
    pub fn buffer_info(&self, index: usize) -> Option<&vk::DescriptorBufferInfo> {
        self.buffer_infos.get(index)
    }

    #[inline]
    pub fn texel_view(&self, index: usize) -> Option<vk::BufferView> {
        self.texel_views.get(index).copied()
    }

    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.writes
            .iter()
            .map(|w| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(w.binding)
                    .descriptor_type(w.descriptor_type)
                    .descriptor_count(w.count)
                    .stage_flags(w.stage_flags)
            })
            .collect()
    }

    /// 单个 descriptor set 需要的各类 descriptor 数量
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = vec![];
        for w in &self.writes {
            match sizes.iter_mut().find(|s| s.ty == w.descriptor_type) {
                Some(size) => size.descriptor_count += w.count,
                None => sizes.push(vk::DescriptorPoolSize::default().ty(w.descriptor_type).descriptor_count(w.count)),
            }
        }
        sizes
    }

    /// 借用内部数组生成 `vkUpdateDescriptorSets` 的参数
    pub fn vk_writes(&self, set: vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet<'_>> {
        self.writes
            .iter()
            .map(|w| {
                let range = w.start..w.start + w.count as usize;
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(w.binding)
                    .dst_array_element(0)
                    .descriptor_type(w.descriptor_type);
                match DescriptorArray::of(w.descriptor_type) {
                    DescriptorArray::Buffer => write.buffer_info(&self.buffer_infos[range]),
                    DescriptorArray::Image => write.image_info(&self.image_infos[range]),
                    DescriptorArray::TexelView => write.texel_buffer_view(&self.texel_views[range]),
                }
            })
            .collect()
    }
}
// update
impl DescriptorTable {
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn slot(info: &UniformInfo, index: usize) -> Option<usize> {
        (index < info.count).then_some(info.binding_start_index? + index)
    }

    /// 写入纹理的 image view 和 layout；`None` 写入空 descriptor。返回是否发生了变化
    pub fn set_texture_descriptor(
        &mut self,
        info: &UniformInfo,
        index: usize,
        texture: Option<&dyn ShaderTexture>,
    ) -> bool {
        let Some(slot) = Self::slot(info, index) else {
            return false;
        };
        let storage = info.base_type == UniformType::StorageTexture;
        let image = match texture {
            Some(texture) => vk::DescriptorImageInfo {
                sampler: if storage { vk::Sampler::null() } else { texture.sampler() },
                image_view: texture.image_view(),
                image_layout: if storage { vk::ImageLayout::GENERAL } else { texture.image_layout() },
            },
            None => vk::DescriptorImageInfo {
                image_layout: self.image_infos[slot].image_layout,
                ..Default::default()
            },
        };

        if same_image(&self.image_infos[slot], &image) {
            return false;
        }
        self.image_infos[slot] = image;
        self.dirty = true;
        true
    }

    /// 普通 buffer 写入整个 buffer，texel buffer 写入 buffer view
    pub fn set_buffer_descriptor(&mut self, info: &UniformInfo, index: usize, buffer: Option<&dyn ShaderBuffer>) -> bool {
        let Some(slot) = Self::slot(info, index) else {
            return false;
        };

        if info.base_type == UniformType::TexelBuffer {
            let view = buffer.and_then(|b| b.texel_view()).unwrap_or_default();
            if self.texel_views[slot] == view {
                return false;
            }
            self.texel_views[slot] = view;
        } else {
            let buffer_info = match buffer {
                Some(buffer) => vk::DescriptorBufferInfo::default().buffer(buffer.buffer()).offset(0).range(buffer.size()),
                None => vk::DescriptorBufferInfo::default(),
            };
            if same_buffer(&self.buffer_infos[slot], &buffer_info) {
                return false;
            }
            self.buffer_infos[slot] = buffer_info;
        }

        self.dirty = true;
        true
    }

    /// local uniform 的数据每次 draw 都会写到流缓冲中，只有缓冲本身变化时才需要重写 descriptor
    pub fn set_local_uniform_buffer(&mut self, buffer: vk::Buffer, range: vk::DeviceSize) {
        let Some(first) = self.writes.first() else {
            return;
        };
        if first.descriptor_type != vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC {
            return;
        }

        let info = vk::DescriptorBufferInfo::default().buffer(buffer).offset(0).range(range);
        if !same_buffer(&self.buffer_infos[0], &info) {
            self.buffer_infos[0] = info;
            self.dirty = true;
        }
    }

    /// sampler 可能在纹理发送之后被修改
    pub fn refresh_sampler(&mut self, info: &UniformInfo, index: usize, sampler: vk::Sampler) {
        let Some(slot) = Self::slot(info, index) else {
            return;
        };
        if self.image_infos[slot].sampler != sampler {
            self.image_infos[slot].sampler = sampler;
            self.dirty = true;
        }
    }
}

/// 检查纹理能否发送给 `info`
pub fn validate_texture(info: &UniformInfo, texture: &dyn ShaderTexture) -> Result<(), BindingValidationError> {
    if let Some(expected) = info.texture_type
        && expected != texture.texture_type()
    {
        return Err(BindingValidationError::TextureTypeMismatch {
            uniform: info.name.clone(),
            expected: expected.name(),
            actual: texture.texture_type().name(),
        });
    }

    match info.base_type {
        UniformType::Sampler => {
            if info.data_base_type != texture.data_base_type() {
                return Err(BindingValidationError::DataBaseTypeMismatch {
                    uniform: info.name.clone(),
                });
            }
            if info.is_depth_sampler != texture.is_depth_sampler() {
                return Err(BindingValidationError::DepthSamplerMismatch {
                    uniform: info.name.clone(),
                    expected: info.is_depth_sampler,
                });
            }
            if !texture.is_readable() {
                return Err(BindingValidationError::NotReadable {
                    uniform: info.name.clone(),
                    resource: texture.debug_name().to_string(),
                });
            }
        }
        UniformType::StorageTexture => {
            if !texture.is_storage() {
                return Err(BindingValidationError::NotStorage {
                    uniform: info.name.clone(),
                    resource: texture.debug_name().to_string(),
                });
            }
        }
        _ => {}
    }
    Ok(())
}

/// 检查缓冲能否发送给 `info`
pub fn validate_buffer(info: &UniformInfo, buffer: &dyn ShaderBuffer) -> Result<(), BindingValidationError> {
    match info.base_type {
        UniformType::StorageBuffer => {
            if !buffer.usage().contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
                return Err(BindingValidationError::MissingUsage {
                    uniform: info.name.clone(),
                    resource: buffer.debug_name().to_string(),
                    usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                });
            }
        }
        UniformType::TexelBuffer => {
            if buffer.texel_view().is_none() {
                return Err(BindingValidationError::MissingTexelView {
                    uniform: info.name.clone(),
                    resource: buffer.debug_name().to_string(),
                });
            }
            if buffer.texel_data_base_type() != info.data_base_type {
                return Err(BindingValidationError::DataBaseTypeMismatch {
                    uniform: info.name.clone(),
                });
            }
        }
        _ => {}
    }
    Ok(())
}
