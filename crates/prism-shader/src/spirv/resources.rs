use super::{Decoration, Dim, SpirvModule, SpirvType, StorageClass, Variable};

/// 一个 shader 资源：全局变量及其类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    /// 变量 id
    pub id: u32,
    /// 变量指向的类型
    pub type_id: u32,
    /// 去掉数组维度之后的类型
    pub base_type_id: u32,
    /// block 使用 block 类型名，其他资源使用变量名
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct ShaderResources {
    pub uniform_buffers: Vec<Resource>,
    pub storage_buffers: Vec<Resource>,
    pub sampled_images: Vec<Resource>,
    pub storage_images: Vec<Resource>,
    pub stage_inputs: Vec<Resource>,
    pub stage_outputs: Vec<Resource>,
}

/// image 类型的形状信息
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageShape {
    pub sampled_type: u32,
    pub dim: Dim,
    pub depth: bool,
    pub arrayed: bool,
}

impl SpirvModule {
    pub fn shader_resources(&self) -> ShaderResources {
        let mut resources = ShaderResources::default();

        for var in self.variables() {
            let base_type_id = self.strip_arrays(var.pointee_type);
            let resource = |name: String| Resource {
                id: var.id,
                type_id: var.pointee_type,
                base_type_id,
                name,
            };

            match (var.storage_class, self.ty(base_type_id)) {
                (StorageClass::Uniform | StorageClass::StorageBuffer, Some(SpirvType::Struct { .. })) => {
                    let name = self.name(base_type_id).or(self.name(var.id)).map(str::to_string);
                    let resource = resource(name.unwrap_or_else(|| format!("_{}", var.id)));
                    if var.storage_class == StorageClass::StorageBuffer
                        || self.has_decoration(base_type_id, Decoration::BufferBlock)
                    {
                        resources.storage_buffers.push(resource);
                    } else if self.has_decoration(base_type_id, Decoration::Block) {
                        resources.uniform_buffers.push(resource);
                    }
                }
                (StorageClass::UniformConstant, Some(SpirvType::SampledImage { .. })) => {
                    resources.sampled_images.push(resource(self.variable_name(var)));
                }
                (StorageClass::UniformConstant, Some(SpirvType::Image { sampled: 2, .. })) => {
                    resources.storage_images.push(resource(self.variable_name(var)));
                }
                (StorageClass::Input, _) if !self.is_builtin_variable(var) => {
                    resources.stage_inputs.push(resource(self.variable_name(var)));
                }
                (StorageClass::Output, _) if !self.is_builtin_variable(var) => {
                    resources.stage_outputs.push(resource(self.variable_name(var)));
                }
                _ => {}
            }
        }

        resources
    }

    fn variable_name(&self, var: &Variable) -> String {
        self.name(var.id).map(str::to_string).unwrap_or_else(|| format!("_{}", var.id))
    }

    /// `gl_Position` 这类变量，或者 `gl_PerVertex` 这类成员带有 BuiltIn 的 block
    pub fn is_builtin_variable(&self, var: &Variable) -> bool {
        if self.has_decoration(var.id, Decoration::BuiltIn) {
            return true;
        }
        let base = self.strip_arrays(var.pointee_type);
        match self.ty(base) {
            Some(SpirvType::Struct { members }) => {
                (0..members.len() as u32).any(|i| self.has_member_decoration(base, i, Decoration::BuiltIn))
            }
            _ => false,
        }
    }

    /// 对 sampled image 会先取出其中的 image 类型
    pub fn image_shape(&self, type_id: u32) -> Option<ImageShape> {
        match self.ty(self.strip_arrays(type_id))? {
            SpirvType::SampledImage { image } => self.image_shape(*image),
            SpirvType::Image {
                sampled_type,
                dim,
                depth,
                arrayed,
                ..
            } => Some(ImageShape {
                sampled_type: *sampled_type,
                dim: *dim,
                depth: *depth == 1,
                arrayed: *arrayed,
            }),
            _ => None,
        }
    }
}
