use std::collections::BTreeMap;

use super::{UniformInfo, UniformType};

/// [`ProgramInterface`] 中 uniform 的句柄
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformId(u32);
impl UniformId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// shader 声明的资源接口
///
/// 上层（shader 方言的前端）声明每个 uniform 的名字和形状，编译时反射结果会写回到这里。
/// 同一类资源按名字排序遍历，保证 slot 分配的顺序是确定的。
#[derive(Clone, Debug, Default)]
pub struct ProgramInterface {
    uniforms: Vec<UniformInfo>,
    by_name: BTreeMap<String, UniformId>,
    /// local uniform 的初始值，按 block 中的布局给出的原始字节
    initializers: BTreeMap<String, Vec<u8>>,
}
// new & init
impl ProgramInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明一个 uniform；同名的声明会被覆盖，句柄保持不变
    pub fn declare(&mut self, info: UniformInfo) -> UniformId {
        if let Some(&id) = self.by_name.get(&info.name) {
            self.uniforms[id.index()] = info;
            return id;
        }

        let id = UniformId(self.uniforms.len() as u32);
        self.by_name.insert(info.name.clone(), id);
        self.uniforms.push(info);
        id
    }

    pub fn set_initializer(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.initializers.insert(name.into(), bytes);
    }
}
// builder
impl ProgramInterface {
    pub fn with_uniform(mut self, info: UniformInfo) -> Self {
        self.declare(info);
        self
    }

    pub fn with_initializer(mut self, name: impl Into<String>, bytes: &[u8]) -> Self {
        self.set_initializer(name, bytes.to_vec());
        self
    }
}
// getters
impl ProgramInterface {
    #[inline]
    pub fn len(&self) -> usize {
        self.uniforms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
    }

    #[inline]
    pub fn find(&self, name: &str) -> Option<UniformId> {
        self.by_name.get(name).copied()
    }

    /// 句柄只在创建它的 interface 中有效
    #[inline]
    pub fn get(&self, id: UniformId) -> &UniformInfo {
        &self.uniforms[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: UniformId) -> &mut UniformInfo {
        &mut self.uniforms[id.index()]
    }

    #[inline]
    pub fn try_get(&self, id: UniformId) -> Option<&UniformInfo> {
        self.uniforms.get(id.index())
    }

    #[inline]
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.find(name).map(|id| self.get(id))
    }

    #[inline]
    pub fn initializer(&self, name: &str) -> Option<&[u8]> {
        self.initializers.get(name).map(Vec::as_slice)
    }

    /// 按名字顺序遍历所有 uniform
    pub fn iter(&self) -> impl Iterator<Item = (UniformId, &UniformInfo)> {
        self.by_name.values().map(|&id| (id, self.get(id)))
    }

    fn ids_where(&self, pred: impl Fn(&UniformInfo) -> bool) -> Vec<UniformId> {
        self.iter().filter(|(_, info)| pred(info)).map(|(id, _)| id).collect()
    }

    pub fn local_uniforms(&self) -> Vec<UniformId> {
        self.ids_where(|info| info.base_type.uses_local_data())
    }

    pub fn sampled_textures(&self) -> Vec<UniformId> {
        self.ids_where(|info| info.base_type == UniformType::Sampler)
    }

    pub fn storage_textures(&self) -> Vec<UniformId> {
        self.ids_where(|info| info.base_type == UniformType::StorageTexture)
    }

    pub fn texel_buffers(&self) -> Vec<UniformId> {
        self.ids_where(|info| info.base_type == UniformType::TexelBuffer)
    }

    pub fn storage_buffers(&self) -> Vec<UniformId> {
        self.ids_where(|info| info.base_type == UniformType::StorageBuffer)
    }

    /// 编译之后真正被 shader 使用的 uniform
    pub fn active(&self) -> impl Iterator<Item = (UniformId, &UniformInfo)> {
        self.iter().filter(|(_, info)| info.active)
    }
}
// tools
impl ProgramInterface {
    pub(crate) fn reset_reflection(&mut self) {
        self.uniforms.iter_mut().for_each(UniformInfo::reset_reflection);
    }

    /// 为活跃的纹理和缓冲分配程序内部资源数组的下标，返回 (纹理数量, 缓冲数量)
    pub(crate) fn assign_resource_indices(&mut self) -> (usize, usize) {
        let mut texture_count = 0;
        let mut buffer_count = 0;

        for id in self.by_name.values().copied().collect::<Vec<_>>() {
            let info = &mut self.uniforms[id.index()];
            info.resource_index = None;
            if !info.active {
                continue;
            }

            let counter = if info.base_type.is_texture() {
                &mut texture_count
            } else if info.base_type.is_buffer() {
                &mut buffer_count
            } else {
                continue;
            };
            info.resource_index = Some(*counter);
            *counter += info.count;
        }

        (texture_count, buffer_count)
    }
}
