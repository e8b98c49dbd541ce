use rustc_hash::{FxHashMap, FxHashSet};
use spirq::{ReflectConfig, var::Variable};

use super::{Decoration, SpirvError, SpirvModule, StorageClass};

impl SpirvModule {
    /// entry point 实际访问到的 descriptor 变量 id
    ///
    /// spirq 只按 `(set, binding)` 报告资源，而 glslang 的输出中不同资源可能共用同一个 binding，
    /// 所以先在二进制的副本上把所有资源放到 set 0，并给每个资源一个唯一的 binding，再把结果映射回变量 id。
    /// 没有 binding decoration 的变量无法区分，只要 `(0, 0)` 被访问就都算作使用。
    pub fn active_resource_ids(&self) -> Result<FxHashSet<u32>, SpirvError> {
        let mut words = self.words().to_vec();
        let mut by_binding: FxHashMap<(u32, u32), Vec<u32>> = FxHashMap::default();

        let resources = self.variables().iter().filter(|var| {
            matches!(
                var.storage_class,
                StorageClass::UniformConstant | StorageClass::Uniform | StorageClass::StorageBuffer
            )
        });
        for (slot, var) in resources.enumerate() {
            if let Some(offset) = self.decoration_word_offset(var.id, Decoration::DescriptorSet) {
                words[offset] = 0;
            }
            let binding = match self.decoration_word_offset(var.id, Decoration::Binding) {
                Some(offset) => {
                    words[offset] = slot as u32 + 1;
                    slot as u32 + 1
                }
                None => 0,
            };
            by_binding.entry((0, binding)).or_default().push(var.id);
        }

        let entry_points = ReflectConfig::new()
            .spv(&words[..])
            .ref_all_rscs(false)
            .reflect()
            .map_err(|e| SpirvError::Reflect(format!("{e:?}")))?;

        let mut active = FxHashSet::default();
        for var in entry_points.iter().flat_map(|entry_point| entry_point.vars.iter()) {
            if let Variable::Descriptor { desc_bind, .. } = var
                && let Some(ids) = by_binding.get(&(desc_bind.set(), desc_bind.bind()))
            {
                active.extend(ids.iter().copied());
            }
        }
        Ok(active)
    }
}
