//! binding / location 分配
//!
//! glslang 对每个 stage 独立地自动分配 binding 和 location，不同 stage、不同类型的资源之间会冲突。
//! 这里按名字为每个资源分配一段不重叠的 slot，并直接修改 SPIR-V 中对应的 decoration。

use std::{collections::BTreeMap, fmt::Display};

use crate::{
    error::{AllocationError, CompileError, ShaderError},
    spirv::{Decoration, SpirvModule},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DecorationKind {
    /// descriptor binding
    Binding,
    /// 输入输出变量的 location
    Location,
}
impl DecorationKind {
    #[inline]
    pub fn spirv_decoration(self) -> Decoration {
        match self {
            Self::Binding => Decoration::Binding,
            Self::Location => Decoration::Location,
        }
    }
}
impl Display for DecorationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binding => write!(f, "binding"),
            Self::Location => write!(f, "location"),
        }
    }
}

/// 一段连续的 slot：`[offset, offset + count)`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BindingRange {
    pub offset: u32,
    pub count: u32,
}
impl BindingRange {
    #[inline]
    pub fn new(offset: u32, count: u32) -> Self {
        Self { offset, count }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.count as u64
    }

    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        (self.offset as u64) < other.end() && (other.offset as u64) < self.end()
    }
}

/// 分配结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub slot: u32,
    /// SPIR-V 中原有的值是否需要改写
    pub needs_patch: bool,
}

pub struct BindingAllocator {
    kind: DecorationKind,
    /// slot 的上限（不含），向上查找空闲 slot 时不会越过它
    max_slots: u32,
    assignments: BTreeMap<String, BindingRange>,
}
// new & init
impl BindingAllocator {
    pub fn new(kind: DecorationKind, max_slots: u32) -> Self {
        Self {
            kind,
            max_slots,
            assignments: BTreeMap::new(),
        }
    }
}
// getters
impl BindingAllocator {
    #[inline]
    pub fn kind(&self) -> DecorationKind {
        self.kind
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<BindingRange> {
        self.assignments.get(name).copied()
    }

    pub fn assignments(&self) -> impl Iterator<Item = (&str, BindingRange)> {
        self.assignments.iter().map(|(name, range)| (name.as_str(), *range))
    }
}
// tools
impl BindingAllocator {
    pub fn is_free(&self, slot: u32, count: u32) -> bool {
        let range = BindingRange::new(slot, count.max(1));
        self.assignments.values().all(|r| !r.intersects(&range))
    }

    fn free_slot(&self, count: u32) -> Result<u32, AllocationError> {
        let count = count.max(1);
        (0..=self.max_slots.saturating_sub(count)).find(|&slot| self.is_free(slot, count)).ok_or(
            AllocationError::SlotsExhausted {
                kind: self.kind,
                count,
                limit: self.max_slots,
            },
        )
    }

    /// 不修改 SPIR-V 的分配逻辑
    ///
    /// - 已经分配过的名字：返回记录的 slot
    /// - 新名字且 `proposed` 空闲：保留 `proposed`
    /// - 新名字且 `proposed` 冲突：从 0 开始找第一段空闲的 slot
    pub fn resolve(&mut self, name: &str, count: u32, proposed: u32) -> Result<Resolution, AllocationError> {
        let count = count.max(1);

        if let Some(range) = self.assignments.get(name) {
            return Ok(Resolution {
                slot: range.offset,
                needs_patch: range.offset != proposed,
            });
        }

        let fits = proposed as u64 + count as u64 <= self.max_slots as u64;
        let slot = if fits && self.is_free(proposed, count) { proposed } else { self.free_slot(count)? };
        self.assignments.insert(name.to_string(), BindingRange::new(slot, count));

        Ok(Resolution {
            slot,
            needs_patch: slot != proposed,
        })
    }

    /// 为 `id` 对应的变量分配 slot，并把结果写回 SPIR-V
    pub fn assign(&mut self, module: &mut SpirvModule, name: &str, count: u32, id: u32) -> Result<u32, ShaderError> {
        let decoration = self.kind.spirv_decoration();
        let proposed = module.decoration(id, decoration).unwrap_or(0);
        let resolution = self.resolve(name, count, proposed)?;

        if resolution.needs_patch {
            module.set_decoration(id, decoration, resolution.slot).ok_or_else(|| CompileError::BindingOffsetNotFound {
                name: name.to_string(),
                kind: self.kind,
            })?;
            log::debug!("{} of '{}' moved from {} to {}", self.kind, name, proposed, resolution.slot);
        }

        Ok(resolution.slot)
    }
}
