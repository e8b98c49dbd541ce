//! 按 in-flight 帧轮换的 descriptor pool
//!
//! 每一帧有自己的一组 pool。回到某一帧时，这一帧上一轮提交的命令已经执行完毕，
//! 因此直接 reset 这一帧的全部 pool 即可复用，不需要逐个释放 descriptor set。

use ash::vk;
use prism_gfx::{DeviceContext, FrameCounter, GpuObject};

use crate::error::{AllocationError, ShaderError};

/// 每个 pool 可以分配的 descriptor set 数量
pub const DESCRIPTOR_POOL_MAX_SETS: u32 = 1000;

pub struct FrameDescriptorPools {
    /// 每一帧的 pool 列表
    frames: Vec<Vec<vk::DescriptorPool>>,
    current_frame: usize,
    /// 当前帧正在使用的 pool
    current_pool: usize,
    /// 已经乘上 [`DESCRIPTOR_POOL_MAX_SETS`] 的 pool 大小
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}
// new & init
impl FrameDescriptorPools {
    /// `set_sizes` 是单个 descriptor set 需要的各类 descriptor 数量
    pub fn new(set_sizes: &[vk::DescriptorPoolSize]) -> Self {
        let pool_sizes = set_sizes
            .iter()
            .map(|size| {
                vk::DescriptorPoolSize::default()
                    .ty(size.ty)
                    .descriptor_count(size.descriptor_count.saturating_mul(DESCRIPTOR_POOL_MAX_SETS))
            })
            .collect();

        Self {
            frames: vec![vec![]; FrameCounter::fif_count()],
            current_frame: 0,
            current_pool: 0,
            pool_sizes,
        }
    }
}
// getters
impl FrameDescriptorPools {
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// 当前帧已经创建的 pool 数量
    #[inline]
    pub fn pool_count(&self) -> usize {
        self.frames[self.current_frame].len()
    }

    #[inline]
    pub fn pool_sizes(&self) -> &[vk::DescriptorPoolSize] {
        &self.pool_sizes
    }
}
// update
impl FrameDescriptorPools {
    /// 切换到下一帧，并 reset 这一帧的全部 pool
    pub fn new_frame(&mut self, device: &dyn DeviceContext) -> Result<(), ShaderError> {
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        self.current_pool = 0;

        for &pool in &self.frames[self.current_frame] {
            device.reset_descriptor_pool(pool)?;
        }
        Ok(())
    }

    /// 从当前帧的 pool 中分配；pool 用尽时换到下一个 pool，必要时创建新的 pool
    pub fn allocate(
        &mut self,
        device: &dyn DeviceContext,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, ShaderError> {
        loop {
            let pools = &mut self.frames[self.current_frame];
            if self.current_pool >= pools.len() {
                let pool = device.create_descriptor_pool(DESCRIPTOR_POOL_MAX_SETS, &self.pool_sizes)?;
                log::debug!("create descriptor pool #{} for frame {}", pools.len(), self.current_frame);
                pools.push(pool);
            }

            match device.allocate_descriptor_set(pools[self.current_pool], layout) {
                Ok(set) => return Ok(set),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                    self.current_pool += 1;
                }
                Err(e) => return Err(AllocationError::DescriptorSet(e).into()),
            }
        }
    }

    /// 取出全部 pool 交给延迟销毁
    pub fn drain(&mut self) -> impl Iterator<Item = GpuObject> + '_ {
        self.current_pool = 0;
        self.frames.iter_mut().flat_map(|pools| pools.drain(..)).map(GpuObject::DescriptorPool)
    }
}
