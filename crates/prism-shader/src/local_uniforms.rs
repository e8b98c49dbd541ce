//! local uniform 数据
//!
//! 松散的标量、向量、矩阵 uniform 都存放在 local uniform block 中。
//! `staging` 是上层写入的数据，`live` 是每次 draw 时交给设备映射到 GPU 的数据，两者布局完全相同。

use prism_gfx::BuiltinUniformData;

#[derive(Clone, Debug)]
pub struct LocalUniformBuffer {
    /// local uniform block 的 binding
    location: u32,
    staging: Vec<u8>,
    live: Vec<u8>,
    /// [`BuiltinUniformData`] 在 block 中的偏移
    builtin_data_offset: Option<usize>,
}
// new & init
impl LocalUniformBuffer {
    pub fn new(location: u32, size: usize, builtin_data_offset: Option<usize>) -> Self {
        Self {
            location,
            staging: vec![0; size],
            live: vec![0; size],
            builtin_data_offset,
        }
    }
}
// getters
impl LocalUniformBuffer {
    #[inline]
    pub fn location(&self) -> u32 {
        self.location
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.staging.len()
    }

    #[inline]
    pub fn staging(&self) -> &[u8] {
        &self.staging
    }

    /// 返回 `[offset, offset + len)` 范围内可写的 staging 数据，越界部分被截掉
    pub fn staging_range_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        let (start, end) = self.clamp(offset, len);
        &mut self.staging[start..end]
    }

    #[inline]
    pub fn live(&self) -> &[u8] {
        &self.live
    }

    #[inline]
    pub fn builtin_data_offset(&self) -> Option<usize> {
        self.builtin_data_offset
    }
}
// update
impl LocalUniformBuffer {
    fn clamp(&self, offset: usize, len: usize) -> (usize, usize) {
        let start = offset.min(self.staging.len());
        (start, offset.saturating_add(len).min(self.staging.len()))
    }

    /// 把 staging 中的一段数据同步到 live
    pub fn commit(&mut self, offset: usize, len: usize) {
        let (start, end) = self.clamp(offset, len);
        self.live[start..end].copy_from_slice(&self.staging[start..end]);
    }

    pub fn commit_all(&mut self) {
        self.live.copy_from_slice(&self.staging);
    }

    /// 写入初始值，并立即同步到 live
    pub fn write_initializer(&mut self, offset: usize, size: usize, bytes: &[u8]) {
        let len = size.min(bytes.len());
        let dst = self.staging_range_mut(offset, len);
        let len = dst.len();
        dst.copy_from_slice(&bytes[..len]);
        self.commit(offset, len);
    }

    /// 每次 draw 之前把内置数据直接写入 live
    pub fn write_builtin_data(&mut self, data: &BuiltinUniformData) {
        let Some(offset) = self.builtin_data_offset else {
            return;
        };
        let (start, end) = self.clamp(offset, BuiltinUniformData::SIZE);
        self.live[start..end].copy_from_slice(&data.as_bytes()[..end - start]);
    }
}
