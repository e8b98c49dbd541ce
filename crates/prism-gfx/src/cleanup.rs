use ash::vk;

use crate::frame_counter::FrameCounter;

/// 等待延迟销毁的 GPU 对象
///
/// shader 程序卸载时，已经提交但尚未执行完毕的 command buffer 可能仍然引用这些对象，
/// 因此不能立即销毁，而是交给设备在 in-flight 帧全部完成之后再销毁。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GpuObject {
    ShaderModule(vk::ShaderModule),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    DescriptorPool(vk::DescriptorPool),
}

/// 按帧序号延迟释放的队列
///
/// 在第 `n` 帧提交的对象，在第 `n + FIF` 帧开始时才会被释放，此时引用它的 command buffer 一定已经执行完毕。
pub struct CleanupQueue<T> {
    /// (对象, 提交时的帧序号)
    pending: Vec<(T, u64)>,
}
impl<T> Default for CleanupQueue<T> {
    fn default() -> Self {
        Self { pending: Vec::new() }
    }
}
// new & init
impl<T> CleanupQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }
}
// tools
impl<T> CleanupQueue<T> {
    #[inline]
    pub fn push(&mut self, frame_id: u64, object: T) {
        self.pending.push((object, frame_id));
    }

    pub fn extend(&mut self, frame_id: u64, objects: impl IntoIterator<Item = T>) {
        self.pending.extend(objects.into_iter().map(|object| (object, frame_id)));
    }

    /// 释放所有已经不再被 GPU 使用的对象，返回释放的个数
    pub fn retire(&mut self, current_frame_id: u64, mut destroy: impl FnMut(T)) -> usize {
        let fif = FrameCounter::fif_count() as u64;

        let (expired, alive): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|(_, frame_id)| *frame_id + fif <= current_frame_id);
        self.pending = alive;

        let count = expired.len();
        expired.into_iter().for_each(|(object, _)| destroy(object));
        count
    }

    /// 不再等待，立即释放全部对象。只应该在 device idle 之后调用
    pub fn flush(&mut self, mut destroy: impl FnMut(T)) {
        self.pending.drain(..).for_each(|(object, _)| destroy(object));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_retire_after_fif_frames() {
        let mut queue = CleanupQueue::new();
        queue.extend(
            10,
            [
                GpuObject::ShaderModule(vk::ShaderModule::from_raw(1)),
                GpuObject::Pipeline(vk::Pipeline::from_raw(2)),
            ],
        );
        queue.push(11, GpuObject::DescriptorPool(vk::DescriptorPool::from_raw(3)));

        let mut destroyed = vec![];
        // 第 12 帧时，第 10 帧提交的命令可能还在执行
        assert_eq!(queue.retire(12, |o| destroyed.push(o)), 0);
        assert_eq!(queue.retire(13, |o| destroyed.push(o)), 2);
        assert_eq!(
            destroyed,
            vec![
                GpuObject::ShaderModule(vk::ShaderModule::from_raw(1)),
                GpuObject::Pipeline(vk::Pipeline::from_raw(2)),
            ]
        );
        assert_eq!(queue.len(), 1);

        queue.flush(|o| destroyed.push(o));
        assert!(queue.is_empty());
        assert_eq!(destroyed.len(), 3);
    }
}
