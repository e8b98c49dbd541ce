//! 基于 ash + vk-mem 的 [`DeviceContext`](crate::DeviceContext) 实现

mod device_context;
mod pipeline;
mod stream_buffer;

pub use device_context::{AshDeviceContext, AshDeviceContextCreateInfo, DefaultResources};
pub use stream_buffer::UniformStreamBuffer;
