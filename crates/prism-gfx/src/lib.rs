//! Prism GFX 层
//!
//! shader 程序只通过 [`DeviceContext`] 和设备打交道：创建 shader module、descriptor、
//! pipeline，映射 uniform 数据，以及把 GPU 对象交给延迟销毁队列。
//! [`vulkan::AshDeviceContext`] 是基于 ash + vk-mem 的实现。

pub mod builtin_data;
pub mod cleanup;
pub mod debug;
pub mod device_context;
pub mod error;
pub mod frame_counter;
pub mod pipeline_config;
pub mod resource;
pub mod vulkan;

pub use builtin_data::BuiltinUniformData;
pub use cleanup::{CleanupQueue, GpuObject};
pub use device_context::{DeviceContext, LocalUniformMapping, ShaderStageModule};
pub use error::GfxError;
pub use frame_counter::{FrameCounter, FrameLabel};
pub use pipeline_config::GraphicsPipelineConfiguration;
pub use resource::{DataBaseType, ShaderBuffer, ShaderTexture, TextureType};
