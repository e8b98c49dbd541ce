use ash::vk;

/// GFX 层的错误：Vulkan 调用失败，或者设备无法满足请求
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("vulkan call `{op}` failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },

    #[error("memory allocation failed for {what}: {result}")]
    OutOfMemory { what: String, result: vk::Result },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl GfxError {
    #[inline]
    pub fn vulkan(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { op, result }
    }

    /// 对应的 `vk::Result`，如果有的话
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::Vulkan { result, .. } | Self::OutOfMemory { result, .. } => Some(*result),
            Self::InvalidArgument(_) => None,
        }
    }
}
