//! Prism shader 程序
//!
//! 把 GLSL 源码编译成 SPIR-V，反射出资源接口，给每个资源分配不冲突的 binding，
//! 并在每一帧维护 descriptor set，使渲染器可以直接绑定 shader 的资源。
//!
//! 数据流：
//! 源码 -> [`compiler`] -> SPIR-V -> [`reflection`]（借助 [`binding_allocator`]）
//! -> [`descriptor_table`] -> [`descriptor_pool`] -> [`pipeline_cache`]

pub mod binding_allocator;
pub mod compiler;
pub mod descriptor_pool;
pub mod descriptor_table;
pub mod error;
pub mod local_uniforms;
pub mod pipeline_cache;
pub mod program;
pub mod reflection;
pub mod render_context;
pub mod spirv;
pub mod stage;

#[cfg(test)]
mod test_utils;

pub use compiler::{CompileOptions, CompiledProgram, ShaderStageSource, compile_program};
pub use error::{AllocationError, BindingValidationError, CompileError, ShaderError};
pub use program::ShaderProgram;
pub use reflection::{BuiltinUniform, ProgramInterface, UniformId, UniformInfo, UniformType};
pub use render_context::{ProgramId, RenderContext};
pub use stage::{ShaderStageMask, ShaderStageType};
