//! GLSL -> SPIR-V 的编译、链接、接口映射与反射
//!
//! 这里不涉及设备：产出的 [`CompiledProgram`] 中 SPIR-V 已经按照分配结果修改好，
//! shader module 的创建由 [`crate::ShaderProgram`] 完成。

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{
    error::{CompileError, ShaderError},
    local_uniforms::LocalUniformBuffer,
    reflection::{
        BuiltinUniform, ProgramInterface, ReflectionBuilder, UniformId, VertexAttributeInfo, infer_interface,
    },
    spirv::SpirvModule,
    stage::ShaderStageType,
};

/// 一个 stage 的 GLSL 源码
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderStageSource {
    pub stage: ShaderStageType,
    pub source: String,
}
impl ShaderStageSource {
    pub fn new(stage: ShaderStageType, source: impl Into<String>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// 用于日志、错误信息以及 debug name
    pub program_name: String,
    /// 预处理宏：(名字, 值)
    pub defines: Vec<(String, Option<String>)>,
    /// 使用 SPIR-V 1.4，默认 1.0
    pub spirv_1_4: bool,
    pub max_binding_slots: u32,
    pub max_location_slots: u32,
}
impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            program_name: String::new(),
            defines: vec![],
            spirv_1_4: false,
            max_binding_slots: 1024,
            max_location_slots: 64,
        }
    }
}
// builder
impl CompileOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.defines.push((name.into(), value.map(str::to_string)));
        self
    }
}

/// 编译状态：任何一步失败都进入 `Failed`，不会重试
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompilePhase {
    Uncompiled,
    Parsed,
    Linked,
    Reflected,
    /// 每个 stage 的 shader module 已经创建
    Compiled,
    /// layout、pipeline、descriptor 全部就绪
    Ready,
    Failed,
}

/// 一个 stage 修改之后的 SPIR-V
#[derive(Clone, Debug)]
pub struct CompiledStage {
    pub stage: ShaderStageType,
    pub spirv: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct CompiledProgram {
    /// 按 stage 顺序排列
    pub stages: Vec<CompiledStage>,
    pub interface: ProgramInterface,
    pub local_uniforms: Option<LocalUniformBuffer>,
    pub builtins: [Option<UniformId>; BuiltinUniform::COUNT],
    pub attributes: BTreeMap<String, VertexAttributeInfo>,
}
// getters
impl CompiledProgram {
    #[inline]
    pub fn is_compute(&self) -> bool {
        self.stages.iter().any(|s| s.stage == ShaderStageType::Compute)
    }

    pub fn stage(&self, stage: ShaderStageType) -> Option<&CompiledStage> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    #[inline]
    pub fn builtin(&self, builtin: BuiltinUniform) -> Option<UniformId> {
        self.builtins[builtin.index()]
    }
}

/// 按 parse -> link -> reflect 的顺序推进编译状态
pub struct ProgramCompiler {
    options: CompileOptions,
    phase: CompilePhase,
    modules: Vec<(ShaderStageType, SpirvModule)>,
}
// new & init
impl ProgramCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            phase: CompilePhase::Uncompiled,
            modules: vec![],
        }
    }
}
// getters
impl ProgramCompiler {
    #[inline]
    pub fn phase(&self) -> CompilePhase {
        self.phase
    }
}
// update
impl ProgramCompiler {
    fn expect_phase(&self, expected: CompilePhase) -> Result<(), ShaderError> {
        if self.phase != expected {
            return Err(ShaderError::InvalidOperation(format!(
                "shader program '{}' is {:?}, expected {expected:?}",
                self.options.program_name, self.phase
            )));
        }
        Ok(())
    }

    fn advance<T>(&mut self, next: CompilePhase, result: Result<T, ShaderError>) -> Result<T, ShaderError> {
        match result {
            Ok(value) => {
                self.phase = next;
                Ok(value)
            }
            Err(e) => {
                self.phase = CompilePhase::Failed;
                self.modules.clear();
                log::error!("failed to compile shader program '{}': {e}", self.options.program_name);
                Err(e)
            }
        }
    }

    /// 用 glslang 把每个 stage 编译成 SPIR-V
    pub fn parse(&mut self, sources: &[ShaderStageSource]) -> Result<(), ShaderError> {
        self.expect_phase(CompilePhase::Uncompiled)?;
        let result = self.parse_sources(sources);
        self.advance(CompilePhase::Parsed, result)
    }

    fn parse_sources(&mut self, sources: &[ShaderStageSource]) -> Result<(), ShaderError> {
        let compiler = shaderc::Compiler::new().ok_or(CompileError::CompilerUnavailable)?;
        let mut options = shaderc::CompileOptions::new().ok_or(CompileError::CompilerUnavailable)?;
        options.set_source_language(shaderc::SourceLanguage::GLSL);
        options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_2 as u32);
        options.set_target_spirv(if self.options.spirv_1_4 {
            shaderc::SpirvVersion::V1_4
        } else {
            shaderc::SpirvVersion::V1_0
        });
        options.set_auto_map_locations(true);
        options.set_auto_bind_uniforms(true);
        options.set_suppress_warnings();
        for (name, value) in &self.options.defines {
            options.add_macro_definition(name, value.as_deref());
        }

        for source in sources {
            let stage = source.stage;
            let file_name = format!("{}.{}", self.options.program_name, stage.extension());
            let artifact = compiler
                .compile_into_spirv(&source.source, stage.shaderc_kind(), &file_name, "main", Some(&options))
                .map_err(|e| match e {
                    shaderc::Error::CompilationError(_, log) => CompileError::Parse { stage, log },
                    e => CompileError::Parse {
                        stage,
                        log: e.to_string(),
                    },
                })?;

            let module = SpirvModule::parse(artifact.as_binary().to_vec())
                .map_err(|source| CompileError::InvalidSpirv { stage, source })?;
            self.modules.push((stage, module));
        }

        self.modules.sort_by_key(|(stage, _)| *stage);
        Ok(())
    }

    /// 检查 stage 组合以及 stage 之间共享的接口是否一致
    pub fn link(&mut self) -> Result<(), ShaderError> {
        self.expect_phase(CompilePhase::Parsed)?;
        let result = self.check_link();
        self.advance(CompilePhase::Linked, result)
    }

    fn check_link(&self) -> Result<(), ShaderError> {
        let link_error = |msg: String| -> ShaderError { CompileError::Link(msg).into() };

        if self.modules.is_empty() {
            return Err(link_error("shader program has no stages".to_string()));
        }
        // modules 已经按 stage 排序
        if let Some((stage, _)) = self.modules.iter().map(|(stage, _)| *stage).tuple_windows().find(|(a, b)| a == b) {
            return Err(link_error(format!("duplicate {stage} stage")));
        }
        let has_compute = self.modules.iter().any(|(stage, _)| *stage == ShaderStageType::Compute);
        if has_compute && self.modules.len() > 1 {
            return Err(link_error("compute shader cannot be combined with vertex or pixel stages".to_string()));
        }

        for (stage, module) in &self.modules {
            let entry_points = module.entry_points();
            if entry_points.len() != 1 || entry_points[0].execution_model != stage.execution_model() {
                return Err(link_error(format!("{stage} shader must have exactly one {stage} entry point")));
            }
        }

        // local uniform block 在不同 stage 中的布局必须一致
        let layouts = self
            .modules
            .iter()
            .filter_map(|(stage, module)| Some((stage, local_block_layout(module)?)))
            .collect_vec();
        if let Some(((first_stage, _), (stage, _))) = layouts.iter().tuple_windows().find(|((_, a), (_, b))| a != b) {
            return Err(link_error(format!(
                "uniform block DefaultUniformBlock differs between {first_stage} and {stage} shaders"
            )));
        }

        // 同名的 varying 形状必须一致
        if let (Some(vertex), Some(pixel)) =
            (self.module(ShaderStageType::Vertex), self.module(ShaderStageType::Pixel))
        {
            let outputs = varying_shapes(vertex, false);
            for (name, count) in varying_shapes(pixel, true) {
                if let Some(&vertex_count) = outputs.get(&name)
                    && vertex_count != count
                {
                    return Err(link_error(format!(
                        "varying '{name}' uses {vertex_count} locations in vertex shader but {count} in pixel shader"
                    )));
                }
            }
        }

        Ok(())
    }

    fn module(&self, stage: ShaderStageType) -> Option<&SpirvModule> {
        self.modules.iter().find(|(s, _)| *s == stage).map(|(_, m)| m)
    }

    /// 每个 pixel 输入都必须由 vertex 输出提供
    fn map_io(&self) -> Result<(), ShaderError> {
        let (Some(vertex), Some(pixel)) = (self.module(ShaderStageType::Vertex), self.module(ShaderStageType::Pixel))
        else {
            return Ok(());
        };

        let outputs = varying_shapes(vertex, false);
        if let Some(name) = varying_shapes(pixel, true).into_keys().find(|name| !outputs.contains_key(name)) {
            return Err(CompileError::InterfaceMapping(format!(
                "pixel shader input '{name}' is not written by the vertex shader"
            ))
            .into());
        }
        Ok(())
    }

    /// 接口映射、反射以及 binding 分配。`interface` 为 None 时从 SPIR-V 推导
    pub fn reflect(&mut self, interface: Option<ProgramInterface>) -> Result<CompiledProgram, ShaderError> {
        self.expect_phase(CompilePhase::Linked)?;
        let result = self.map_io().and_then(|_| self.reflect_modules(interface));
        self.advance(CompilePhase::Reflected, result)
    }

    fn reflect_modules(&mut self, interface: Option<ProgramInterface>) -> Result<CompiledProgram, ShaderError> {
        let interface = interface.unwrap_or_else(|| infer_interface(self.modules.iter().map(|(_, m)| m)));
        let mut builder =
            ReflectionBuilder::new(interface, self.options.max_binding_slots, self.options.max_location_slots);
        for (stage, module) in &mut self.modules {
            builder.reflect_stage(*stage, module)?;
        }
        for (name, range) in builder.bindings().assignments() {
            log::debug!("'{}': binding {} x{}", name, range.offset, range.count);
        }
        let output = builder.finish();

        let mut local_uniforms = output
            .local_block
            .map(|layout| LocalUniformBuffer::new(layout.location, layout.size, output.builtin_data_offset));
        if let Some(local) = &mut local_uniforms {
            for id in output.interface.local_uniforms() {
                let info = output.interface.get(id);
                if let (true, Some(offset), Some(bytes)) =
                    (info.active, info.data_offset, output.interface.initializer(&info.name))
                {
                    local.write_initializer(offset, info.data_size, bytes);
                }
            }
        }

        let stages = std::mem::take(&mut self.modules)
            .into_iter()
            .map(|(stage, module)| CompiledStage {
                stage,
                spirv: module.into_words(),
            })
            .collect_vec();

        log::info!(
            "shader program '{}' reflected: stages [{}], {} active uniforms",
            self.options.program_name,
            stages.iter().map(|s| s.stage.name()).join(", "),
            output.interface.active().count()
        );

        Ok(CompiledProgram {
            stages,
            interface: output.interface,
            local_uniforms,
            builtins: output.builtins,
            attributes: output.attributes,
        })
    }
}

fn local_block_layout(module: &SpirvModule) -> Option<Vec<(String, usize, usize)>> {
    let resources = module.shader_resources();
    let block = resources.uniform_buffers.iter().find(|r| crate::reflection::is_local_block(module, r))?;
    Some(module.flatten_block_members(block.base_type_id).into_iter().map(|m| (m.name, m.offset, m.size)).collect())
}

/// varying 名字 -> 占用的 location 数量
fn varying_shapes(module: &SpirvModule, inputs: bool) -> BTreeMap<String, u32> {
    let resources = module.shader_resources();
    let varyings = if inputs { resources.stage_inputs } else { resources.stage_outputs };
    varyings.into_iter().map(|r| (r.name, module.location_count(r.type_id))).collect()
}

/// 完整的设备无关编译流程：parse -> link -> 接口映射 -> 反射与 binding 分配
pub fn compile_program(
    sources: &[ShaderStageSource],
    interface: Option<ProgramInterface>,
    options: &CompileOptions,
) -> Result<CompiledProgram, ShaderError> {
    let mut compiler = ProgramCompiler::new(options.clone());
    compiler.parse(sources)?;
    compiler.link()?;
    compiler.reflect(interface)
}
