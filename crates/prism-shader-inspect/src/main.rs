//! Shader 检查工具
//!
//! 不创建设备，把输入目录下的 GLSL 按程序编译、链接、反射，
//! 输出分配好 binding 之后的 SPIR-V，并在日志中打印反射结果。
//!
//! 用法：`prism-shader-inspect [输入目录] [输出目录]`，
//! 也可以通过 `SHADER_SRC` / `SHADER_OUT` 环境变量指定。

mod task;

use std::path::{Path, PathBuf};

use anyhow::Context;
use itertools::Itertools;
use prism_crate_tools::init_log::init_log;
use prism_shader::{CompileOptions, CompiledProgram, ShaderStageSource, compile_program};
use rayon::prelude::*;
use task::{ProgramTask, group_tasks};

fn dir_arg(args: &mut impl Iterator<Item = String>, env: &str, default: &str) -> PathBuf {
    let positional = args.next();
    std::env::var(env).ok().or(positional).unwrap_or_else(|| default.to_string()).into()
}

fn log_reflection(program: &CompiledProgram, name: &str) {
    for (_, info) in program.interface.iter() {
        log::info!(
            "[{name}] {:<24} {:?} x{} binding {:?}{}",
            info.name,
            info.base_type,
            info.count,
            info.location,
            if info.active { "" } else { " (unused)" }
        );
    }
    if let Some(local) = &program.local_uniforms {
        log::info!("[{name}] local uniform block: binding {}, {} bytes", local.location(), local.size());
    }
    for (attr, info) in &program.attributes {
        log::info!("[{name}] attribute {attr}: location {}", info.index);
    }
}

fn inspect(task: &ProgramTask, output_dir: &Path) -> anyhow::Result<()> {
    let _span = tracy_client::span!("inspect program");

    let sources: Vec<ShaderStageSource> = task
        .stages
        .iter()
        .map(|(stage, path)| {
            let source = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            Ok(ShaderStageSource::new(*stage, source))
        })
        .collect::<anyhow::Result<_>>()?;

    let options = CompileOptions::default().with_name(task.name.clone());
    let program = compile_program(&sources, None, &options).with_context(|| format!("program '{}'", task.name))?;
    log_reflection(&program, &task.name);

    for stage in &program.stages {
        let output_path = task.output_path(output_dir, stage.stage);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&output_path, bytemuck::cast_slice::<u32, u8>(&stage.spirv))
            .with_context(|| format!("failed to write {}", output_path.display()))?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_log();
    tracy_client::Client::start();

    let mut args = std::env::args().skip(1);
    let input_dir = dir_arg(&mut args, "SHADER_SRC", "shader");
    let output_dir = dir_arg(&mut args, "SHADER_OUT", "shader/.build");
    log::info!("Shader source path: {:?}", input_dir);
    log::info!("Shader output path: {:?}", output_dir);

    let files = walkdir::WalkDir::new(&input_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(walkdir::DirEntry::into_path);
    let tasks = group_tasks(&input_dir, files);

    let failed = tasks
        .par_iter()
        .filter_map(|task| {
            log::info!("Inspecting shader program: {}", task.name);
            inspect(task, &output_dir).err().map(|e| (task.name.as_str(), e))
        })
        .collect::<Vec<_>>();

    for (name, e) in &failed {
        log::error!("{name}: {e:#}");
    }
    if !failed.is_empty() {
        anyhow::bail!(
            "{} of {} shader programs failed: {}",
            failed.len(),
            tasks.len(),
            failed.iter().map(|(name, _)| name).join(", ")
        );
    }

    log::info!("{} shader programs inspected.", tasks.len());
    Ok(())
}
