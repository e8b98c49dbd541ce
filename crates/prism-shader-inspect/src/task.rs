//! 把目录下的 stage 文件按程序分组

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use prism_shader::ShaderStageType;

/// 一个程序：同一目录下同名、不同扩展名的 stage 文件，例如 `sprite.vert` + `sprite.frag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramTask {
    /// 相对于输入目录、去掉扩展名的路径，同时作为程序名
    pub name: String,
    pub stages: Vec<(ShaderStageType, PathBuf)>,
}
impl ProgramTask {
    /// 某个 stage 的输出路径：`<output>/<name>.<ext>.spv`
    pub fn output_path(&self, output_dir: &Path, stage: ShaderStageType) -> PathBuf {
        output_dir.join(format!("{}.{}.spv", self.name, stage.extension()))
    }
}

/// 不认识的扩展名直接忽略
pub fn group_tasks(input_dir: &Path, files: impl IntoIterator<Item = PathBuf>) -> Vec<ProgramTask> {
    let mut programs: BTreeMap<String, Vec<(ShaderStageType, PathBuf)>> = BTreeMap::new();
    for file in files {
        let Some(stage) = file.extension().and_then(|ext| ext.to_str()).and_then(ShaderStageType::from_extension)
        else {
            continue;
        };
        let Ok(relative) = file.strip_prefix(input_dir) else {
            continue;
        };
        let name = relative.with_extension("").to_string_lossy().replace('\\', "/");
        programs.entry(name).or_default().push((stage, file));
    }

    programs
        .into_iter()
        .map(|(name, stages)| ProgramTask {
            name,
            stages: stages.into_iter().sorted_by_key(|(stage, _)| *stage).collect(),
        })
        .collect()
}
