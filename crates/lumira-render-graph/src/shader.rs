//! shader 编译
//!
//! 调用 glslc 把 GLSL 源码编译为 SPIR-V，按源文件 mtime 缓存编译产物。
//! 热重载只需要比较 mtime：源文件更新后重新编译即可。

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use anyhow::{bail, Context};
use ash::vk;

/// 根据扩展名推断 shader stage
pub fn stage_from_path(path: &Path) -> anyhow::Result<vk::ShaderStageFlags> {
    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
    Ok(match ext {
        "comp" => vk::ShaderStageFlags::COMPUTE,
        "vert" => vk::ShaderStageFlags::VERTEX,
        "frag" => vk::ShaderStageFlags::FRAGMENT,
        "rgen" => vk::ShaderStageFlags::RAYGEN_KHR,
        "rmiss" => vk::ShaderStageFlags::MISS_KHR,
        "rchit" => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        "rahit" => vk::ShaderStageFlags::ANY_HIT_KHR,
        "rint" => vk::ShaderStageFlags::INTERSECTION_KHR,
        "rcall" => vk::ShaderStageFlags::CALLABLE_KHR,
        other => bail!("cannot infer shader stage from extension `{other}` of {}", path.display()),
    })
}

/// 编译产物
pub struct CompiledShader {
    pub spv: Vec<u32>,
    pub stage: vk::ShaderStageFlags,
    /// 编译时源文件的 mtime，用于热重载的过期判断
    pub source_mtime: SystemTime,
}

/// glslc 编译器封装
pub struct ShaderCompiler {
    /// .spv 产物的缓存目录
    cache_dir: PathBuf,
    /// 传给 glslc 的 include 目录
    include_dir: Option<PathBuf>,
}

impl ShaderCompiler {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            include_dir: None,
        }
    }

    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dir = Some(dir.into());
        self
    }

    /// 编译一个源文件，产物比源文件新时直接读缓存
    pub fn compile(&self, src: &Path) -> anyhow::Result<CompiledShader> {
        let stage = stage_from_path(src)?;
        let src_mtime = std::fs::metadata(src)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("cannot stat shader source {}", src.display()))?;

        let spv_path = self.spv_path(src);
        let cached = std::fs::metadata(&spv_path)
            .and_then(|meta| meta.modified())
            .is_ok_and(|spv_mtime| spv_mtime >= src_mtime);

        if !cached {
            self.run_glslc(src, &spv_path)?;
        }

        let mut file = File::open(&spv_path).with_context(|| format!("cannot open {}", spv_path.display()))?;
        let spv = ash::util::read_spv(&mut file).with_context(|| format!("invalid SPIR-V in {}", spv_path.display()))?;

        Ok(CompiledShader {
            spv,
            stage,
            source_mtime: src_mtime,
        })
    }

    /// 源文件的 mtime，用于检查 pipeline 是否过期
    pub fn source_mtime(src: &Path) -> anyhow::Result<SystemTime> {
        std::fs::metadata(src)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("cannot stat shader source {}", src.display()))
    }

    fn spv_path(&self, src: &Path) -> PathBuf {
        let file_name = src.file_name().and_then(|name| name.to_str()).unwrap_or("shader");
        self.cache_dir.join(format!("{file_name}.spv"))
    }

    fn run_glslc(&self, src: &Path, out: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("cannot create shader cache dir {}", self.cache_dir.display()))?;

        let mut cmd = Command::new("glslc");
        if let Some(include_dir) = &self.include_dir {
            cmd.arg(format!("-I{}", include_dir.display()));
        }
        cmd.arg("-g")
            .arg("--target-env=vulkan1.2")
            .arg("--target-spv=spv1.4")
            .arg("-o")
            .arg(out)
            .arg(src);

        log::info!("compiling shader: {}", src.display());
        let output = cmd.output().context("failed to spawn glslc, is it on PATH?")?;
        if !output.status.success() {
            bail!(
                "glslc failed for {}:\n{}",
                src.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_path() {
        let cases = [
            ("shaders/sum.comp", vk::ShaderStageFlags::COMPUTE),
            ("pt.rgen", vk::ShaderStageFlags::RAYGEN_KHR),
            ("pt.rmiss", vk::ShaderStageFlags::MISS_KHR),
            ("pt.rchit", vk::ShaderStageFlags::CLOSEST_HIT_KHR),
            ("pt.rahit", vk::ShaderStageFlags::ANY_HIT_KHR),
            ("pt.rint", vk::ShaderStageFlags::INTERSECTION_KHR),
            ("pt.rcall", vk::ShaderStageFlags::CALLABLE_KHR),
            ("fullscreen.vert", vk::ShaderStageFlags::VERTEX),
            ("blit.frag", vk::ShaderStageFlags::FRAGMENT),
        ];
        for (path, expected) in cases {
            assert_eq!(stage_from_path(Path::new(path)).unwrap(), expected);
        }
    }

    #[test]
    fn test_stage_from_unknown_extension() {
        assert!(stage_from_path(Path::new("foo.hlsl")).is_err());
        assert!(stage_from_path(Path::new("no_extension")).is_err());
    }
}
