//! Reference-counted lazy GPU program build.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use super::GpuDevice;

/// Where a program's source comes from.
#[derive(Clone, Debug)]
pub enum ProgramSource {
    /// WGSL source embedded in the binary
    Embedded(&'static str),
    /// WGSL source loaded from a file at build time
    File(PathBuf),
}

#[derive(Default)]
struct ProgramState {
    refs: u32,
    pipeline: Option<Arc<wgpu::ComputePipeline>>,
}

/// Reference-counted wrapper around a lazily built compute pipeline.
///
/// The pipeline is built on the first successful [`add_reference`] and
/// torn down when the count returns to zero. On build failure the state
/// resets and the count stays at zero, so a later attempt retries the
/// build. Concurrent callers observe either "built" or "build failed"
/// atomically.
///
/// [`add_reference`]: GpuProgramRef::add_reference
pub struct GpuProgramRef {
    name: String,
    source: ProgramSource,
    state: Mutex<ProgramState>,
}

impl GpuProgramRef {
    /// Create an unbuilt program reference.
    pub fn new(name: &str, source: ProgramSource) -> Self {
        Self {
            name: name.to_string(),
            source,
            state: Mutex::new(ProgramState::default()),
        }
    }

    /// Program name used for pipeline labels and diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire a reference, building the pipeline on first use.
    ///
    /// Returns false when the build fails; no reference is retained.
    pub fn add_reference(&self, gpu: &GpuDevice) -> bool {
        let mut state = self.state.lock();
        if state.refs == 0 {
            match self.build(gpu) {
                Some(pipeline) => state.pipeline = Some(pipeline),
                None => {
                    state.pipeline = None;
                    return false;
                }
            }
        }
        state.refs += 1;
        true
    }

    /// Release a reference, tearing the pipeline down at zero.
    pub fn release_reference(&self) {
        let mut state = self.state.lock();
        if state.refs > 0 {
            state.refs -= 1;
            if state.refs == 0 {
                state.pipeline = None;
            }
        }
    }

    /// True while at least one reference holds a built pipeline
    pub fn is_valid(&self) -> bool {
        let state = self.state.lock();
        state.refs > 0 && state.pipeline.is_some()
    }

    /// The built pipeline, when valid
    pub fn pipeline(&self) -> Option<Arc<wgpu::ComputePipeline>> {
        self.state.lock().pipeline.clone()
    }

    fn build(&self, gpu: &GpuDevice) -> Option<Arc<wgpu::ComputePipeline>> {
        let source: Cow<'static, str> = match &self.source {
            ProgramSource::Embedded(src) => Cow::Borrowed(src),
            ProgramSource::File(path) => match std::fs::read_to_string(path) {
                Ok(src) => Cow::Owned(src),
                Err(err) => {
                    warn!("gpu program '{}': cannot read {:?}: {}", self.name, path, err);
                    return None;
                }
            },
        };

        // Shader compilation reports through the validation error scope;
        // without it an invalid module aborts the process.
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&self.name),
                source: wgpu::ShaderSource::Wgsl(source),
            });
        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&self.name),
                layout: None,
                module: &module,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            warn!("gpu program '{}' build failed: {}", self.name, err);
            return None;
        }
        Some(Arc::new(pipeline))
    }
}

impl std::fmt::Debug for GpuProgramRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GpuProgramRef")
            .field("name", &self.name)
            .field("refs", &state.refs)
            .field("built", &state.pipeline.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::gpu_device;

    const TRIVIAL_KERNEL: &str = r#"
@compute @workgroup_size(1)
fn main() {}
"#;

    #[test]
    fn test_reference_lifecycle() {
        // Requires a usable adapter; a machine without one still exercises
        // the unbuilt state.
        let program = GpuProgramRef::new("trivial", ProgramSource::Embedded(TRIVIAL_KERNEL));
        assert!(!program.is_valid());
        assert!(program.pipeline().is_none());

        let Some(gpu) = gpu_device() else {
            return;
        };
        assert!(program.add_reference(&gpu));
        assert!(program.is_valid());
        assert!(program.add_reference(&gpu));
        program.release_reference();
        assert!(program.is_valid());
        program.release_reference();
        assert!(!program.is_valid());
        assert!(program.pipeline().is_none());
    }

    #[test]
    fn test_build_failure_resets_state() {
        let Some(gpu) = gpu_device() else {
            return;
        };
        let program = GpuProgramRef::new("broken", ProgramSource::Embedded("not wgsl"));
        assert!(!program.add_reference(&gpu));
        assert!(!program.is_valid());
        // Missing file behaves the same.
        let program = GpuProgramRef::new(
            "missing",
            ProgramSource::File(PathBuf::from("/nonexistent/kernel.wgsl")),
        );
        assert!(!program.add_reference(&gpu));
        assert!(!program.is_valid());
    }
}
