//! wgpu compute context for the guided-filter pipelines.
//!
//! Owns the adapter, device, queue, and the fixed table of compiled
//! compute pipelines; the orchestration layer drives it through
//! [`GpuContext::dispatch`]. Errors surface as `guided_core::FilterError`
//! so callers see one error type across backends.

mod context;
mod shaders;

pub use context::{GpuContext, PipelineKind};

// Callers hold raw buffers, so they need the same wgpu version.
pub use wgpu;

