//! Guided-filter compute pipelines.
//!
//! Host-side orchestration for a data-parallel compute backend
//! implementing the Guided Image Filter and its supporting primitives
//! (per-row prefix scan, tiled transpose, summed-area-table box
//! filtering). Stages are wired together through shared device buffers
//! and re-run with mutated parameters without reallocating memory.
//!
//! # Architecture
//!
//! ```text
//! GuidedFilterRgb / GuidedFilterDepth
//!     └── GuidedFilter (self- or cross-guided)
//!             └── BoxFilterSat ── Sat ── Scan / Transpose
//!                     └── ComputeDevice
//!                             ├── CpuDevice (rayon)
//!                             └── WgpuDevice (compute shaders, feature "wgpu")
//! ```
//!
//! # Example
//!
//! ```ignore
//! use guided_compute::{Backend, GuidedFilter, GuidedKind, create_device};
//! use guided_core::Staging;
//!
//! let dev = create_device(Backend::Auto)?;
//! let mut gf = GuidedFilter::new(dev, GuidedKind::SelfGuided, [0, 1]);
//! gf.init(640, 480, 4, 0.01, false, 1e-4, 1.0, Staging::Io)?;
//! gf.write(guided_compute::GuidedMemory::DIn, Some(&frame), &[])?;
//! let done = gf.run(&[])?;
//! let out = gf.read(&[done])?;
//! ```

pub mod backend;
pub mod channels;
pub mod filters;
pub mod math;
pub mod pipelines;

mod stage;

pub use backend::{Backend, BufferId, ComputeDevice, Event, Kernel, KernelCall, create_device, describe_backends};
pub use channels::{CombineKind, CombineRgb, DepthToFloat, SeparateKind, SeparateRgb};
pub use filters::{BoxFilter, BoxFilterSat, GuidedFilter, GuidedKind, GuidedMemory, Sat, Scan, Transpose};
pub use guided_core::{FilterError, FilterResult, Staging};
pub use math::{Mult, Pown};
pub use pipelines::{GuidedFilterDepth, GuidedFilterRgb, RgbOutput};
