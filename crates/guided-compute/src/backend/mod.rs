//! Compute backends for the guided-filter pipelines.
//!
//! Provides a CPU (rayon) device and an optional wgpu device behind the
//! same object-safe `ComputeDevice` trait, with automatic selection.
//!
//! ```text
//! ComputeDevice
//!     +-- CpuDevice  (rayon, synchronous execution)
//!     +-- WgpuDevice (compute shaders, feature "wgpu")
//! ```

mod cpu;

#[cfg(feature = "wgpu")]
mod wgpu_device;

pub use cpu::CpuDevice;

#[cfg(feature = "wgpu")]
pub use wgpu_device::WgpuDevice;

use std::sync::Arc;

use guided_core::{FilterError, FilterResult};

/// Completion token for one enqueued operation.
///
/// Producers return it from `run`/`write`; consumers pass it in a
/// wait-list to express a cross-queue dependency edge. Tokens are
/// single-use per edge and never reused across runs.
pub type Event = u64;

/// Opaque handle to a device buffer. Buffers live as long as the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u64);

/// One positional kernel argument: buffers first, then scalars.
#[derive(Debug, Clone, Copy)]
pub enum Arg {
    Buf(BufferId),
    U32(u32),
    I32(i32),
    F32(f32),
}

/// The fixed compute-kernel set dispatched by the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Per-row inclusive prefix sum with pre-scale; emits group totals.
    InclusiveScan,
    /// Adds the scanned group totals back onto trailing scan groups.
    AddGroupSums,
    /// 4x4-block matrix transpose.
    Transpose,
    /// SAT corner differencing against a transposed table.
    BoxFilterSatTransposed,
    /// SAT corner differencing against a table in row order.
    BoxFilterSat,
    /// Direct windowed mean, no SAT.
    BoxFilter,
    /// Elementwise product.
    Mult,
    /// Elementwise integer power.
    Pown,
    /// Self-guided coefficients: a = var/(var+eps), b = (1-a)*mean_p.
    GfAb,
    /// Cross-guided variance/covariance from the four box means.
    GfVarIp,
    /// Cross-guided coefficients from var_I/cov_Ip.
    GfAbIp,
    /// Final blend q = mean_a*src + mean_b, optional zero-out.
    GfQ,
    SeparateRgbFloat,
    SeparateRgbUchar,
    CombineRgbFloat,
    CombineRgbUchar,
    DepthToFloat,
}

/// A recorded kernel launch: geometry plus the positional argument list
/// bound at stage `init`. Setters patch single `args` entries in place;
/// nothing else about the call ever changes after `init`.
#[derive(Debug, Clone)]
pub struct KernelCall {
    pub kernel: Kernel,
    /// Work-item grid, one entry per dimension.
    pub global: [u32; 2],
    /// Work-group shape; only the scan kernels derive semantics from it.
    pub local: [u32; 2],
    pub args: Vec<Arg>,
}

impl KernelCall {
    pub(crate) fn buf(&self, idx: usize) -> FilterResult<BufferId> {
        match self.args.get(idx) {
            Some(Arg::Buf(b)) => Ok(*b),
            _ => Err(FilterError::OperationFailed(format!(
                "{:?}: argument {idx} is not a buffer",
                self.kernel
            ))),
        }
    }

    pub(crate) fn u32(&self, idx: usize) -> FilterResult<u32> {
        match self.args.get(idx) {
            Some(Arg::U32(v)) => Ok(*v),
            _ => Err(FilterError::OperationFailed(format!(
                "{:?}: argument {idx} is not a u32",
                self.kernel
            ))),
        }
    }

    pub(crate) fn i32(&self, idx: usize) -> FilterResult<i32> {
        match self.args.get(idx) {
            Some(Arg::I32(v)) => Ok(*v),
            _ => Err(FilterError::OperationFailed(format!(
                "{:?}: argument {idx} is not an i32",
                self.kernel
            ))),
        }
    }

    pub(crate) fn f32(&self, idx: usize) -> FilterResult<f32> {
        match self.args.get(idx) {
            Some(Arg::F32(v)) => Ok(*v),
            _ => Err(FilterError::OperationFailed(format!(
                "{:?}: argument {idx} is not an f32",
                self.kernel
            ))),
        }
    }
}

/// Object-safe device boundary consumed by every pipeline stage.
///
/// Queues are logical indices; per-queue submission order is guaranteed,
/// cross-queue ordering only through wait-lists. `enqueue` and
/// `write_bytes` are non-blocking, `read_bytes` and `finish` block.
pub trait ComputeDevice: Send + Sync {
    fn name(&self) -> &'static str;

    /// Preferred work-group size multiple; drives scan/channel geometry.
    fn wg_multiple(&self) -> u32;

    /// Maximum work-items per group; validated against fixed 16x16 tiles.
    fn max_workgroup_size(&self) -> u32;

    fn alloc(&self, bytes: usize) -> FilterResult<BufferId>;

    fn write_bytes(&self, buf: BufferId, data: &[u8], wait: &[Event]) -> FilterResult<Event>;

    fn read_bytes(&self, buf: BufferId, out: &mut [u8], wait: &[Event]) -> FilterResult<()>;

    fn enqueue(&self, queue: usize, call: &KernelCall, wait: &[Event]) -> FilterResult<Event>;

    fn finish(&self, queue: usize) -> FilterResult<()>;
}

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (wgpu > CPU).
    #[default]
    Auto,
    /// CPU device using rayon for parallelization.
    Cpu,
    /// wgpu device (Vulkan/Metal/DX12).
    Wgpu,
}

impl Backend {
    /// Check if this backend is available on the current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto | Self::Cpu => true,
            #[cfg(feature = "wgpu")]
            Self::Wgpu => WgpuDevice::is_available(),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
        }
    }
}

/// Create a device for the requested backend.
pub fn create_device(backend: Backend) -> FilterResult<Arc<dyn ComputeDevice>> {
    match backend {
        Backend::Cpu => Ok(Arc::new(CpuDevice::new())),
        #[cfg(feature = "wgpu")]
        Backend::Wgpu => Ok(Arc::new(WgpuDevice::new()?)),
        #[cfg(not(feature = "wgpu"))]
        Backend::Wgpu => Err(FilterError::BackendNotAvailable(
            "wgpu support not compiled in (enable the \"wgpu\" feature)".into(),
        )),
        Backend::Auto => {
            #[cfg(feature = "wgpu")]
            if WgpuDevice::is_available() {
                return Ok(Arc::new(WgpuDevice::new()?));
            }
            Ok(Arc::new(CpuDevice::new()))
        }
    }
}

/// One-line description of each backend and its availability.
pub fn describe_backends() -> String {
    let mut out = String::new();
    for backend in [Backend::Cpu, Backend::Wgpu] {
        let status = if backend.is_available() {
            "available"
        } else {
            "unavailable"
        };
        out.push_str(&format!(
            "{}: {}\n",
            backend.name().to_uppercase(),
            status
        ));
    }
    out
}
