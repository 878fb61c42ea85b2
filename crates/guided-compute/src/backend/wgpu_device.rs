//! wgpu device adapter.
//!
//! Folds the logical queues onto the single wgpu queue; submission order
//! subsumes both same-queue ordering and cross-queue wait-lists, so
//! events reduce to tickets and `read_bytes` blocks on the device.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use guided_core::{FilterError, FilterResult};
use guided_gpu::{GpuContext, PipelineKind, wgpu};

use super::{Arg, BufferId, ComputeDevice, Event, Kernel, KernelCall};

const TILE: u32 = 16;
const EW_GROUP: u32 = 64;

pub struct WgpuDevice {
    ctx: GpuContext,
    buffers: Mutex<Vec<wgpu::Buffer>>,
    ticket: AtomicU64,
}

impl WgpuDevice {
    pub fn is_available() -> bool {
        GpuContext::is_available()
    }

    pub fn new() -> FilterResult<Self> {
        Ok(Self {
            ctx: GpuContext::new()?,
            buffers: Mutex::new(Vec::new()),
            ticket: AtomicU64::new(1),
        })
    }

    fn next_event(&self) -> Event {
        self.ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> FilterResult<std::sync::MutexGuard<'_, Vec<wgpu::Buffer>>> {
        self.buffers
            .lock()
            .map_err(|_| FilterError::OperationFailed("buffer table lock poisoned".into()))
    }
}

impl ComputeDevice for WgpuDevice {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn wg_multiple(&self) -> u32 {
        // Matches the @workgroup_size in the shader sources.
        64
    }

    fn max_workgroup_size(&self) -> u32 {
        self.ctx.max_workgroup_size()
    }

    fn alloc(&self, bytes: usize) -> FilterResult<BufferId> {
        let mut bufs = self.lock()?;
        bufs.push(self.ctx.create_buffer(bytes as u64));
        Ok(BufferId(bufs.len() as u64 - 1))
    }

    fn write_bytes(&self, buf: BufferId, data: &[u8], _wait: &[Event]) -> FilterResult<Event> {
        let bufs = self.lock()?;
        let buf = bufs
            .get(buf.0 as usize)
            .ok_or(FilterError::UnknownBuffer)?;
        self.ctx.upload(buf, data);
        Ok(self.next_event())
    }

    fn read_bytes(&self, buf: BufferId, out: &mut [u8], _wait: &[Event]) -> FilterResult<()> {
        let bufs = self.lock()?;
        let buf = bufs
            .get(buf.0 as usize)
            .ok_or(FilterError::UnknownBuffer)?;
        self.ctx.download(buf, out)
    }

    fn enqueue(&self, _queue: usize, call: &KernelCall, _wait: &[Event]) -> FilterResult<Event> {
        let (kind, params, groups) = plan(call)?;
        let bufs = self.lock()?;
        let mut bound = Vec::new();
        for arg in &call.args {
            if let Arg::Buf(id) = arg {
                bound.push(
                    bufs.get(id.0 as usize)
                        .ok_or(FilterError::UnknownBuffer)?,
                );
            }
        }
        self.ctx.dispatch(kind, params, &bound, groups);
        Ok(self.next_event())
    }

    fn finish(&self, _queue: usize) -> FilterResult<()> {
        self.ctx.wait();
        Ok(())
    }
}

/// Maps a recorded launch onto a pipeline, its uniform words, and the
/// dispatch grid. Scalar args travel bit-exact in the uniform block.
fn plan(call: &KernelCall) -> FilterResult<(PipelineKind, [u32; 8], [u32; 3])> {
    let mut p = [0u32; 8];
    let [gx, gy] = call.global;

    let (kind, groups) = match call.kernel {
        Kernel::InclusiveScan => {
            p[0] = call.u32(3)?;
            p[1] = gx / call.local[0];
            p[2] = call.f32(4)?.to_bits();
            (PipelineKind::InclusiveScan, [gx / call.local[0], gy, 1])
        }
        Kernel::AddGroupSums => {
            p[0] = call.u32(2)?;
            (PipelineKind::AddGroupSums, [gx / call.local[0], gy, 1])
        }
        Kernel::Transpose => {
            p[0] = gx;
            p[1] = gy;
            (
                PipelineKind::Transpose,
                [gx.div_ceil(TILE), gy.div_ceil(TILE), 1],
            )
        }
        Kernel::BoxFilterSatTransposed | Kernel::BoxFilterSat => {
            p[0] = gx;
            p[1] = gy;
            p[2] = call.i32(2)? as u32;
            p[3] = call.f32(3)?.to_bits();
            p[4] = (call.kernel == Kernel::BoxFilterSatTransposed) as u32;
            (
                PipelineKind::BoxFilterSat,
                [gx.div_ceil(TILE), gy.div_ceil(TILE), 1],
            )
        }
        Kernel::BoxFilter => {
            p[0] = gx;
            p[1] = gy;
            p[2] = call.i32(2)? as u32;
            (
                PipelineKind::BoxFilter,
                [gx.div_ceil(TILE), gy.div_ceil(TILE), 1],
            )
        }
        Kernel::Mult => {
            p[0] = gx;
            (PipelineKind::Mult, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::Pown => {
            p[0] = gx;
            p[1] = call.i32(2)? as u32;
            (PipelineKind::Pown, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::GfAb => {
            p[0] = gx;
            p[1] = call.f32(4)?.to_bits();
            (PipelineKind::GfAb, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::GfVarIp => {
            p[0] = gx;
            (PipelineKind::GfVarIp, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::GfAbIp => {
            p[0] = gx;
            p[1] = call.f32(6)?.to_bits();
            (PipelineKind::GfAbIp, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::GfQ => {
            p[0] = gx;
            p[1] = call.i32(4)? as u32;
            p[2] = call.f32(5)?.to_bits();
            (PipelineKind::GfQ, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::SeparateRgbFloat => {
            p[0] = gx;
            (PipelineKind::SeparateRgbFloat, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::SeparateRgbUchar => {
            p[0] = gx;
            (PipelineKind::SeparateRgbUchar, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::CombineRgbFloat => {
            p[0] = gx;
            (PipelineKind::CombineRgbFloat, [gx.div_ceil(EW_GROUP), 1, 1])
        }
        Kernel::CombineRgbUchar => {
            p[0] = gx;
            // One thread packs four pixels.
            (
                PipelineKind::CombineRgbUchar,
                [gx.div_ceil(4).div_ceil(EW_GROUP), 1, 1],
            )
        }
        Kernel::DepthToFloat => {
            p[0] = gx;
            p[1] = call.f32(2)?.to_bits();
            (PipelineKind::DepthToFloat, [gx.div_ceil(EW_GROUP), 1, 1])
        }
    };
    Ok((kind, p, groups))
}
