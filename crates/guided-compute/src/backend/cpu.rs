//! CPU device using rayon for parallelization.
//!
//! Kernels execute synchronously at enqueue, so every returned event is
//! already complete and wait-lists are trivially satisfied. This device
//! doubles as the semantic reference the integration tests run against.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use guided_core::{FilterError, FilterResult};

use super::{BufferId, ComputeDevice, Event, Kernel, KernelCall};

/// CPU compute device. Buffers are plain byte vectors behind a lock.
pub struct CpuDevice {
    buffers: Mutex<Vec<Vec<u8>>>,
    ticket: AtomicU64,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            ticket: AtomicU64::new(1),
        }
    }

    fn next_event(&self) -> Event {
        self.ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> FilterResult<std::sync::MutexGuard<'_, Vec<Vec<u8>>>> {
        self.buffers
            .lock()
            .map_err(|_| FilterError::OperationFailed("buffer table lock poisoned".into()))
    }

    fn exec(&self, call: &KernelCall) -> FilterResult<()> {
        let mut bufs = self.lock()?;
        match call.kernel {
            Kernel::InclusiveScan => inclusive_scan(&mut bufs, call),
            Kernel::AddGroupSums => add_group_sums(&mut bufs, call),
            Kernel::Transpose => transpose(&mut bufs, call),
            Kernel::BoxFilterSatTransposed => box_filter_sat(&mut bufs, call, true),
            Kernel::BoxFilterSat => box_filter_sat(&mut bufs, call, false),
            Kernel::BoxFilter => box_filter(&mut bufs, call),
            Kernel::Mult => mult(&mut bufs, call),
            Kernel::Pown => pown(&mut bufs, call),
            Kernel::GfAb => gf_ab(&mut bufs, call),
            Kernel::GfVarIp => gf_var_ip(&mut bufs, call),
            Kernel::GfAbIp => gf_ab_ip(&mut bufs, call),
            Kernel::GfQ => gf_q(&mut bufs, call),
            Kernel::SeparateRgbFloat => separate_rgb_float(&mut bufs, call),
            Kernel::SeparateRgbUchar => separate_rgb_uchar(&mut bufs, call),
            Kernel::CombineRgbFloat => combine_rgb_float(&mut bufs, call),
            Kernel::CombineRgbUchar => combine_rgb_uchar(&mut bufs, call),
            Kernel::DepthToFloat => depth_to_float(&mut bufs, call),
        }
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn wg_multiple(&self) -> u32 {
        64
    }

    fn max_workgroup_size(&self) -> u32 {
        1024
    }

    fn alloc(&self, bytes: usize) -> FilterResult<BufferId> {
        let mut bufs = self.lock()?;
        bufs.push(vec![0u8; bytes]);
        Ok(BufferId(bufs.len() as u64 - 1))
    }

    fn write_bytes(&self, buf: BufferId, data: &[u8], _wait: &[Event]) -> FilterResult<Event> {
        let mut bufs = self.lock()?;
        let dst = buffer_mut(&mut bufs, buf)?;
        if dst.len() != data.len() {
            return Err(FilterError::BufferSizeMismatch {
                expected: dst.len(),
                actual: data.len(),
            });
        }
        dst.copy_from_slice(data);
        drop(bufs);
        Ok(self.next_event())
    }

    fn read_bytes(&self, buf: BufferId, out: &mut [u8], _wait: &[Event]) -> FilterResult<()> {
        let bufs = self.lock()?;
        let src = buffer_ref(&bufs, buf)?;
        if src.len() != out.len() {
            return Err(FilterError::BufferSizeMismatch {
                expected: src.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(src);
        Ok(())
    }

    fn enqueue(&self, _queue: usize, call: &KernelCall, _wait: &[Event]) -> FilterResult<Event> {
        self.exec(call)?;
        Ok(self.next_event())
    }

    fn finish(&self, _queue: usize) -> FilterResult<()> {
        Ok(())
    }
}

fn buffer_ref<'a>(bufs: &'a [Vec<u8>], id: BufferId) -> FilterResult<&'a Vec<u8>> {
    bufs.get(id.0 as usize).ok_or(FilterError::UnknownBuffer)
}

fn buffer_mut<'a>(bufs: &'a mut [Vec<u8>], id: BufferId) -> FilterResult<&'a mut Vec<u8>> {
    bufs.get_mut(id.0 as usize).ok_or(FilterError::UnknownBuffer)
}

/// Copy a buffer out as f32. Kernels read copies and write results back,
/// which keeps aliased in/out arguments (the in-place sums scan) sound.
fn load_f32(bufs: &[Vec<u8>], id: BufferId) -> FilterResult<Vec<f32>> {
    Ok(bytemuck::cast_slice(buffer_ref(bufs, id)?).to_vec())
}

fn load_u8(bufs: &[Vec<u8>], id: BufferId) -> FilterResult<Vec<u8>> {
    Ok(buffer_ref(bufs, id)?.clone())
}

fn load_u16(bufs: &[Vec<u8>], id: BufferId) -> FilterResult<Vec<u16>> {
    Ok(bytemuck::cast_slice(buffer_ref(bufs, id)?).to_vec())
}

fn store_f32(bufs: &mut [Vec<u8>], id: BufferId, data: &[f32]) -> FilterResult<()> {
    let dst = buffer_mut(bufs, id)?;
    dst.copy_from_slice(bytemuck::cast_slice(data));
    Ok(())
}

fn store_u8(bufs: &mut [Vec<u8>], id: BufferId, data: &[u8]) -> FilterResult<()> {
    let dst = buffer_mut(bufs, id)?;
    dst.copy_from_slice(data);
    Ok(())
}

// --- kernel implementations -------------------------------------------------

/// Group-local inclusive scan per row. Each work-group of `local[0]`
/// items covers `8 * local[0]` elements; group totals land in the sums
/// buffer unless the row fits a single group (the sums argument is
/// unused then, matching the launch contract).
fn inclusive_scan(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let n4 = call.u32(3)? as usize;
    let scaling = call.f32(4)?;
    let width = 4 * n4;
    let rows = call.global[1] as usize;
    let span = 8 * call.local[0] as usize;
    let groups = (call.global[0] / call.local[0]) as usize;

    let input = load_f32(bufs, call.buf(0)?)?;
    let mut out = vec![0f32; width * rows];

    if groups == 1 {
        out.par_chunks_mut(width).enumerate().for_each(|(r, row)| {
            let mut acc = 0f32;
            for (i, v) in row.iter_mut().enumerate() {
                acc += input[r * width + i] * scaling;
                *v = acc;
            }
        });
        store_f32(bufs, call.buf(1)?, &out)?;
    } else {
        let mut sums = vec![0f32; groups * rows];
        out.par_chunks_mut(width)
            .zip(sums.par_chunks_mut(groups))
            .enumerate()
            .for_each(|(r, (row, row_sums))| {
                for g in 0..groups {
                    let start = g * span;
                    let end = width.min(start + span);
                    let mut acc = 0f32;
                    for i in start..end {
                        acc += input[r * width + i] * scaling;
                        row[i] = acc;
                    }
                    row_sums[g] = acc;
                }
            });
        store_f32(bufs, call.buf(1)?, &out)?;
        store_f32(bufs, call.buf(2)?, &sums)?;
    }
    Ok(())
}

/// Adds the inclusive-scanned group totals of groups `0..g` onto every
/// element of group `g`, for groups 1 onward.
fn add_group_sums(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let n4 = call.u32(2)? as usize;
    let width = 4 * n4;
    let rows = call.global[1] as usize;
    let span = 4 * call.local[0] as usize;
    let processed = (call.global[0] / call.local[0]) as usize;
    let groups = processed + 1;

    let sums = load_f32(bufs, call.buf(0)?)?;
    let mut out = load_f32(bufs, call.buf(1)?)?;

    out.par_chunks_mut(width).enumerate().for_each(|(r, row)| {
        for g in 1..groups {
            let start = g * span;
            // The group count is padded to a vectorization multiple;
            // padding groups hold no data.
            if start >= width {
                break;
            }
            let carry = sums[r * groups + g - 1];
            let end = width.min(start + span);
            for v in &mut row[start..end] {
                *v += carry;
            }
        }
    });
    store_f32(bufs, call.buf(1)?, &out)
}

fn transpose(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let width = 4 * call.global[0] as usize;
    let height = 4 * call.global[1] as usize;

    let input = load_f32(bufs, call.buf(0)?)?;
    let mut out = vec![0f32; width * height];

    // Output is height-major: column x of the input becomes row x.
    out.par_chunks_mut(height).enumerate().for_each(|(x, col)| {
        for (y, v) in col.iter_mut().enumerate() {
            *v = input[y * width + x];
        }
    });
    store_f32(bufs, call.buf(1)?, &out)
}

/// Windowed mean over a `(2r+1)^2` box via SAT corner differencing.
/// Corners clamp to the image bounds and the division uses the true
/// in-bounds sample count, then the SAT pre-scale is undone.
fn box_filter_sat(bufs: &mut [Vec<u8>], call: &KernelCall, transposed: bool) -> FilterResult<()> {
    let height = call.global[0] as usize;
    let width = call.global[1] as usize;
    let radius = call.i32(2)? as i64;
    let inv_scaling = call.f32(3)?;

    let sat = load_f32(bufs, call.buf(0)?)?;
    let mut out = vec![0f32; width * height];

    let lookup = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 {
            return 0.0;
        }
        if transposed {
            sat[x as usize * height + y as usize]
        } else {
            sat[y as usize * width + x as usize]
        }
    };

    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let y = y as i64;
        let y0 = (y - radius).max(0);
        let y1 = (y + radius).min(height as i64 - 1);
        for (x, v) in row.iter_mut().enumerate() {
            let x = x as i64;
            let x0 = (x - radius).max(0);
            let x1 = (x + radius).min(width as i64 - 1);
            let sum = lookup(x1, y1) - lookup(x0 - 1, y1) - lookup(x1, y0 - 1)
                + lookup(x0 - 1, y0 - 1);
            let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;
            *v = sum * inv_scaling / count;
        }
    });
    store_f32(bufs, call.buf(1)?, &out)
}

/// Direct windowed mean; same clamped-count edge rule as the SAT path.
fn box_filter(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let width = call.global[0] as usize;
    let height = call.global[1] as usize;
    let radius = call.i32(2)? as i64;

    let input = load_f32(bufs, call.buf(0)?)?;
    let mut out = vec![0f32; width * height];

    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let y = y as i64;
        let y0 = (y - radius).max(0) as usize;
        let y1 = (y + radius).min(height as i64 - 1) as usize;
        for (x, v) in row.iter_mut().enumerate() {
            let x = x as i64;
            let x0 = (x - radius).max(0) as usize;
            let x1 = (x + radius).min(width as i64 - 1) as usize;
            let mut sum = 0f32;
            for yy in y0..=y1 {
                for xx in x0..=x1 {
                    sum += input[yy * width + xx];
                }
            }
            *v = sum / ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;
        }
    });
    store_f32(bufs, call.buf(1)?, &out)
}

fn mult(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let len = 4 * call.global[0] as usize;
    let a = load_f32(bufs, call.buf(0)?)?;
    let b = load_f32(bufs, call.buf(1)?)?;
    let out: Vec<f32> = (0..len).into_par_iter().map(|i| a[i] * b[i]).collect();
    store_f32(bufs, call.buf(2)?, &out)
}

fn pown(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let len = 4 * call.global[0] as usize;
    let n = call.i32(2)?;
    let input = load_f32(bufs, call.buf(0)?)?;
    let out: Vec<f32> = (0..len).into_par_iter().map(|i| input[i].powi(n)).collect();
    store_f32(bufs, call.buf(1)?, &out)
}

fn gf_ab(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let len = 4 * call.global[0] as usize;
    let eps = call.f32(4)?;
    let mean_p = load_f32(bufs, call.buf(0)?)?;
    let mean_p2 = load_f32(bufs, call.buf(1)?)?;

    let mut a = vec![0f32; len];
    let mut b = vec![0f32; len];
    a.par_iter_mut()
        .zip(b.par_iter_mut())
        .enumerate()
        .for_each(|(i, (a, b))| {
            let var = mean_p2[i] - mean_p[i] * mean_p[i];
            *a = var / (var + eps);
            *b = (1.0 - *a) * mean_p[i];
        });
    store_f32(bufs, call.buf(2)?, &a)?;
    store_f32(bufs, call.buf(3)?, &b)
}

fn gf_var_ip(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let len = 4 * call.global[0] as usize;
    let corr_i = load_f32(bufs, call.buf(0)?)?;
    let corr_ip = load_f32(bufs, call.buf(1)?)?;
    let mean_i = load_f32(bufs, call.buf(2)?)?;
    let mean_p = load_f32(bufs, call.buf(3)?)?;

    let mut var = vec![0f32; len];
    let mut cov = vec![0f32; len];
    var.par_iter_mut()
        .zip(cov.par_iter_mut())
        .enumerate()
        .for_each(|(i, (var, cov))| {
            *var = corr_i[i] - mean_i[i] * mean_i[i];
            *cov = corr_ip[i] - mean_i[i] * mean_p[i];
        });
    store_f32(bufs, call.buf(4)?, &var)?;
    store_f32(bufs, call.buf(5)?, &cov)
}

fn gf_ab_ip(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let len = 4 * call.global[0] as usize;
    let eps = call.f32(6)?;
    let var = load_f32(bufs, call.buf(0)?)?;
    let cov = load_f32(bufs, call.buf(1)?)?;
    let mean_i = load_f32(bufs, call.buf(2)?)?;
    let mean_p = load_f32(bufs, call.buf(3)?)?;

    let mut a = vec![0f32; len];
    let mut b = vec![0f32; len];
    a.par_iter_mut()
        .zip(b.par_iter_mut())
        .enumerate()
        .for_each(|(i, (a, b))| {
            *a = cov[i] / (var[i] + eps);
            *b = mean_p[i] - *a * mean_i[i];
        });
    store_f32(bufs, call.buf(4)?, &a)?;
    store_f32(bufs, call.buf(5)?, &b)
}

fn gf_q(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let len = 4 * call.global[0] as usize;
    let zero_out = call.i32(4)? != 0;
    let scaling = call.f32(5)?;
    let src = load_f32(bufs, call.buf(0)?)?;
    let mean_a = load_f32(bufs, call.buf(1)?)?;
    let mean_b = load_f32(bufs, call.buf(2)?)?;

    let out: Vec<f32> = (0..len)
        .into_par_iter()
        .map(|i| {
            if zero_out && src[i] == 0.0 {
                0.0
            } else {
                (mean_a[i] * src[i] + mean_b[i]) * scaling
            }
        })
        .collect();
    store_f32(bufs, call.buf(3)?, &out)
}

fn separate_rgb_float(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let pixels = call.global[0] as usize;
    let input = load_f32(bufs, call.buf(0)?)?;

    let mut r = vec![0f32; pixels];
    let mut g = vec![0f32; pixels];
    let mut b = vec![0f32; pixels];
    r.par_iter_mut()
        .zip(g.par_iter_mut())
        .zip(b.par_iter_mut())
        .enumerate()
        .for_each(|(i, ((r, g), b))| {
            *r = input[3 * i];
            *g = input[3 * i + 1];
            *b = input[3 * i + 2];
        });
    store_f32(bufs, call.buf(1)?, &r)?;
    store_f32(bufs, call.buf(2)?, &g)?;
    store_f32(bufs, call.buf(3)?, &b)
}

fn separate_rgb_uchar(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let pixels = call.global[0] as usize;
    let input = load_u8(bufs, call.buf(0)?)?;

    let mut r = vec![0f32; pixels];
    let mut g = vec![0f32; pixels];
    let mut b = vec![0f32; pixels];
    r.par_iter_mut()
        .zip(g.par_iter_mut())
        .zip(b.par_iter_mut())
        .enumerate()
        .for_each(|(i, ((r, g), b))| {
            *r = input[3 * i] as f32 / 255.0;
            *g = input[3 * i + 1] as f32 / 255.0;
            *b = input[3 * i + 2] as f32 / 255.0;
        });
    store_f32(bufs, call.buf(1)?, &r)?;
    store_f32(bufs, call.buf(2)?, &g)?;
    store_f32(bufs, call.buf(3)?, &b)
}

fn combine_rgb_float(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let pixels = call.global[0] as usize;
    let r = load_f32(bufs, call.buf(0)?)?;
    let g = load_f32(bufs, call.buf(1)?)?;
    let b = load_f32(bufs, call.buf(2)?)?;

    let mut out = vec![0f32; 3 * pixels];
    out.par_chunks_mut(3).enumerate().for_each(|(i, px)| {
        px[0] = r[i];
        px[1] = g[i];
        px[2] = b[i];
    });
    store_f32(bufs, call.buf(3)?, &out)
}

fn combine_rgb_uchar(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let pixels = call.global[0] as usize;
    let r = load_f32(bufs, call.buf(0)?)?;
    let g = load_f32(bufs, call.buf(1)?)?;
    let b = load_f32(bufs, call.buf(2)?)?;

    let quantize = |v: f32| -> u8 { (v * 255.0).round().clamp(0.0, 255.0) as u8 };
    let mut out = vec![0u8; 3 * pixels];
    out.par_chunks_mut(3).enumerate().for_each(|(i, px)| {
        px[0] = quantize(r[i]);
        px[1] = quantize(g[i]);
        px[2] = quantize(b[i]);
    });
    store_u8(bufs, call.buf(3)?, &out)
}

fn depth_to_float(bufs: &mut [Vec<u8>], call: &KernelCall) -> FilterResult<()> {
    let len = 4 * call.global[0] as usize;
    let scaling = call.f32(2)?;
    let input = load_u16(bufs, call.buf(0)?)?;

    let out: Vec<f32> = (0..len)
        .into_par_iter()
        .map(|i| input[i] as f32 * scaling)
        .collect();
    store_f32(bufs, call.buf(1)?, &out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Arg;

    fn dev_with(data: &[f32]) -> (CpuDevice, BufferId) {
        let dev = CpuDevice::new();
        let buf = dev.alloc(data.len() * 4).unwrap();
        dev.write_bytes(buf, bytemuck::cast_slice(data), &[]).unwrap();
        (dev, buf)
    }

    #[test]
    fn mult_is_elementwise() {
        let (dev, a) = dev_with(&[1.0, 2.0, 3.0, 4.0]);
        let b = dev.alloc(16).unwrap();
        dev.write_bytes(b, bytemuck::cast_slice(&[2.0f32, 2.0, 0.5, 1.0]), &[])
            .unwrap();
        let out = dev.alloc(16).unwrap();
        let call = KernelCall {
            kernel: Kernel::Mult,
            global: [1, 1],
            local: [1, 1],
            args: vec![Arg::Buf(a), Arg::Buf(b), Arg::Buf(out)],
        };
        dev.enqueue(0, &call, &[]).unwrap();
        let mut res = [0f32; 4];
        dev.read_bytes(out, bytemuck::cast_slice_mut(&mut res), &[]).unwrap();
        assert_eq!(res, [2.0, 4.0, 1.5, 4.0]);
    }

    #[test]
    fn size_mismatch_is_reported() {
        let dev = CpuDevice::new();
        let buf = dev.alloc(16).unwrap();
        let err = dev.write_bytes(buf, &[0u8; 8], &[]).unwrap_err();
        assert!(matches!(err, FilterError::BufferSizeMismatch { .. }));
    }
}
