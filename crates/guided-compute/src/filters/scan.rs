//! Per-row inclusive prefix scan.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging, geometry};

use crate::backend::{Arg, BufferId, ComputeDevice, Event, Kernel, KernelCall};
use crate::stage::{Slot, stage_input};

/// Buffer slots exposed by [`Scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMemory {
    DIn,
    DSums,
    DOut,
}

/// Per-row inclusive prefix sum with an optional pre-scale factor.
///
/// Rows that fit a single work-group scan in one pass; wider rows use
/// the two-level scheme: group-local scans emit per-group totals into a
/// sums buffer, the sums rows are scanned in place, and the carry is
/// added back onto every trailing group. The pre-scale keeps later
/// large summations (SAT) well conditioned.
pub struct Scan {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    width: u32,
    height: u32,
    scaling: f32,
    wg_xdim: u32,
    staging: Staging,
    h_in: Vec<f32>,
    h_out: Vec<f32>,
    d_in: Slot,
    d_sums: Slot,
    d_out: Slot,
    scan_rows: Option<KernelCall>,
    sums_scan: Option<KernelCall>,
    add_sums: Option<KernelCall>,
}

impl Scan {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize) -> Self {
        Self {
            dev,
            queue,
            width: 0,
            height: 0,
            scaling: 1.0,
            wg_xdim: 0,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out: Vec::new(),
            d_in: Slot::default(),
            d_sums: Slot::default(),
            d_out: Slot::default(),
            scan_rows: None,
            sums_scan: None,
            add_sums: None,
        }
    }

    /// Wire an external device buffer into a slot. Must happen before
    /// `init`; the binding is kept instead of allocating.
    pub fn set_buffer(&mut self, mem: ScanMemory, buf: BufferId) {
        match mem {
            ScanMemory::DIn => self.d_in.assign(buf),
            ScanMemory::DSums => self.d_sums.assign(buf),
            ScanMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: ScanMemory) -> Option<BufferId> {
        match mem {
            ScanMemory::DIn => self.d_in.get(),
            ScanMemory::DSums => self.d_sums.get(),
            ScanMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        scaling: f32,
        staging: Staging,
    ) -> FilterResult<()> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidDimensions(width, height));
        }
        if width % 4 != 0 {
            return Err(FilterError::NotMultipleOf {
                what: "scan row width",
                of: 4,
                got: width,
            });
        }
        let wgm = self.dev.wg_multiple();
        // One group covers 8 * wgm elements; the sums row must itself
        // fit a single group.
        let limit = (8 * wgm) * (8 * wgm);
        if width > limit {
            return Err(FilterError::RowTooWide { width, limit });
        }

        self.width = width;
        self.height = height;
        self.scaling = scaling;
        self.staging = staging;
        self.wg_xdim = geometry::scan_group_count(width, wgm);

        let buffer_len = (width * height) as usize;
        self.h_in = if staging.wants_input() {
            vec![0f32; buffer_len]
        } else {
            Vec::new()
        };
        self.h_out = if staging.wants_output() {
            vec![0f32; buffer_len]
        } else {
            Vec::new()
        };

        let d_in = self.d_in.resolve(&*self.dev, buffer_len * 4)?;
        let d_sums = self
            .d_sums
            .resolve(&*self.dev, (self.wg_xdim * height) as usize * 4)?;
        let d_out = self.d_out.resolve(&*self.dev, buffer_len * 4)?;

        self.scan_rows = Some(KernelCall {
            kernel: Kernel::InclusiveScan,
            global: [self.wg_xdim * wgm, height],
            local: [wgm, 1],
            args: vec![
                Arg::Buf(d_in),
                Arg::Buf(d_out),
                Arg::Buf(d_sums),
                Arg::U32(width / 4),
                Arg::F32(scaling),
            ],
        });

        if self.wg_xdim > 1 {
            self.sums_scan = Some(KernelCall {
                kernel: Kernel::InclusiveScan,
                global: [wgm, height],
                local: [wgm, 1],
                args: vec![
                    Arg::Buf(d_sums),
                    Arg::Buf(d_sums),
                    Arg::Buf(d_sums),
                    Arg::U32(self.wg_xdim / 4),
                    Arg::F32(1.0),
                ],
            });
            self.add_sums = Some(KernelCall {
                kernel: Kernel::AddGroupSums,
                global: [(self.wg_xdim - 1) * 2 * wgm, height],
                local: [2 * wgm, 1],
                args: vec![Arg::Buf(d_sums), Arg::Buf(d_out), Arg::U32(width / 4)],
            });
        } else {
            self.sums_scan = None;
            self.add_sums = None;
        }
        Ok(())
    }

    /// Transfer to the input device buffer. `data`, when given, is
    /// copied into the staging buffer first. No-op without input
    /// staging.
    pub fn write(&mut self, data: Option<&[f32]>, wait: &[Event]) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        if let Some(data) = data {
            stage_input(&mut self.h_in, data)?;
        }
        let d_in = self.d_in.get().ok_or(FilterError::Uninitialized)?;
        let ev = self
            .dev
            .write_bytes(d_in, bytemuck::cast_slice(&self.h_in), wait)?;
        Ok(Some(ev))
    }

    /// Blocking transfer from the output device buffer into staging.
    /// No-op without output staging. Readback is always blocking;
    /// there is no asynchronous variant.
    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.d_out.get().ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out), wait)?;
        Ok(Some(&self.h_out))
    }

    /// Enqueue the scan; non-blocking.
    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let scan_rows = self.scan_rows.as_ref().ok_or(FilterError::Uninitialized)?;
        let ev = self.dev.enqueue(self.queue, scan_rows, wait)?;
        match (&self.sums_scan, &self.add_sums) {
            (Some(sums_scan), Some(add_sums)) => {
                // Same queue; submission order carries the dependency.
                self.dev.enqueue(self.queue, sums_scan, &[])?;
                self.dev.enqueue(self.queue, add_sums, &[])
            }
            _ => Ok(ev),
        }
    }

    pub fn scaling(&self) -> f32 {
        self.scaling
    }

    /// Patch the pre-scale argument of the row scan in place.
    pub fn set_scaling(&mut self, scaling: f32) {
        self.scaling = scaling;
        if let Some(call) = self.scan_rows.as_mut() {
            call.args[4] = Arg::F32(scaling);
        }
    }
}
