//! Summed-area table, composed from scans and transposes.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging};

use crate::backend::{BufferId, ComputeDevice, Event};
use crate::stage::stage_input;

use super::scan::{Scan, ScanMemory};
use super::transpose::{Transpose, TransposeMemory};

/// Buffer slots exposed by [`Sat`]; aliases of the children's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatMemory {
    DIn,
    DOut,
}

/// Summed-area table: row scan (carrying the caller's pre-scale), then
/// transpose, then column scan, then an optional transpose back when a
/// row-ordered table is requested. A `transposed` table is what the SAT
/// box filter consumes directly.
pub struct Sat {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    transposed: bool,
    width: u32,
    height: u32,
    staging: Staging,
    h_in: Vec<f32>,
    h_out: Vec<f32>,
    scan_rows: Scan,
    transpose1: Transpose,
    scan_cols: Scan,
    transpose2: Transpose,
}

impl Sat {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize, transposed: bool) -> Self {
        Self {
            dev: Arc::clone(&dev),
            queue,
            transposed,
            width: 0,
            height: 0,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out: Vec::new(),
            scan_rows: Scan::new(Arc::clone(&dev), queue),
            transpose1: Transpose::new(Arc::clone(&dev), queue),
            scan_cols: Scan::new(Arc::clone(&dev), queue),
            transpose2: Transpose::new(dev, queue),
        }
    }

    pub fn set_buffer(&mut self, mem: SatMemory, buf: BufferId) {
        match mem {
            SatMemory::DIn => self.scan_rows.set_buffer(ScanMemory::DIn, buf),
            SatMemory::DOut => {
                if self.transposed {
                    self.scan_cols.set_buffer(ScanMemory::DOut, buf);
                } else {
                    self.transpose2.set_buffer(TransposeMemory::DOut, buf);
                }
            }
        }
    }

    pub fn buffer(&self, mem: SatMemory) -> Option<BufferId> {
        match mem {
            SatMemory::DIn => self.scan_rows.buffer(ScanMemory::DIn),
            SatMemory::DOut => {
                if self.transposed {
                    self.scan_cols.buffer(ScanMemory::DOut)
                } else {
                    self.transpose2.buffer(TransposeMemory::DOut)
                }
            }
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

        self.width = width;
        self.height = height;
        self.staging = staging;

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

        self.scan_rows.init(width, height, scaling, Staging::None)?;

        let rows_out = self
            .scan_rows
            .buffer(ScanMemory::DOut)
            .ok_or(FilterError::Uninitialized)?;
        self.transpose1.set_buffer(TransposeMemory::DIn, rows_out);
        self.transpose1.init(width, height, Staging::None)?;

        let tr_out = self
            .transpose1
            .buffer(TransposeMemory::DOut)
            .ok_or(FilterError::Uninitialized)?;
        self.scan_cols.set_buffer(ScanMemory::DIn, tr_out);
        // The row scan already applied the pre-scale.
        self.scan_cols.init(height, width, 1.0, Staging::None)?;

        if !self.transposed {
            let cols_out = self
                .scan_cols
                .buffer(ScanMemory::DOut)
                .ok_or(FilterError::Uninitialized)?;
            self.transpose2.set_buffer(TransposeMemory::DIn, cols_out);
            self.transpose2.init(height, width, Staging::None)?;
        }
        Ok(())
    }

    pub fn write(&mut self, data: Option<&[f32]>, wait: &[Event]) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        if let Some(data) = data {
            stage_input(&mut self.h_in, data)?;
        }
        let d_in = self.buffer(SatMemory::DIn).ok_or(FilterError::Uninitialized)?;
        let ev = self
            .dev
            .write_bytes(d_in, bytemuck::cast_slice(&self.h_in), wait)?;
        Ok(Some(ev))
    }

    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.buffer(SatMemory::DOut).ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out), wait)?;
        Ok(Some(&self.h_out))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let ev = self.scan_rows.run(wait)?;
        let ev = self.transpose1.run(&[ev])?;
        let ev = self.scan_cols.run(&[ev])?;
        if self.transposed {
            Ok(ev)
        } else {
            self.transpose2.run(&[ev])
        }
    }

    pub fn transposed(&self) -> bool {
        self.transposed
    }

    pub fn queue(&self) -> usize {
        self.queue
    }

    pub fn scaling(&self) -> f32 {
        self.scan_rows.scaling()
    }

    pub fn set_scaling(&mut self, scaling: f32) {
        self.scan_rows.set_scaling(scaling);
    }
}
