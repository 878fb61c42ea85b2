//! Elementwise array math stages.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging};

use crate::backend::{Arg, BufferId, ComputeDevice, Event, Kernel, KernelCall};
use crate::stage::{Slot, stage_input};

/// Buffer slots for [`Mult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultMemory {
    DInA,
    DInB,
    DOut,
}

/// Buffer slots for [`Pown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PownMemory {
    DIn,
    DOut,
}

/// Elementwise product of two arrays. Each work-item handles four
/// elements, so the length must be a multiple of 4.
pub struct Mult {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    staging: Staging,
    h_in_a: Vec<f32>,
    h_in_b: Vec<f32>,
    h_out: Vec<f32>,
    d_in_a: Slot,
    d_in_b: Slot,
    d_out: Slot,
    call: Option<KernelCall>,
}

impl Mult {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize) -> Self {
        Self {
            dev,
            queue,
            staging: Staging::None,
            h_in_a: Vec::new(),
            h_in_b: Vec::new(),
            h_out: Vec::new(),
            d_in_a: Slot::default(),
            d_in_b: Slot::default(),
            d_out: Slot::default(),
            call: None,
        }
    }

    pub fn set_buffer(&mut self, mem: MultMemory, buf: BufferId) {
        match mem {
            MultMemory::DInA => self.d_in_a.assign(buf),
            MultMemory::DInB => self.d_in_b.assign(buf),
            MultMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: MultMemory) -> Option<BufferId> {
        match mem {
            MultMemory::DInA => self.d_in_a.get(),
            MultMemory::DInB => self.d_in_b.get(),
            MultMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(&mut self, len: u32, staging: Staging) -> FilterResult<()> {
        if len == 0 {
            return Err(FilterError::InvalidDimensions(len, 1));
        }
        if len % 4 != 0 {
            return Err(FilterError::NotMultipleOf { what: "length", of: 4, got: len });
        }

        self.staging = staging;
        let buffer_len = len as usize;
        if staging.wants_input() {
            self.h_in_a = vec![0f32; buffer_len];
            self.h_in_b = vec![0f32; buffer_len];
        } else {
            self.h_in_a = Vec::new();
            self.h_in_b = Vec::new();
        }
        self.h_out = if staging.wants_output() {
            vec![0f32; buffer_len]
        } else {
            Vec::new()
        };

        let bytes = buffer_len * 4;
        let d_in_a = self.d_in_a.resolve(self.dev.as_ref(), bytes)?;
        let d_in_b = self.d_in_b.resolve(self.dev.as_ref(), bytes)?;
        let d_out = self.d_out.resolve(self.dev.as_ref(), bytes)?;

        self.call = Some(KernelCall {
            kernel: Kernel::Mult,
            global: [len / 4, 1],
            local: [self.dev.wg_multiple(), 1],
            args: vec![Arg::Buf(d_in_a), Arg::Buf(d_in_b), Arg::Buf(d_out)],
        });
        Ok(())
    }

    pub fn write(
        &mut self,
        mem: MultMemory,
        data: Option<&[f32]>,
        wait: &[Event],
    ) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        let (slot, host) = match mem {
            MultMemory::DInA => (&self.d_in_a, &mut self.h_in_a),
            MultMemory::DInB => (&self.d_in_b, &mut self.h_in_b),
            MultMemory::DOut => {
                return Err(FilterError::OperationFailed(
                    "DOut is not an input slot".into(),
                ));
            }
        };
        if let Some(data) = data {
            stage_input(host, data)?;
        }
        let buf = slot.get().ok_or(FilterError::Uninitialized)?;
        let ev = self.dev.write_bytes(buf, bytemuck::cast_slice(host), wait)?;
        Ok(Some(ev))
    }

    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.d_out.get().ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out), wait)?;
        Ok(Some(&self.h_out))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let call = self.call.as_ref().ok_or(FilterError::Uninitialized)?;
        self.dev.enqueue(self.queue, call, wait)
    }
}

/// Elementwise integer power. Four elements per work-item.
pub struct Pown {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    staging: Staging,
    h_in: Vec<f32>,
    h_out: Vec<f32>,
    d_in: Slot,
    d_out: Slot,
    call: Option<KernelCall>,
}

impl Pown {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize) -> Self {
        Self {
            dev,
            queue,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out: Vec::new(),
            d_in: Slot::default(),
            d_out: Slot::default(),
            call: None,
        }
    }

    pub fn set_buffer(&mut self, mem: PownMemory, buf: BufferId) {
        match mem {
            PownMemory::DIn => self.d_in.assign(buf),
            PownMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: PownMemory) -> Option<BufferId> {
        match mem {
            PownMemory::DIn => self.d_in.get(),
            PownMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(&mut self, len: u32, n: i32, staging: Staging) -> FilterResult<()> {
        if len == 0 {
            return Err(FilterError::InvalidDimensions(len, 1));
        }
        if len % 4 != 0 {
            return Err(FilterError::NotMultipleOf { what: "length", of: 4, got: len });
        }

        self.staging = staging;
        let buffer_len = len as usize;
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

        let bytes = buffer_len * 4;
        let d_in = self.d_in.resolve(self.dev.as_ref(), bytes)?;
        let d_out = self.d_out.resolve(self.dev.as_ref(), bytes)?;

        self.call = Some(KernelCall {
            kernel: Kernel::Pown,
            global: [len / 4, 1],
            local: [self.dev.wg_multiple(), 1],
            args: vec![Arg::Buf(d_in), Arg::Buf(d_out), Arg::I32(n)],
        });
        Ok(())
    }

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

    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.d_out.get().ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out), wait)?;
        Ok(Some(&self.h_out))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let call = self.call.as_ref().ok_or(FilterError::Uninitialized)?;
        self.dev.enqueue(self.queue, call, wait)
    }

    pub fn set_n(&mut self, n: i32) -> FilterResult<()> {
        let call = self.call.as_mut().ok_or(FilterError::Uninitialized)?;
        call.args[2] = Arg::I32(n);
        Ok(())
    }
}
