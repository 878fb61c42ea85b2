//! Internal plumbing shared by the pipeline stages.

use guided_core::{FilterError, FilterResult};

use crate::backend::{BufferId, ComputeDevice};

/// Owned-or-external device buffer slot.
///
/// A stage exposes its slots before `init`; wiring an external buffer in
/// makes the stage reuse it instead of allocating (zero-copy pipeline
/// composition). `init` backs whatever is still empty and the binding
/// never changes afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Slot(Option<BufferId>);

impl Slot {
    pub(crate) fn assign(&mut self, buf: BufferId) {
        self.0 = Some(buf);
    }

    pub(crate) fn get(&self) -> Option<BufferId> {
        self.0
    }

    /// Resolve the slot, allocating when it has no backing yet.
    pub(crate) fn resolve(&mut self, dev: &dyn ComputeDevice, bytes: usize) -> FilterResult<BufferId> {
        match self.0 {
            Some(buf) => Ok(buf),
            None => {
                let buf = dev.alloc(bytes)?;
                self.0 = Some(buf);
                Ok(buf)
            }
        }
    }
}

/// Copy caller data into a staging buffer, validating the length.
pub(crate) fn stage_input<T: Copy>(host: &mut [T], data: &[T]) -> FilterResult<()> {
    if data.len() != host.len() {
        return Err(FilterError::BufferSizeMismatch {
            expected: host.len(),
            actual: data.len(),
        });
    }
    host.copy_from_slice(data);
    Ok(())
}
