//! Pipeline stages: scan, transpose, SAT, box filters, guided filter.

mod boxfilter;
mod guided;
mod sat;
mod scan;
mod transpose;

pub use boxfilter::{BoxFilter, BoxFilterSat, BoxMemory};
pub use guided::{DEFAULT_BOX_SCALING, GuidedFilter, GuidedKind, GuidedMemory};
pub use sat::{Sat, SatMemory};
pub use scan::{Scan, ScanMemory};
pub use transpose::{Transpose, TransposeMemory};
