#![forbid(unsafe_code)]

mod docs;
mod error;
mod extract;
mod load;
mod reconcile;
mod script;
mod transform;

pub use docs::SidecarSet;
pub use error::EtlError;
pub use extract::{ExtractedRecord, extract, store_extracted};
pub use load::{LoadReport, load};
pub use reconcile::{
    BackpropReport, ReconcileReport, ReconcileState, StageReport, reconcile,
};
pub use script::{read_script, write_script};
pub use transform::{MappingSet, RecordWrites, RowWrite, transform};
