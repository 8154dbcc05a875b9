#![forbid(unsafe_code)]

pub mod bids;
pub mod document;
pub mod expr;
pub mod identity;
pub mod mapping;
pub mod normalize;
pub mod value;

pub use document::{Section, SidecarDocument};
pub use identity::FileIdentity;
pub use mapping::{MappingRule, MappingTable, ResolveError};
pub use value::ColumnValue;
