pub mod btree;
pub mod error;
pub mod log;
pub mod medium;
pub mod types;

pub use crate::btree::{compare_unsigned, BTree, RangeIter, TreeConfig};
pub use crate::error::MicroError;
pub use crate::medium::{BlockMedium, FileMedium, RamMedium};
pub use crate::types::MicroResult;
