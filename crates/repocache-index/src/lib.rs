//! Content indexer: turns a concatenated, boundary-delimited repository
//! content dump into a byte/line-offset index for O(1) random file access
//! without re-parsing the dump on every lookup.

pub mod error;
pub mod indexer;

pub use error::{IndexError, Result};
pub use indexer::{get_content, is_valid, ContentIndex, LineRange, BOUNDARY_LEN};
