//! Numeric table loading for canopy forests.

mod error;
mod reader;
mod table;

pub use error::IoError;
pub use reader::TableReader;
pub use table::Table;
