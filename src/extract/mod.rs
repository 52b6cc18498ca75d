pub mod extractor;
pub mod rows;

pub use extractor::extract_rows;
pub use rows::RowSet;
