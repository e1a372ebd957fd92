pub mod participants;
pub mod picks;

pub use participants::add_alias;
pub use picks::{ingest_picks, IngestStats};
#[cfg(test)]
pub use picks::{ingest_rows, SOURCE_SHEET};
