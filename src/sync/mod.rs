pub mod contests;
pub mod odds;

pub use contests::{sync_contests, SyncStats};
#[cfg(test)]
pub use contests::apply_contest_updates;
pub use odds::{update_odds, OddsStats};
