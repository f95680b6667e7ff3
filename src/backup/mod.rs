pub mod checksum;
pub mod logic;
mod manual;

pub use logic::BackupOrchestrator;
