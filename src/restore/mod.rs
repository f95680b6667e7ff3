pub mod logic;
mod safety;
pub mod verification;

pub use logic::RestoreOrchestrator;
