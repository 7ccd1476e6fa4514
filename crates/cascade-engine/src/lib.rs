pub mod config;
pub mod error;
pub mod sequencer;

pub use config::ModelLineup;
pub use error::EngineError;
pub use sequencer::Sequencer;
