pub mod descriptor;
pub mod errors;
pub mod events;
pub mod generator;
pub mod ids;
pub mod messages;
pub mod stream;
