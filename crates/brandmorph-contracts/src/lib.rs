pub mod events;
pub mod runs;
pub mod strategies;
pub mod templates;
