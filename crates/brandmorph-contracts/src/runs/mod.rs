pub mod state;
pub mod summary;
pub mod variant;
