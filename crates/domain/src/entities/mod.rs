//! Domain entities - the records that make up a game session

mod checkpoint;
mod game_state;
mod history;
mod scene;

pub use checkpoint::Checkpoint;
pub use game_state::GameState;
pub use history::GameHistoryEntry;
pub use scene::{Choice, Scene};
