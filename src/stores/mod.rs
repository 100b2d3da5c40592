//! Local copies of the user's repository records and of looked-up profiles
//!
//! Each store keeps its state in memory and writes the whole state back to
//! [`Storage`](crate::storage::Storage) after every change.

mod actor_profiles;
mod board_items;
mod boards;
mod recent_boards;

pub use actor_profiles::ActorProfilesStore;
pub use board_items::BoardItemsStore;
pub use boards::BoardsStore;
pub use recent_boards::RecentBoards;
