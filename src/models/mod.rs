mod board;
mod post;
mod profile;

pub use board::{board_key, Board, BoardItem};
pub use post::{BoardPostsData, PostAuthor, PostView, PostWithIndex};
pub use profile::ProfileView;
