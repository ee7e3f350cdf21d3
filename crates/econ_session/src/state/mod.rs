//! In-memory mirrors of game server state.

pub mod bans;
pub mod notify;
pub mod player;

pub use bans::{Ban, BanRegistry};
pub use notify::NotifyRegistry;
pub use player::{Player, PlayerObserver, PlayerState, PlayerTable, MAX_PLAYERS};
