//! Player slots of a single game server.
//!
//! The remote server assigns every client a numeric slot id in `0..64` and
//! reuses ids after a client leaves. [`PlayerTable`] mirrors those slots and
//! drives the handshake state machine that decides when a client counts as
//! online.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, trace};

/// Number of slots a server exposes.
pub const MAX_PLAYERS: usize = 64;

/// Name carried by the sentinel returned for unknown players.
pub const UNKNOWN_PLAYER_NAME: &str = "(unknown)";

/// Handshake progress of a slot.
///
/// Servers with a staged handshake move `Empty -> Ready -> Named -> InGame`;
/// others populate a slot directly as `InGame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    #[default]
    Empty,
    Ready,
    Named,
    InGame,
}

/// Snapshot of one player slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Player {
    /// Slot id, or `-1` for the unknown sentinel
    pub id: i32,
    pub name: String,
    pub clan: String,
    /// Network address without port
    pub address: String,
    pub port: u16,
    pub version: i32,
    pub country: i32,
    pub state: PlayerState,
}

impl Player {
    /// Creates an empty slot with the given id.
    pub fn empty(id: i32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// The sentinel returned for ids or addresses that match no slot.
    ///
    /// Formatting code relies on it instead of handling an error: the name
    /// renders as `(unknown)` and the id as `-1`.
    pub fn unknown() -> Self {
        Self {
            id: -1,
            name: UNKNOWN_PLAYER_NAME.to_string(),
            ..Default::default()
        }
    }

    /// The unknown sentinel carrying the address that was looked up, so the
    /// caller can still act on it (e.g. ban a player that is not online).
    pub fn unknown_with_address(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Self::unknown()
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.id < 0
    }

    pub fn is_online(&self) -> bool {
        self.state == PlayerState::InGame
    }

    /// Resets the slot while keeping its id.
    pub fn clear(&mut self) {
        *self = Self::empty(self.id);
    }
}

/// Callback fired when a player joins or leaves.
pub type PlayerObserver = Arc<dyn Fn(&Player) + Send + Sync>;

/// Fixed-capacity table of player slots.
///
/// Mutations come from the session reader; status queries and reaction flows
/// read concurrently from other tasks.
pub struct PlayerTable {
    slots: RwLock<Vec<Player>>,
    join_observers: RwLock<Vec<PlayerObserver>>,
    leave_observers: RwLock<Vec<PlayerObserver>>,
}

impl Default for PlayerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PlayerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerTable")
            .field("online", &self.status().len())
            .finish()
    }
}

impl PlayerTable {
    /// Creates a table with [`MAX_PLAYERS`] empty slots.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new((0..MAX_PLAYERS as i32).map(Player::empty).collect()),
            join_observers: RwLock::new(Vec::new()),
            leave_observers: RwLock::new(Vec::new()),
        }
    }

    fn slot_index(id: i32) -> Option<usize> {
        usize::try_from(id).ok().filter(|idx| *idx < MAX_PLAYERS)
    }

    /// Registers a callback for players entering the game.
    pub fn on_join(&self, observer: PlayerObserver) {
        self.join_observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Registers a callback for players leaving the game.
    pub fn on_leave(&self, observer: PlayerObserver) {
        self.leave_observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Marks a slot as ready and records the client address. Any stale
    /// occupant is overwritten since the server reuses ids.
    pub fn set_ready(&self, id: i32, address: &str, port: u16) {
        let Some(idx) = Self::slot_index(id) else {
            return;
        };
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots[idx] = Player {
            id,
            address: address.to_string(),
            port,
            state: PlayerState::Ready,
            ..Default::default()
        };
    }

    /// Names a ready slot. Returns false if the slot was not in `Ready`.
    pub fn set_name(&self, id: i32, name: &str, clan: &str, country: i32) -> bool {
        let Some(idx) = Self::slot_index(id) else {
            return false;
        };
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut slots[idx];
        if slot.state != PlayerState::Ready {
            trace!("ignoring name for slot {} in state {:?}", id, slot.state);
            return false;
        }
        slot.name = name.to_string();
        slot.clan = clan.to_string();
        slot.country = country;
        slot.state = PlayerState::Named;
        true
    }

    /// Moves a handshaking slot into the game and fires join observers.
    ///
    /// Returns the joined player, or `None` if the slot was empty or already
    /// in game.
    pub fn enter(&self, id: i32) -> Option<Player> {
        let idx = Self::slot_index(id)?;
        let player = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            let slot = &mut slots[idx];
            match slot.state {
                PlayerState::Ready | PlayerState::Named => {
                    slot.state = PlayerState::InGame;
                    slot.clone()
                }
                PlayerState::Empty | PlayerState::InGame => return None,
            }
        };
        self.notify(&self.join_observers, &player);
        Some(player)
    }

    /// Populates a slot directly as online and fires join observers.
    pub fn join(&self, mut player: Player) -> Option<Player> {
        let idx = Self::slot_index(player.id)?;
        player.state = PlayerState::InGame;
        {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            slots[idx] = player.clone();
        }
        self.notify(&self.join_observers, &player);
        Some(player)
    }

    /// Clears a slot and fires leave observers with the player as it was
    /// before clearing.
    pub fn leave(&self, id: i32) -> Option<Player> {
        let idx = Self::slot_index(id)?;
        let snapshot = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            let snapshot = slots[idx].clone();
            slots[idx].clear();
            snapshot
        };
        self.notify(&self.leave_observers, &snapshot);
        Some(snapshot)
    }

    /// Returns the slot for `id`, or the unknown sentinel for out-of-range ids.
    pub fn player(&self, id: i32) -> Player {
        match Self::slot_index(id) {
            Some(idx) => self.slots.read().unwrap_or_else(PoisonError::into_inner)[idx].clone(),
            None => Player::unknown(),
        }
    }

    /// Finds the online player using `address`. Falls back to the unknown
    /// sentinel carrying `address`.
    pub fn player_by_address(&self, address: &str) -> Player {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.is_online() && p.address == address)
            .cloned()
            .unwrap_or_else(|| Player::unknown_with_address(address))
    }

    /// All online players in slot order.
    pub fn status(&self) -> Vec<Player> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| p.is_online())
            .cloned()
            .collect()
    }

    fn notify(&self, observers: &RwLock<Vec<PlayerObserver>>, player: &Player) {
        let observers: Vec<PlayerObserver> = observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(player))).is_err() {
                error!("❌ Player observer panicked for '{}' (id {})", player.name, player.id);
            }
        }
    }
}
