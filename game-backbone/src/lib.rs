//! Core abstractions for the session-hosted game architecture.
//!
//! This crate defines the contract between the coordination engine and the
//! game implementations it hosts. The engine owns sessions, admission and
//! wake-ups; a game owns nothing but its rules. Games implement [`Game`] and
//! announce themselves through a [`GameClass`] entry, the server collects the
//! entries into a [`GameRegistry`] at start-up.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Session Server                      │
//! │  ┌────────────┐    ┌──────────────┐    ┌──────────────┐  │
//! │  │   Server   │───►│  Framework   │───►│   Session    │  │
//! │  │ (TCP, JSON)│    │  (Dispatch)  │    │ (Admission,  │  │
//! │  └────────────┘    └──────────────┘    │  long-poll)  │  │
//! │                                        └──────┬───────┘  │
//! │                                               │ Game     │
//! │                                        ┌──────▼───────┐  │
//! │                                        │  dyn Game    │  │
//! │                                        │ (this crate) │  │
//! │                                        └──────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Implementing a Game
//!
//! ```ignore
//! impl Game for MyGame {
//!     fn current_player(&self) -> Vec<usize> { /* ... */ }
//!     fn apply_move(&mut self, args: &MoveArgs, player_id: usize) -> Result<(), MoveRejected> { /* ... */ }
//!     // ...
//! }
//!
//! pub fn game_class() -> GameClass {
//!     GameClass::new("MyGame", 2, 4, |players| Box::new(MyGame::new(players)))
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

/// The arguments of a single move, exactly as the client submitted them.
/// The engine guarantees the value was a JSON object, nothing more; games
/// must validate the content themselves.
pub type MoveArgs = serde_json::Map<String, Value>;

/// A per-player view of the game state, returned as a JSON object. The
/// engine augments it with the `current` and `gameover` keys before it goes
/// on the wire.
pub type StateMap = serde_json::Map<String, Value>;

/// A rejected move. Most games return a plain message, which reaches the
/// client tagged as `game: <message>`. A game may instead return any JSON
/// value, which is delivered verbatim so clients can receive structured
/// rejection payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRejected(pub Value);

impl From<&str> for MoveRejected {
    fn from(message: &str) -> Self {
        MoveRejected(Value::String(message.to_owned()))
    }
}

impl From<String> for MoveRejected {
    fn from(message: String) -> Self {
        MoveRejected(Value::String(message))
    }
}

impl From<Value> for MoveRejected {
    fn from(payload: Value) -> Self {
        MoveRejected(payload)
    }
}

impl fmt::Display for MoveRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(text) => f.write_str(text),
            other => write!(f, "{}", other),
        }
    }
}

/// The core trait every hosted game implements.
///
/// A game is a purely sequential state machine. The engine serializes all
/// calls into one instance, so implementations need no interior locking. The
/// engine also enforces turn order before calling [`apply_move`](Self::apply_move):
/// a move only ever arrives for a player id contained in the last
/// [`current_player`](Self::current_player) answer.
pub trait Game: Send {
    /// The ids allowed to move right now. May contain several ids (games
    /// with simultaneous turns report every id) or none at all.
    fn current_player(&self) -> Vec<usize>;

    /// Applies a move for `player_id`. The argument object must be validated
    /// thoroughly; meaningful rejection messages end up with the client
    /// unchanged.
    fn apply_move(&mut self, args: &MoveArgs, player_id: usize) -> Result<(), MoveRejected>;

    /// The state as visible to `player_id`. Games with hidden information
    /// tailor the view per player, everyone else can ignore the id.
    fn state(&self, player_id: usize) -> StateMap;

    /// True once no further moves are possible.
    fn game_over(&self) -> bool;

    /// A value copy of the instance. Used to preserve the terminal state of
    /// a finished game across a restart; the copy must not share mutable
    /// state with the original.
    fn snapshot(&self) -> Box<dyn Game>;
}

/// A registry entry describing one game class: its public name, the allowed
/// player counts and the constructor the engine instantiates it through.
#[derive(Clone, Copy)]
pub struct GameClass {
    name: &'static str,
    min_players: usize,
    max_players: usize,
    construct: fn(usize) -> Box<dyn Game>,
}

impl GameClass {
    /// A new entry. `name` is the case-sensitive identifier clients use in
    /// their requests.
    pub const fn new(
        name: &'static str,
        min_players: usize,
        max_players: usize,
        construct: fn(usize) -> Box<dyn Game>,
    ) -> Self {
        GameClass {
            name,
            min_players,
            max_players,
            construct,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn min_players(&self) -> usize {
        self.min_players
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Checks a requested player count against the class bounds.
    pub fn player_count_allowed(&self, players: usize) -> bool {
        players >= self.min_players && players <= self.max_players
    }

    /// Instantiates a fresh game for the given number of players. The count
    /// has been validated against the bounds by the caller.
    pub fn instantiate(&self, players: usize) -> Box<dyn Game> {
        (self.construct)(players)
    }
}

impl fmt::Debug for GameClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameClass")
            .field("name", &self.name)
            .field("min_players", &self.min_players)
            .field("max_players", &self.max_players)
            .finish()
    }
}

/// The process-wide table of available games, keyed by their case-sensitive
/// names. Populated once at start-up and never mutated afterwards; the
/// engine instantiates games through the table, never by reflection.
#[derive(Debug, Default)]
pub struct GameRegistry {
    classes: HashMap<&'static str, GameClass>,
}

impl GameRegistry {
    /// Builds the registry from a fixed list of classes.
    pub fn new(classes: impl IntoIterator<Item = GameClass>) -> Self {
        GameRegistry {
            classes: classes.into_iter().map(|c| (c.name, c)).collect(),
        }
    }

    /// Looks up a game class by its exact name.
    pub fn get(&self, name: &str) -> Option<&GameClass> {
        self.classes.get(name)
    }

    /// The registered names, for start-up logging.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.classes.keys().copied()
    }
}
