//! Chat.
//!
//! Not a game in the strict sense: every participant may "move" at any
//! time and the session never ends. Clients first register a display name
//! with `{"name": ...}`, then post with `{"message": ...}`; the state is
//! the full message log. Useful on its own and as the engine's stress case
//! for many simultaneously current players.

use std::collections::HashMap;

use game_backbone::{Game, GameClass, MoveArgs, MoveRejected, StateMap};
use serde_json::{Value, json};

/// The registry entry for this game.
pub fn game_class() -> GameClass {
    GameClass::new("Chat", 1, 100, |players| Box::new(Chat::new(players)))
}

#[derive(Clone)]
pub struct Chat {
    players: usize,
    messages: Vec<(String, String)>,
    names: HashMap<usize, String>,
}

impl Chat {
    pub fn new(players: usize) -> Self {
        Chat {
            players,
            messages: Vec::new(),
            names: HashMap::new(),
        }
    }

    fn register_name(&mut self, player_id: usize, name: &Value) -> Result<(), MoveRejected> {
        let Some(name) = name.as_str() else {
            return Err(MoveRejected::from("type of argument 'name' must be str"));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(MoveRejected::from("name must not be an empty string"));
        }
        if self.names.values().any(|existing| existing == name) {
            return Err(MoveRejected::from("name already in use"));
        }
        self.names.insert(player_id, name.to_owned());
        Ok(())
    }

    fn post_message(&mut self, player_id: usize, message: &Value) -> Result<(), MoveRejected> {
        let Some(message) = message.as_str() else {
            return Err(MoveRejected::from("type of argument 'message' must be str"));
        };
        let Some(name) = self.names.get(&player_id) else {
            return Err(MoveRejected::from("you must submit your name first"));
        };
        let message = message.trim();
        if !message.is_empty() {
            self.messages.push((name.clone(), message.to_owned()));
        }
        Ok(())
    }
}

impl Game for Chat {
    /// Everyone may post at any time.
    fn current_player(&self) -> Vec<usize> {
        (0..self.players).collect()
    }

    fn apply_move(&mut self, args: &MoveArgs, player_id: usize) -> Result<(), MoveRejected> {
        if let Some(name) = args.get("name") {
            self.register_name(player_id, name)?;
        }
        if let Some(message) = args.get("message") {
            self.post_message(player_id, message)?;
        }
        Ok(())
    }

    fn state(&self, _player_id: usize) -> StateMap {
        let mut state = StateMap::new();
        state.insert("messages".to_owned(), json!(self.messages));
        state
    }

    /// A chat never ends.
    fn game_over(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Box<dyn Game> {
        Box::new(self.clone())
    }
}
