//! Echo!
//!
//! Not really a game, but occasionally useful for debugging and testing:
//! whatever arrives as `{"msg": ...}` comes back in the state unchanged.
//! The session ends as soon as the message `quit` is received.

use game_backbone::{Game, GameClass, MoveArgs, MoveRejected, StateMap};
use serde_json::json;

/// The registry entry for this game.
pub fn game_class() -> GameClass {
    GameClass::new("Echo", 1, 1, |_players| Box::new(Echo::new()))
}

#[derive(Clone, Default)]
pub struct Echo {
    message: String,
    gameover: bool,
}

impl Echo {
    pub fn new() -> Self {
        Echo::default()
    }
}

impl Game for Echo {
    fn current_player(&self) -> Vec<usize> {
        vec![0]
    }

    fn apply_move(&mut self, args: &MoveArgs, _player_id: usize) -> Result<(), MoveRejected> {
        let Some(message) = args.get("msg").and_then(|value| value.as_str()) else {
            return Err(MoveRejected::from("keyword argument 'msg' missing"));
        };
        self.message = message.to_owned();
        if self.message == "quit" {
            self.gameover = true;
        }
        Ok(())
    }

    fn state(&self, _player_id: usize) -> StateMap {
        let mut state = StateMap::new();
        state.insert("echo".to_owned(), json!(self.message));
        state
    }

    fn game_over(&self) -> bool {
        self.gameover
    }

    fn snapshot(&self) -> Box<dyn Game> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn say(echo: &mut Echo, msg: &str) -> Result<(), MoveRejected> {
        let mut args = MoveArgs::new();
        args.insert("msg".to_owned(), json!(msg));
        echo.apply_move(&args, 0)
    }

    #[test]
    fn echoes_the_last_message() {
        let mut echo = Echo::new();
        assert_eq!(echo.state(0)["echo"], json!(""));
        say(&mut echo, "hello").unwrap();
        assert_eq!(echo.state(0)["echo"], json!("hello"));
        assert!(!echo.game_over());
    }

    #[test]
    fn quit_ends_the_session() {
        let mut echo = Echo::new();
        say(&mut echo, "quit").unwrap();
        assert!(echo.game_over());
        assert_eq!(echo.state(0)["echo"], json!("quit"));
    }

    #[test]
    fn the_msg_argument_is_required() {
        let mut echo = Echo::new();
        let err = echo.apply_move(&MoveArgs::new(), 0).unwrap_err();
        assert_eq!(err.to_string(), "keyword argument 'msg' missing");
    }
}
