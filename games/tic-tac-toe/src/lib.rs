//! Tic-tac-toe.
//!
//! The classic two player game on a 3x3 board. Cells are indexed 0..=8 row
//! by row; a move is `{"position": <cell>}`. The state reports the board
//! (`-1` empty, otherwise the player id of the mark) and the winner, if
//! any.

use game_backbone::{Game, GameClass, MoveArgs, MoveRejected, StateMap};
use rand::Rng;
use serde_json::{Value, json};

const EMPTY: i64 = -1;

const WINNING_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// The registry entry for this game.
pub fn game_class() -> GameClass {
    GameClass::new("TicTacToe", 2, 2, |_players| Box::new(TicTacToe::new()))
}

#[derive(Clone)]
pub struct TicTacToe {
    board: [i64; 9],
    current: usize,
    gameover: bool,
    winner: Option<usize>,
}

impl TicTacToe {
    /// A fresh board. The opening player is drawn at random so neither
    /// joiner is structurally favoured.
    pub fn new() -> Self {
        TicTacToe {
            board: [EMPTY; 9],
            current: rand::thread_rng().gen_range(0..2),
            gameover: false,
            winner: None,
        }
    }

    #[cfg(test)]
    fn with_opening_player(current: usize) -> Self {
        TicTacToe {
            current,
            ..TicTacToe::new()
        }
    }

    fn check_position(&self, position: i64) -> Result<usize, MoveRejected> {
        let position = usize::try_from(position).ok().filter(|&p| p < 9);
        let Some(position) = position else {
            return Err(MoveRejected::from("invalid position"));
        };
        if self.board[position] != EMPTY {
            return Err(MoveRejected::from("position already occupied"));
        }
        Ok(position)
    }

    fn check_win(&mut self) {
        for line in WINNING_LINES {
            if line
                .iter()
                .all(|&cell| self.board[cell] == self.current as i64)
            {
                self.winner = Some(self.current);
                self.gameover = true;
                return;
            }
        }
    }

    fn check_board_full(&mut self) {
        if self.board.iter().all(|&cell| cell != EMPTY) {
            self.gameover = true;
        }
    }
}

impl Default for TicTacToe {
    fn default() -> Self {
        TicTacToe::new()
    }
}

impl Game for TicTacToe {
    fn current_player(&self) -> Vec<usize> {
        vec![self.current]
    }

    fn apply_move(&mut self, args: &MoveArgs, _player_id: usize) -> Result<(), MoveRejected> {
        let position = match args.get("position") {
            None => {
                return Err(MoveRejected::from(
                    "keyword argument 'position' of type int missing",
                ));
            }
            Some(Value::Number(value)) if value.is_i64() => value.as_i64().unwrap_or_default(),
            Some(_) => {
                return Err(MoveRejected::from("type of argument 'position' must be int"));
            }
        };

        let position = self.check_position(position)?;
        self.board[position] = self.current as i64;
        self.check_win();
        self.check_board_full();
        self.current ^= 1; // rotate players

        Ok(())
    }

    fn state(&self, _player_id: usize) -> StateMap {
        let mut state = StateMap::new();
        state.insert("board".to_owned(), json!(self.board.to_vec()));
        state.insert("winner".to_owned(), json!(self.winner));
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

    fn place(game: &mut TicTacToe, position: i64) -> Result<(), MoveRejected> {
        let mut args = MoveArgs::new();
        args.insert("position".to_owned(), json!(position));
        let current = game.current_player()[0];
        game.apply_move(&args, current)
    }

    #[test]
    fn class_is_registered_for_exactly_two_players() {
        let class = game_class();
        assert_eq!(class.name(), "TicTacToe");
        assert_eq!(class.min_players(), 2);
        assert_eq!(class.max_players(), 2);
    }

    #[test]
    fn fresh_board_is_empty_and_open() {
        let game = TicTacToe::new();
        let state = game.state(0);
        assert_eq!(state["board"], json!([-1, -1, -1, -1, -1, -1, -1, -1, -1]));
        assert_eq!(state["winner"], json!(null));
        assert!(!game.game_over());
        assert!(game.current_player()[0] < 2);
    }

    #[test]
    fn players_alternate_after_each_move() {
        let mut game = TicTacToe::with_opening_player(0);
        place(&mut game, 4).unwrap();
        assert_eq!(game.current_player(), vec![1]);
        place(&mut game, 0).unwrap();
        assert_eq!(game.current_player(), vec![0]);
    }

    #[test]
    fn a_row_of_three_wins() {
        let mut game = TicTacToe::with_opening_player(0);
        // x: 0 1 2 wins, o scatters
        for position in [0, 3, 1, 4, 2] {
            place(&mut game, position).unwrap();
        }
        assert!(game.game_over());
        assert_eq!(game.state(0)["winner"], json!(0));
    }

    #[test]
    fn a_full_board_without_a_line_is_a_draw() {
        let mut game = TicTacToe::with_opening_player(0);
        // x x o / o o x / x x o
        for position in [0, 2, 1, 4, 5, 3, 6, 8, 7] {
            place(&mut game, position).unwrap();
        }
        assert!(game.game_over());
        assert_eq!(game.state(0)["winner"], json!(null));
    }

    #[test]
    fn occupied_and_out_of_range_positions_are_rejected() {
        let mut game = TicTacToe::with_opening_player(0);
        place(&mut game, 4).unwrap();
        let err = place(&mut game, 4).unwrap_err();
        assert_eq!(err.to_string(), "position already occupied");
        let err = place(&mut game, 9).unwrap_err();
        assert_eq!(err.to_string(), "invalid position");
        let err = place(&mut game, -1).unwrap_err();
        assert_eq!(err.to_string(), "invalid position");
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let mut game = TicTacToe::with_opening_player(0);
        let err = game.apply_move(&MoveArgs::new(), 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "keyword argument 'position' of type int missing"
        );
        let mut args = MoveArgs::new();
        args.insert("position".to_owned(), json!("four"));
        let err = game.apply_move(&args, 0).unwrap_err();
        assert_eq!(err.to_string(), "type of argument 'position' must be int");
    }

    #[test]
    fn snapshots_are_value_copies() {
        let mut game = TicTacToe::with_opening_player(0);
        place(&mut game, 0).unwrap();
        let snapshot = game.snapshot();
        place(&mut game, 1).unwrap();
        assert_eq!(snapshot.state(0)["board"][1], json!(-1));
        assert_eq!(game.state(0)["board"][1], json!(1));
    }
}
