//! A single game session.
//!
//! The session owns the game instance and everything tied to one `(game,
//! token)` pair: the admission roster, the per-player keys, the long-poll
//! read discipline and the previous-game snapshot handed out after a
//! restart.
//!
//! Readers block on one broadcast [`Notify`] per session and self-filter:
//! a read returns immediately when it is the caller's turn, when a
//! previous-game view is still owed, or when the caller's effective id sits
//! in the no-delay set. The no-delay set is what prevents lost wake-ups,
//! since another mutation may fire between a mutation and a client's next
//! read. A fresh game seeds the set with every id so the very first read
//! does not hang. Observer ids alias to `player_id + n_players`, which
//! keeps a single membership check uniform across players and observers.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use game_backbone::{Game, GameClass, MoveArgs, MoveRejected, StateMap};
use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Notify;

/// Length of the generated admission keys.
const KEY_LENGTH: usize = 5;

/// The player id that created the session and is allowed to restart it.
const STARTER_ID: usize = 0;

/// Session-level rejections. The display strings are exactly what reaches
/// the client behind the `framework: ` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("name already in use")]
    NameInUse,
    #[error("game is already full")]
    Full,
    #[error("no such player")]
    NoSuchPlayer,
    #[error("invalid key")]
    InvalidKey,
    #[error("game has ended")]
    GameEnded,
    #[error("not your turn")]
    NotYourTurn,
    #[error("game can only be restarted by starter")]
    RestartForbidden,
    #[error("game session was overwritten")]
    Overwritten,
    #[error("timeout while waiting for others to join")]
    AdmissionTimeout,
    #[error("no such game session")]
    Expired,
}

/// Why a submitted move did not go through: either the framework refused it
/// before the game ever saw it, or the game itself rejected it.
#[derive(Debug)]
pub enum MoveFailure {
    Session(SessionError),
    Game(MoveRejected),
}

/// Everything guarded by the session lock. Critical sections are short and
/// never await.
struct SessionInner {
    class: GameClass,
    game: Box<dyn Game>,
    next_id: usize,
    player_ids: HashMap<String, usize>,
    keys: HashMap<usize, String>,
    last_access: Instant,
    no_delay: HashSet<usize>,
    timed_out: bool,
    overwritten: bool,
}

impl SessionInner {
    fn key_valid(&self, player_id: usize, key: &str) -> bool {
        self.keys.get(&player_id).is_some_and(|stored| stored == key)
    }
}

/// The snapshot kept across a restart, guarded separately so draining it
/// never touches the session lock: a mover must not wait on many readers
/// collecting their one-shot view of the finished game.
#[derive(Default)]
struct PreviousGame {
    owed: HashSet<usize>,
    game: Option<Box<dyn Game>>,
}

/// One game session, shared between all connections that address it.
pub struct GameSession {
    n_players: usize,
    game_timeout: Duration,
    inner: Mutex<SessionInner>,
    previous: Mutex<PreviousGame>,
    state_change: Notify,
}

impl GameSession {
    /// A fresh session for `players` participants. The no-delay set starts
    /// out holding every effective id so everyone can read the initial
    /// state before the first move.
    pub fn new(class: GameClass, players: usize, game_timeout: Duration) -> Self {
        GameSession {
            n_players: players,
            game_timeout,
            inner: Mutex::new(SessionInner {
                game: class.instantiate(players),
                class,
                next_id: 0,
                player_ids: HashMap::new(),
                keys: HashMap::new(),
                last_access: Instant::now(),
                no_delay: (0..players * 2).collect(),
                timed_out: false,
                overwritten: false,
            }),
            previous: Mutex::new(PreviousGame::default()),
            state_change: Notify::new(),
        }
    }

    /// Admits the next player: allocates the id, registers the name if one
    /// was given and issues a fresh key. Wakes the admission waiters so they
    /// re-check the roster.
    pub fn next_id(&self, name: &str) -> Result<(usize, String), SessionError> {
        let mut inner = self.inner.lock();
        if inner.next_id == self.n_players {
            return Err(SessionError::Full);
        }
        if !name.is_empty() && inner.player_ids.contains_key(name) {
            return Err(SessionError::NameInUse);
        }

        let player_id = inner.next_id;
        inner.next_id += 1;

        if !name.is_empty() {
            inner.player_ids.insert(name.to_owned(), player_id);
        }

        let key = generate_key();
        inner.keys.insert(player_id, key.clone());
        inner.last_access = Instant::now();
        self.state_change.notify_waiters();

        Ok((player_id, key))
    }

    /// True once all players have joined.
    pub fn full(&self) -> bool {
        let inner = self.inner.lock();
        inner.next_id == self.n_players
    }

    /// Looks up the credentials of a named player, for observers.
    pub fn credentials_for(&self, name: &str) -> Result<(usize, String), SessionError> {
        let inner = self.inner.lock();
        let player_id = inner
            .player_ids
            .get(name)
            .copied()
            .ok_or(SessionError::NoSuchPlayer)?;
        let key = inner
            .keys
            .get(&player_id)
            .cloned()
            .ok_or(SessionError::NoSuchPlayer)?;
        Ok((player_id, key))
    }

    /// Blocks until the roster is complete. Resolves early when the session
    /// gets overwritten; gives up when `game_timeout` passes without any
    /// admission activity, marking the session as timed out and waking the
    /// remaining waiters so they fail the same way.
    pub async fn await_start(&self) -> Result<(), SessionError> {
        loop {
            let notified = self.state_change.notified();
            tokio::pin!(notified);

            let deadline = {
                let inner = self.inner.lock();
                if inner.overwritten {
                    return Err(SessionError::Overwritten);
                }
                if inner.timed_out {
                    return Err(SessionError::AdmissionTimeout);
                }
                if inner.next_id == self.n_players {
                    return Ok(());
                }
                // register before releasing the lock so no notification
                // issued after the release can be missed
                notified.as_mut().enable();
                tokio::time::Instant::from_std(inner.last_access + self.game_timeout)
            };

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut inner = self.inner.lock();
                if inner.next_id == self.n_players {
                    return Ok(());
                }
                if inner.overwritten {
                    return Err(SessionError::Overwritten);
                }
                if !inner.timed_out {
                    inner.timed_out = true;
                    self.state_change.notify_waiters();
                }
                return Err(SessionError::AdmissionTimeout);
            }
        }
    }

    /// Hands a move to the game. The turn check happens under the same lock
    /// acquisition as the move itself, so no interleaving can slip a move
    /// past a stale `current_player` answer. Every outcome, legal or not,
    /// wakes the blocked readers.
    pub fn game_move(
        &self,
        args: &MoveArgs,
        player_id: usize,
        key: &str,
    ) -> Result<(), MoveFailure> {
        let mut inner = self.inner.lock();
        if inner.overwritten {
            return Err(MoveFailure::Session(SessionError::Overwritten));
        }
        if inner.timed_out {
            return Err(MoveFailure::Session(SessionError::Expired));
        }
        if inner.game.game_over() {
            return Err(MoveFailure::Session(SessionError::GameEnded));
        }
        if !inner.key_valid(player_id, key) {
            return Err(MoveFailure::Session(SessionError::InvalidKey));
        }
        if !inner.game.current_player().contains(&player_id) {
            return Err(MoveFailure::Session(SessionError::NotYourTurn));
        }

        let result = inner.game.apply_move(args, player_id);
        inner.last_access = Instant::now();

        if inner.game.game_over() {
            // final move: nobody may block on a game that cannot change anymore
            inner.no_delay.extend(0..self.n_players * 2);
        } else {
            inner.no_delay.insert(player_id);
        }
        self.state_change.notify_waiters();

        result.map_err(MoveFailure::Game)
    }

    /// The long-poll state read.
    ///
    /// Blocks on the state-change notification unless it is the caller's
    /// turn, a previous-game view is owed, an unobserved event is pending in
    /// the no-delay set, or the game is over. The wait is bounded by
    /// `game_timeout` from the session's last access; a reader that outlives
    /// that bound gets the same answer a request against the reaped session
    /// would get.
    pub async fn game_state(
        &self,
        player_id: usize,
        observer: bool,
        key: &str,
        blocking: bool,
    ) -> Result<StateMap, SessionError> {
        let effective_id = if observer {
            player_id + self.n_players
        } else {
            player_id
        };

        let notified = self.state_change.notified();
        tokio::pin!(notified);

        let deadline = {
            let inner = self.inner.lock();
            if inner.overwritten {
                return Err(SessionError::Overwritten);
            }
            if inner.timed_out {
                return Err(SessionError::Expired);
            }
            if !inner.key_valid(player_id, key) {
                return Err(SessionError::InvalidKey);
            }

            let wait = blocking
                && !inner.game.game_over()
                && !inner.game.current_player().contains(&effective_id)
                && !inner.no_delay.contains(&effective_id)
                && !self.previous.lock().owed.contains(&effective_id);
            if wait {
                notified.as_mut().enable();
                Some(tokio::time::Instant::from_std(
                    inner.last_access + self.game_timeout,
                ))
            } else {
                None
            }
        };

        if let Some(deadline) = deadline {
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // nothing touched the session for a whole game_timeout, the
                // reaper is about to collect it
                return Err(SessionError::Expired);
            }
            let inner = self.inner.lock();
            if inner.overwritten {
                return Err(SessionError::Overwritten);
            }
            if inner.timed_out {
                return Err(SessionError::Expired);
            }
        }

        // One-shot previous-game view. This path must not take the session
        // lock: a concurrent mover is not made to wait while readers drain
        // their snapshot.
        {
            let mut previous = self.previous.lock();
            if previous.owed.remove(&effective_id) {
                let state = previous
                    .game
                    .as_deref()
                    .map(|game| assemble_state(game, player_id));
                if previous.owed.is_empty() {
                    previous.game = None;
                }
                if let Some(state) = state {
                    return Ok(state);
                }
            }
        }

        let mut inner = self.inner.lock();
        inner.last_access = Instant::now();
        inner.no_delay.remove(&effective_id);
        Ok(assemble_state(inner.game.as_ref(), player_id))
    }

    /// Replaces the game with a fresh instance. When the old game had ended,
    /// a snapshot of it is kept and every effective id except the starter is
    /// owed exactly one read of it, so nobody misses the outcome.
    pub fn restart(&self, player_id: usize, key: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.overwritten {
            return Err(SessionError::Overwritten);
        }
        if inner.timed_out {
            return Err(SessionError::Expired);
        }
        if !inner.key_valid(player_id, key) {
            return Err(SessionError::InvalidKey);
        }
        if player_id != STARTER_ID {
            return Err(SessionError::RestartForbidden);
        }

        if inner.game.game_over() {
            let mut previous = self.previous.lock();
            previous.game = Some(inner.game.snapshot());
            previous.owed = (0..self.n_players * 2)
                .filter(|&eid| eid != player_id)
                .collect();
        }

        let fresh = inner.class.instantiate(self.n_players);
        inner.game = fresh;
        inner.no_delay = (0..self.n_players * 2).collect();
        inner.last_access = Instant::now();
        self.state_change.notify_waiters();

        Ok(())
    }

    /// Terminal flag set when a new session takes over this `(game, token)`
    /// slot. Wakes all waiters so they observe the flag.
    pub fn mark_overwritten(&self) {
        self.inner.lock().overwritten = true;
        self.state_change.notify_waiters();
    }

    /// Terminal flag set by the reaper.
    pub fn mark_timed_out(&self) {
        self.inner.lock().timed_out = true;
        self.state_change.notify_waiters();
    }

    /// Whether the session has seen no access for longer than the game
    /// timeout.
    pub fn is_idle(&self, now: Instant) -> bool {
        let inner = self.inner.lock();
        now > inner.last_access + self.game_timeout
    }

    #[cfg(test)]
    pub fn n_players(&self) -> usize {
        self.n_players
    }
}

/// The state as sent to the client: the game's view for this player plus
/// the ids currently allowed to move and the game-over flag.
fn assemble_state(game: &dyn Game, player_id: usize) -> StateMap {
    let mut state = game.state(player_id);
    state.insert("current".to_owned(), json!(game.current_player()));
    state.insert("gameover".to_owned(), Value::Bool(game.game_over()));
    state
}

fn generate_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LENGTH)
        .map(char::from)
        .collect()
}
