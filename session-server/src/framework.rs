//! Request dispatch and the session registry.
//!
//! The framework sits between the raw connections and the sessions: it
//! validates the request fields, routes by the `type` key, keeps the map of
//! active sessions keyed by `(game, token)`, and runs the reaper that
//! collects idle sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use game_backbone::{GameClass, GameRegistry, MoveArgs};
use protocol::{ErrorSource, Response};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::session::{GameSession, MoveFailure, SessionError};

/// Protocol-level rejections produced before a session (or the game inside
/// it) gets involved.
#[derive(Debug, Error)]
enum FrameworkError {
    #[error("{0}")]
    Field(String),
    #[error("invalid request type")]
    UnknownType,
    #[error("no such game")]
    NoSuchGame,
    #[error("no such game session")]
    NoSuchSession,
    #[error("invalid number of players")]
    InvalidPlayerCount,
    #[error("game has not yet started")]
    NotStarted,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Everything a handler can fail with. Framework errors become tagged
/// strings, game rejections keep their payload.
enum HandlerError {
    Framework(FrameworkError),
    Game(Value),
}

impl HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Framework(err) => {
                Response::error_text(ErrorSource::Framework, err.to_string())
            }
            HandlerError::Game(payload) => Response::error(ErrorSource::Game, payload),
        }
    }
}

impl From<FrameworkError> for HandlerError {
    fn from(err: FrameworkError) -> Self {
        HandlerError::Framework(err)
    }
}

impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        HandlerError::Framework(FrameworkError::Session(err))
    }
}

impl From<MoveFailure> for HandlerError {
    fn from(err: MoveFailure) -> Self {
        match err {
            MoveFailure::Session(err) => err.into(),
            MoveFailure::Game(rejected) => HandlerError::Game(rejected.0),
        }
    }
}

type SessionKey = (String, String);

/// The framework instance shared by all connection tasks.
pub struct Framework {
    registry: GameRegistry,
    sessions: Mutex<HashMap<SessionKey, Arc<GameSession>>>,
    game_timeout: Duration,
    request_size_max: usize,
}

impl Framework {
    pub fn new(registry: GameRegistry, config: &ServerConfig) -> Self {
        Framework {
            registry,
            sessions: Mutex::new(HashMap::new()),
            game_timeout: config.game_timeout(),
            request_size_max: config.request_size_max,
        }
    }

    /// Handles one parsed client request and always produces a response.
    pub async fn handle(&self, request: Value) -> Response {
        tracing::debug!(target: "framework::request", request = %request, "request");

        let response = match self.dispatch(&request).await {
            Ok(data) => Response::ok(data),
            Err(err) => err.into_response(),
        };

        if tracing::enabled!(target: "framework::response", tracing::Level::DEBUG) {
            if let Ok(text) = serde_json::to_string(&response) {
                tracing::debug!(target: "framework::response", response = %text, "response");
            }
        }
        response
    }

    async fn dispatch(&self, request: &Value) -> Result<Value, HandlerError> {
        match required_str(request, "type")? {
            "join" => self.join(request).await,
            "move" => self.submit_move(request).await,
            "state" => self.state(request).await,
            "observe" => self.observe(request).await,
            "restart" => self.restart(request).await,
            _ => Err(FrameworkError::UnknownType.into()),
        }
    }

    /// Start-or-join. A request carrying `players` may create the session
    /// (or replace a full one); without `players` it can only join an
    /// existing, not yet full session. Blocks until the roster completes.
    async fn join(&self, request: &Value) -> Result<Value, HandlerError> {
        let game = required_str(request, "game")?;
        let token = required_str(request, "token")?;
        let name = required_str(request, "name")?;
        let players = optional_int(request, "players")?;

        let class = *self
            .registry
            .get(game)
            .ok_or(FrameworkError::NoSuchGame)?;

        let key = (game.to_owned(), token.to_owned());

        // Session resolution and id assignment happen under the registry
        // lock, which serializes concurrent joins on the same slot.
        let (session, player_id, player_key) = {
            let mut sessions = self.sessions.lock().await;
            let session = match sessions.get(&key) {
                Some(existing) if !existing.full() => existing.clone(),
                Some(existing) => {
                    let Some(players) = players else {
                        return Err(SessionError::Full.into());
                    };
                    let players = validated_player_count(&class, players)?;
                    // a full slot is taken over: the old session resolves
                    // its waiters with the overwritten flag
                    existing.mark_overwritten();
                    tracing::info!(target: "framework", game, token, "game session overwritten");
                    let fresh = Arc::new(GameSession::new(class, players, self.game_timeout));
                    sessions.insert(key.clone(), fresh.clone());
                    fresh
                }
                None => {
                    let Some(players) = players else {
                        return Err(FrameworkError::NoSuchSession.into());
                    };
                    let players = validated_player_count(&class, players)?;
                    tracing::info!(target: "framework", game, token, players, "new game session");
                    let fresh = Arc::new(GameSession::new(class, players, self.game_timeout));
                    sessions.insert(key.clone(), fresh.clone());
                    fresh
                }
            };
            let (player_id, player_key) = session.next_id(name)?;
            (session, player_id, player_key)
        };

        if let Err(err) = session.await_start().await {
            if err == SessionError::AdmissionTimeout {
                self.remove_if_current(&key, &session).await;
                tracing::info!(target: "framework", game, token, "game session timed out waiting for players");
            }
            return Err(err.into());
        }

        Ok(json!({
            "player_id": player_id,
            "key": player_key,
            "request_size_max": self.request_size_max,
        }))
    }

    async fn submit_move(&self, request: &Value) -> Result<Value, HandlerError> {
        let game = required_str(request, "game")?;
        let token = required_str(request, "token")?;
        let player_id = required_player_id(request)?;
        let key = required_str(request, "key")?;
        let args = required_map(request, "move")?;

        let session = self.resolve(game, token).await?;
        session.game_move(args, player_id, key)?;
        Ok(Value::Null)
    }

    async fn state(&self, request: &Value) -> Result<Value, HandlerError> {
        let game = required_str(request, "game")?;
        let token = required_str(request, "token")?;
        let player_id = required_player_id(request)?;
        let key = required_str(request, "key")?;
        let observer = required_bool(request, "observer")?;
        let blocking = optional_bool(request, "blocking")?.unwrap_or(true);

        let session = self.resolve(game, token).await?;
        let state = session.game_state(player_id, observer, key, blocking).await?;
        Ok(Value::Object(state))
    }

    /// Observing resolves a named player's credentials so a passive client
    /// can read that player's view.
    async fn observe(&self, request: &Value) -> Result<Value, HandlerError> {
        let game = required_str(request, "game")?;
        let token = required_str(request, "token")?;
        let name = required_str(request, "name")?;

        let session = self.resolve(game, token).await?;
        if !session.full() {
            return Err(FrameworkError::NotStarted.into());
        }
        let (player_id, key) = session.credentials_for(name)?;
        Ok(json!({"player_id": player_id, "key": key}))
    }

    async fn restart(&self, request: &Value) -> Result<Value, HandlerError> {
        let game = required_str(request, "game")?;
        let token = required_str(request, "token")?;
        let player_id = required_player_id(request)?;
        let key = required_str(request, "key")?;

        let session = self.resolve(game, token).await?;
        session.restart(player_id, key)?;
        tracing::info!(target: "framework", game, token, "game restarted");
        Ok(Value::Null)
    }

    async fn resolve(&self, game: &str, token: &str) -> Result<Arc<GameSession>, FrameworkError> {
        if self.registry.get(game).is_none() {
            return Err(FrameworkError::NoSuchGame);
        }
        let sessions = self.sessions.lock().await;
        sessions
            .get(&(game.to_owned(), token.to_owned()))
            .cloned()
            .ok_or(FrameworkError::NoSuchSession)
    }

    /// Removes a session from the registry unless the slot has already been
    /// handed to a successor.
    async fn remove_if_current(&self, key: &SessionKey, session: &Arc<GameSession>) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(key);
        }
    }

    /// One reaper sweep: drops every session idle for longer than the game
    /// timeout and marks it so late readers resolve with an error.
    pub async fn reap_idle_sessions(&self) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|(game, token), session| {
            let idle = session.is_idle(now);
            if idle {
                session.mark_timed_out();
                tracing::info!(target: "framework", game = %game, token = %token, "removing idle game session");
            }
            !idle
        });
    }

    /// The reaper interval, identical to the idle bound itself.
    pub fn reap_interval(&self) -> Duration {
        self.game_timeout
    }
}

// Field validation. Requests are arbitrary JSON; the checks produce the
// exact messages clients rely on.

fn missing(key: &str, type_name: &str) -> FrameworkError {
    FrameworkError::Field(format!("key '{}' of type {} missing", key, type_name))
}

fn mistyped(key: &str, type_name: &str) -> FrameworkError {
    FrameworkError::Field(format!("value of key '{}' must be of type {}", key, type_name))
}

fn required_str<'a>(request: &'a Value, key: &str) -> Result<&'a str, FrameworkError> {
    match request.get(key) {
        None => Err(missing(key, "str")),
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(mistyped(key, "str")),
    }
}

fn required_bool(request: &Value, key: &str) -> Result<bool, FrameworkError> {
    match request.get(key) {
        None => Err(missing(key, "bool")),
        Some(Value::Bool(value)) => Ok(*value),
        Some(_) => Err(mistyped(key, "bool")),
    }
}

fn required_map<'a>(request: &'a Value, key: &str) -> Result<&'a MoveArgs, FrameworkError> {
    match request.get(key) {
        None => Err(missing(key, "map")),
        Some(Value::Object(value)) => Ok(value),
        Some(_) => Err(mistyped(key, "map")),
    }
}

fn required_int(request: &Value, key: &str) -> Result<i64, FrameworkError> {
    match request.get(key) {
        None => Err(missing(key, "int")),
        Some(Value::Number(value)) if value.is_i64() => Ok(value.as_i64().unwrap_or_default()),
        Some(_) => Err(mistyped(key, "int")),
    }
}

/// `player_id` must be an integer; ids outside the issued range simply fail
/// the key check later, exactly like any other wrong credential.
fn required_player_id(request: &Value) -> Result<usize, FrameworkError> {
    let raw = required_int(request, "player_id")?;
    usize::try_from(raw).map_err(|_| SessionError::InvalidKey.into())
}

fn optional_bool(request: &Value, key: &str) -> Result<Option<bool>, FrameworkError> {
    match request.get(key) {
        None => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(mistyped(key, "bool")),
    }
}

fn optional_int(request: &Value, key: &str) -> Result<Option<i64>, FrameworkError> {
    match request.get(key) {
        None => Ok(None),
        Some(Value::Number(value)) if value.is_i64() => Ok(value.as_i64()),
        Some(_) => Err(mistyped(key, "int")),
    }
}

/// The requested player count, checked against the class bounds. Counts
/// outside the representable range are just as invalid as out-of-bounds
/// ones.
fn validated_player_count(class: &GameClass, raw: i64) -> Result<usize, FrameworkError> {
    usize::try_from(raw)
        .ok()
        .filter(|&count| class.player_count_allowed(count))
        .ok_or(FrameworkError::InvalidPlayerCount)
}
