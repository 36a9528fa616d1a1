//! Available games. Every new game must be added to this list.

use game_backbone::GameRegistry;

/// Builds the registry of all games this server hosts.
pub fn available_games() -> GameRegistry {
    GameRegistry::new([
        tic_tac_toe::game_class(),
        chat::game_class(),
        echo::game_class(),
    ])
}
