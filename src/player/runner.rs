//! Several sessions in one process.

use std::time::Duration;
use tokio::task::JoinSet;

use super::{Player, PlayerConfig, SessionOutcome};

/// Run `sessions` players concurrently, starting one every `stagger`.
///
/// Session `i` gets the id `<base id>-<i>`. Outcomes are returned in session
/// order.
pub async fn run_sessions<F>(
    base: &PlayerConfig,
    sessions: usize,
    stagger: Duration,
    make_player: F,
) -> Vec<SessionOutcome>
where
    F: Fn(PlayerConfig) -> Player,
{
    let mut set = JoinSet::new();
    for i in 0..sessions {
        if i > 0 && !stagger.is_zero() {
            tokio::time::sleep(stagger).await;
        }
        let mut config = base.clone();
        config.session_id = base.session_id.nth(i);
        let player = make_player(config);
        set.spawn(async move { (i, player.start().await) });
    }

    let mut outcomes = Vec::with_capacity(sessions);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(entry) => outcomes.push(entry),
            Err(e) => tracing::error!(error = %e, "Session task panicked"),
        }
    }
    outcomes.sort_by_key(|(i, _)| *i);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}
