//! Client session runtime.
//!
//! A session runs up to four independent tasks:
//! - leaderboard feed: players snapshots -> `LeaderboardView`
//! - chat feed: chat snapshots -> `ChatWindow`
//! - game loop: sole owner of `PlayerState`; ticks and applies commands
//! - flush loop: periodically hands the latest snapshot to the `SyncCoordinator`
//!
//! Tasks share state only through `watch` channels carrying whole snapshots,
//! so readers never observe a half-applied mutation.

use crate::config::SessionConfig;
use crate::coordinator::{find_existing, reconcile_join, SyncCoordinator, SyncStatus};
use crate::view::{build_chat_window, build_leaderboard, ChatWindow, LeaderboardView};
use crate::SessionError;
use clicker_core::{find_upgrade, validate_chat_text, ChatDocument, DisplayName, PlayerId};
use clicker_econ::{
    upgrade_cost, AchievementUnlocked, EconError, PlayerSnapshot, PlayerState, Purchase,
};
use clicker_store::{
    CollectionPaths, CollectionSnapshot, IdentityProvider, Patch, RemoteStore, Subscription,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Field the store stamps on every chat message.
pub const CHAT_TIMESTAMP_FIELD: &str = "timestamp";

const UNLOCK_CHANNEL_CAPACITY: usize = 64;

/// Background tasks owned by a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    LeaderboardFeed,
    ChatFeed,
    GameLoop,
    FlushLoop,
}

enum Command {
    Click,
    Purchase {
        upgrade: String,
        reply: oneshot::Sender<Result<Purchase, EconError>>,
    },
}

struct Joined {
    display_name: DisplayName,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlayerSnapshot>,
    sync: watch::Receiver<SyncStatus>,
}

/// One client's connection to the shared game.
pub struct Session<S> {
    store: Arc<S>,
    config: SessionConfig,
    paths: CollectionPaths,
    player_id: PlayerId,
    leaderboard_tx: watch::Sender<Arc<LeaderboardView>>,
    chat_tx: watch::Sender<Arc<ChatWindow>>,
    unlocks: broadcast::Sender<AchievementUnlocked>,
    joined: Option<Joined>,
    tasks: JoinSet<()>,
    handles: HashMap<TaskKind, AbortHandle>,
}

impl<S: RemoteStore> Session<S> {
    /// Wait for the identity, then start the shared-view feeds.
    ///
    /// Fails with `NotReady` when the identity provider reports no identity.
    /// Feed subscription failures are logged; the views then stay empty until
    /// `reconnect_feeds` succeeds.
    pub async fn start<I: IdentityProvider>(
        store: Arc<S>,
        identity: &I,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let player_id = identity.ready().await.ok_or(SessionError::NotReady)?;
        let paths = config.paths();
        let (leaderboard_tx, _) = watch::channel(Arc::new(LeaderboardView::default()));
        let (chat_tx, _) = watch::channel(Arc::new(ChatWindow::default()));
        let (unlocks, _) = broadcast::channel(UNLOCK_CHANNEL_CAPACITY);
        let mut session = Self {
            store,
            config,
            paths,
            player_id,
            leaderboard_tx,
            chat_tx,
            unlocks,
            joined: None,
            tasks: JoinSet::new(),
            handles: HashMap::new(),
        };
        if let Err(e) = session.reconnect_feeds() {
            warn!(player = %session.player_id, error = %e, "shared view unavailable");
        }
        info!(player = %session.player_id, app = %session.config.app_id, "session started");
        Ok(session)
    }

    /// (Re)open both realtime feeds, replacing any running feed tasks.
    pub fn reconnect_feeds(&mut self) -> Result<(), SessionError> {
        let players = self.store.subscribe(&self.paths.players)?;
        let chat = self.store.subscribe(&self.paths.chat)?;
        let leaderboard_tx = self.leaderboard_tx.clone();
        self.spawn(
            TaskKind::LeaderboardFeed,
            run_feed(players, move |snap: &CollectionSnapshot| {
                leaderboard_tx.send_replace(Arc::new(build_leaderboard(snap)));
            }),
        );
        let chat_tx = self.chat_tx.clone();
        let limit = self.config.chat_window;
        self.spawn(
            TaskKind::ChatFeed,
            run_feed(chat, move |snap: &CollectionSnapshot| {
                chat_tx.send_replace(Arc::new(build_chat_window(snap, limit)));
            }),
        );
        Ok(())
    }

    /// Enter the game under `display_name`.
    ///
    /// A stored record for this identity becomes the starting state. The
    /// state is marked dirty so the first flush announces the player. A stored
    /// record that cannot be adopted fails the join and is left untouched.
    pub async fn join(&mut self, display_name: &str) -> Result<(), SessionError> {
        if self.joined.is_some() {
            return Err(SessionError::AlreadyJoined);
        }
        let display_name = DisplayName::parse(display_name)?;
        let current = self.store.subscribe(&self.paths.players)?.current();
        let existing = find_existing(&current, &self.player_id)?;
        let state = reconcile_join(existing.as_ref())?;

        let (state_tx, state_rx) = watch::channel(state.snapshot());
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let coordinator = SyncCoordinator::new(
            Arc::clone(&self.store),
            &self.paths,
            self.player_id.clone(),
            display_name.clone(),
        );

        self.spawn(
            TaskKind::GameLoop,
            run_game(
                state,
                command_rx,
                state_tx,
                self.unlocks.clone(),
                self.config.tick_interval(),
                self.config.click_gain,
            ),
        );
        self.spawn(
            TaskKind::FlushLoop,
            run_flush(
                coordinator,
                state_rx.clone(),
                status_tx,
                self.config.flush_interval(),
            ),
        );
        info!(
            player = %self.player_id,
            name = %display_name,
            restored = existing.is_some(),
            "joined"
        );
        self.joined = Some(Joined {
            display_name,
            commands,
            state: state_rx,
            sync: status_rx,
        });
        Ok(())
    }

    fn joined(&self) -> Result<&Joined, SessionError> {
        self.joined.as_ref().ok_or(SessionError::NotJoined)
    }

    /// One manual click. Applied by the game loop in order with other commands.
    pub fn click(&self) -> Result<(), SessionError> {
        self.joined()?
            .commands
            .send(Command::Click)
            .map_err(|_| SessionError::Closed)
    }

    /// Buy one unit of `upgrade`. Unaffordable purchases return an error and change nothing.
    pub async fn purchase(&self, upgrade: &str) -> Result<Purchase, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.joined()?
            .commands
            .send(Command::Purchase {
                upgrade: upgrade.to_string(),
                reply,
            })
            .map_err(|_| SessionError::Closed)?;
        let result = rx.await.map_err(|_| SessionError::Closed)?;
        Ok(result?)
    }

    /// Post a chat message under this session's display name.
    pub async fn send_chat(&self, text: &str) -> Result<String, SessionError> {
        let joined = self.joined()?;
        let text = validate_chat_text(text)?;
        let doc = ChatDocument {
            username: joined.display_name.to_string(),
            text,
            author_id: Some(self.player_id.clone()),
            timestamp: None,
        };
        let patch = Patch::from_serialize(&doc)?.server_timestamp(CHAT_TIMESTAMP_FIELD);
        let id = self.store.append(&self.paths.chat, patch).await?;
        debug!(player = %self.player_id, message = %id, "chat message sent");
        Ok(id)
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn paths(&self) -> &CollectionPaths {
        &self.paths
    }

    pub fn is_joined(&self) -> bool {
        self.joined.is_some()
    }

    /// Latest local state, once joined.
    pub fn snapshot(&self) -> Option<PlayerSnapshot> {
        self.joined.as_ref().map(|j| j.state.borrow().clone())
    }

    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.joined.as_ref().map(|j| j.sync.borrow().clone())
    }

    /// Whether local changes are waiting for a successful flush.
    pub fn is_dirty(&self) -> bool {
        match &self.joined {
            Some(j) => {
                let revision = j.state.borrow().revision;
                j.sync.borrow().is_dirty_at(revision)
            }
            None => false,
        }
    }

    /// Price of the next unit of `upgrade` for the current local state.
    pub fn cost_of_next(&self, upgrade: &str) -> Option<f64> {
        let def = find_upgrade(upgrade)?;
        let owned = self
            .snapshot()?
            .inventory
            .get(&def.upgrade_id())
            .copied()
            .unwrap_or(0);
        Some(upgrade_cost(def.base_cost, owned))
    }

    pub fn can_afford(&self, upgrade: &str) -> bool {
        match (self.cost_of_next(upgrade), self.snapshot()) {
            (Some(cost), Some(snap)) => snap.score >= cost,
            _ => false,
        }
    }

    pub fn leaderboard(&self) -> Arc<LeaderboardView> {
        Arc::clone(&self.leaderboard_tx.borrow())
    }

    pub fn chat(&self) -> Arc<ChatWindow> {
        Arc::clone(&self.chat_tx.borrow())
    }

    pub fn watch_leaderboard(&self) -> watch::Receiver<Arc<LeaderboardView>> {
        self.leaderboard_tx.subscribe()
    }

    pub fn watch_chat(&self) -> watch::Receiver<Arc<ChatWindow>> {
        self.chat_tx.subscribe()
    }

    /// Achievement unlock notifications, from now on.
    pub fn subscribe_unlocks(&self) -> broadcast::Receiver<AchievementUnlocked> {
        self.unlocks.subscribe()
    }

    pub fn is_running(&self, kind: TaskKind) -> bool {
        self.handles
            .get(&kind)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop one task. Returns whether it was running.
    pub fn cancel(&mut self, kind: TaskKind) -> bool {
        match self.handles.remove(&kind) {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                debug!(player = %self.player_id, task = ?kind, "task cancelled");
                running
            }
            None => false,
        }
    }

    /// Stop every task. An in-flight flush may or may not land.
    pub async fn shutdown(mut self) {
        self.handles.clear();
        self.tasks.shutdown().await;
        info!(player = %self.player_id, "session closed");
    }

    fn spawn<F>(&mut self, kind: TaskKind, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Some(previous) = self.handles.remove(&kind) {
            previous.abort();
        }
        let handle = self.tasks.spawn(task);
        self.handles.insert(kind, handle);
    }
}

async fn run_feed<F>(mut subscription: Subscription, mut apply: F)
where
    F: FnMut(&CollectionSnapshot) + Send + 'static,
{
    apply(&*subscription.current());
    loop {
        match subscription.changed().await {
            Ok(snapshot) => apply(&*snapshot),
            Err(e) => {
                warn!(
                    collection = subscription.collection(),
                    error = %e,
                    "realtime feed stopped; view is stale until reconnected"
                );
                break;
            }
        }
    }
}

fn fixed_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    // no catch-up for periods missed while suspended
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run_game(
    mut state: PlayerState,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<PlayerSnapshot>,
    unlocks: broadcast::Sender<AchievementUnlocked>,
    tick_period: Duration,
    click_gain: f64,
) {
    let mut ticker = fixed_interval(tick_period);
    loop {
        let mut reply = None;
        let fired = tokio::select! {
            _ = ticker.tick() => state.tick(),
            command = commands.recv() => match command {
                Some(Command::Click) => match state.click(click_gain) {
                    Ok(fired) => fired,
                    Err(e) => {
                        warn!(error = %e, "click rejected");
                        Vec::new()
                    }
                },
                Some(Command::Purchase { upgrade, reply: tx }) => match state.purchase(&upgrade) {
                    Ok((receipt, fired)) => {
                        debug!(upgrade = %upgrade, cost = receipt.cost, owned = receipt.owned, "purchased");
                        reply = Some((tx, Ok(receipt)));
                        fired
                    }
                    Err(e) => {
                        debug!(upgrade = %upgrade, error = %e, "purchase rejected");
                        reply = Some((tx, Err(e)));
                        Vec::new()
                    }
                },
                None => break,
            },
        };
        if state.revision() != snapshots.borrow().revision {
            snapshots.send_replace(state.snapshot());
        }
        if let Some((tx, result)) = reply {
            let _ = tx.send(result);
        }
        for unlocked in fired {
            info!(achievement = unlocked.id.as_str(), name = unlocked.name, "achievement unlocked");
            let _ = unlocks.send(unlocked);
        }
    }
    debug!("game loop stopped");
}

async fn run_flush<S: RemoteStore>(
    mut coordinator: SyncCoordinator<S>,
    snapshots: watch::Receiver<PlayerSnapshot>,
    status: watch::Sender<SyncStatus>,
    flush_period: Duration,
) {
    let mut ticker = fixed_interval(flush_period);
    loop {
        ticker.tick().await;
        let snapshot = snapshots.borrow().clone();
        coordinator.flush(&snapshot).await;
        status.send_replace(coordinator.status().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clicker_core::{AchievementId, UpgradeId};
    use clicker_store::{DeferredIdentity, InMemoryStore, StaticIdentity};
    use serde_json::json;

    const FLUSH: Duration = Duration::from_millis(2_100);

    async fn started(store: &Arc<InMemoryStore>, id: &str) -> Session<InMemoryStore> {
        Session::start(
            Arc::clone(store),
            &StaticIdentity::new(id),
            SessionConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn join_and_flush_publish_record() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        assert!(matches!(session.click(), Err(SessionError::NotJoined)));

        session.join("  neo ").await.unwrap();
        assert!(session.is_dirty());
        for _ in 0..3 {
            session.click().unwrap();
        }
        tokio::time::sleep(FLUSH).await;

        let doc = store.document(&session.paths().players, "u1").unwrap();
        assert_eq!(doc["displayName"], "neo");
        assert_eq!(doc["score"], 3.0);
        assert_eq!(doc["trophies"], json!(["hello_world"]));
        assert!(doc.contains_key("lastUpdated"));
        assert!(!session.is_dirty());

        let board = session.leaderboard();
        assert_eq!(board.len(), 1);
        assert_eq!(board.entries[0].display_name, "neo");
        assert_eq!(board.total_score, 3.0);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_writes_once() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        session.join("idle").await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.write_count(), 1);
        assert_eq!(session.sync_status().unwrap().total_writes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_accrue_production() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        session.join("neo").await.unwrap();
        for _ in 0..15 {
            session.click().unwrap();
        }
        let bought = session.purchase("cursor").await.unwrap();
        assert_eq!(bought.cost, 15.0);
        assert!(matches!(
            session.purchase("cursor").await,
            Err(SessionError::Econ(EconError::Unaffordable { .. }))
        ));
        assert_eq!(session.cost_of_next("cursor"), Some(17.0));
        assert!(!session.can_afford("cursor"));

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        let snap = session.snapshot().unwrap();
        assert_eq!(snap.score, 15.0);
        assert_eq!(snap.production_rate, 1.0);
        assert_eq!(snap.inventory.get(&UpgradeId::new("cursor")), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_restores_remote_progress() {
        let store = Arc::new(InMemoryStore::new());
        let paths = SessionConfig::default().paths();
        store
            .merge_upsert(
                &paths.players,
                "u1",
                Patch::from_serialize(&json!({
                    "displayName": "neo",
                    "score": 500.0,
                    "cps": 5.0,
                    "inventory": {"floppy": 1},
                    "trophies": ["hello_world"],
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let mut session = started(&store, "u1").await;
        session.join("neo").await.unwrap();
        let snap = session.snapshot().unwrap();
        assert_eq!(snap.score, 500.0);
        assert_eq!(snap.production_rate, 5.0);
        assert_eq!(snap.unlocked_achievements, vec![AchievementId::new("hello_world")]);
        assert!(matches!(
            session.join("neo").await,
            Err(SessionError::AlreadyJoined)
        ));
    }

    async fn seed(store: &InMemoryStore, body: serde_json::Value) {
        let paths = SessionConfig::default().paths();
        store
            .merge_upsert(&paths.players, "u1", Patch::from_serialize(&body).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_tolerates_foreign_field_shapes() {
        let store = Arc::new(InMemoryStore::new());
        seed(
            &store,
            json!({
                "score": 500.0,
                "cps": null,
                "inventory": {"cursor": 1},
                "lastUpdated": {"seconds": 1_700_000_000, "nanoseconds": 0},
            }),
        )
        .await;

        let mut session = started(&store, "u1").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.leaderboard().len(), 1);
        assert_eq!(session.leaderboard().total_score, 500.0);

        session.join("neo").await.unwrap();
        assert_eq!(session.snapshot().unwrap().score, 500.0);
        tokio::time::sleep(FLUSH).await;
        let doc = store.document(&session.paths().players, "u1").unwrap();
        assert!(doc["score"].as_f64().unwrap() >= 500.0);
        assert_eq!(doc["cps"], 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_stored_record_is_not_overwritten() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, json!({"displayName": "neo", "score": "lots"})).await;

        let mut session = started(&store, "u1").await;
        assert!(matches!(
            session.join("neo").await,
            Err(SessionError::Econ(EconError::InvalidRecord(_)))
        ));
        assert!(!session.is_joined());
        tokio::time::sleep(FLUSH).await;
        assert_eq!(store.write_count(), 1);
        let doc = store.document(&session.paths().players, "u1").unwrap();
        assert_eq!(doc["score"], "lots");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_retried() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        store.fail_next_writes(1);
        session.join("neo").await.unwrap();
        session.click().unwrap();

        tokio::time::sleep(FLUSH).await;
        let status = session.sync_status().unwrap();
        assert_eq!(status.consecutive_failures, 1);
        assert!(session.is_dirty());
        assert!(store.document(&session.paths().players, "u1").is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!session.is_dirty());
        let doc = store.document(&session.paths().players, "u1").unwrap();
        assert_eq!(doc["score"], 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_does_not_stall_ticks() {
        let store = Arc::new(InMemoryStore::new());
        store.set_latency(Some(Duration::from_secs(30)));
        let mut session = started(&store, "u1").await;
        session.join("neo").await.unwrap();
        for _ in 0..15 {
            session.click().unwrap();
        }
        session.purchase("cursor").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(session.snapshot().unwrap().score, 10.0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unlocks_are_broadcast() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        session.join("neo").await.unwrap();
        let mut unlocks = session.subscribe_unlocks();
        session.click().unwrap();
        let first = unlocks.recv().await.unwrap();
        assert_eq!(first.id.as_str(), "hello_world");
    }

    #[tokio::test(start_paused = true)]
    async fn chat_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        assert!(matches!(
            session.send_chat("hi").await,
            Err(SessionError::NotJoined)
        ));
        session.join("neo").await.unwrap();
        assert!(matches!(
            session.send_chat("   ").await,
            Err(SessionError::Validation(_))
        ));
        session.send_chat("  hello world ").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let chat = session.chat();
        assert_eq!(chat.len(), 1);
        let msg = chat.latest().unwrap();
        assert_eq!(msg.text, "hello world");
        assert_eq!(msg.author_name, "neo");
        assert_eq!(msg.author_id, Some(PlayerId("u1".into())));
        assert!(msg.timestamp.is_some());

        store.set_offline(true);
        assert!(matches!(
            session.send_chat("lost").await,
            Err(SessionError::Store(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unready_identity_blocks_start() {
        let store = Arc::new(InMemoryStore::new());
        let identity = DeferredIdentity::new();
        identity.sign_out();
        let result = Session::start(store, &identity, SessionConfig::default()).await;
        assert!(matches!(result, Err(SessionError::NotReady)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_feed_goes_stale_until_reconnected() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        let mut other = started(&store, "u2").await;
        other.join("other").await.unwrap();

        store.disconnect_subscribers(&session.paths().players);
        tokio::time::sleep(FLUSH).await;
        assert!(session.leaderboard().is_empty());
        assert!(!session.is_running(TaskKind::LeaderboardFeed));

        session.reconnect_feeds().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.leaderboard().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_flush_loop_stops_writing() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = started(&store, "u1").await;
        session.join("neo").await.unwrap();
        assert!(session.cancel(TaskKind::FlushLoop));
        assert!(!session.cancel(TaskKind::FlushLoop));
        session.click().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.write_count(), 0);
        assert!(session.is_dirty());
        // the game loop keeps running
        assert_eq!(session.snapshot().unwrap().score, 1.0);
        assert!(session.is_running(TaskKind::GameLoop));
    }
}
