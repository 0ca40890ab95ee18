use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lifeline_db::Database;
use lifeline_types::api::Claims;
use lifeline_types::events::{Audience, GatewayCommand, GatewayEvent};
use lifeline_types::models::Profile;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a new socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Who is on the other end of an identified socket.
struct Session {
    user_id: Uuid,
    username: String,
    is_staff: bool,
}

/// Handle a single WebSocket connection: Identify handshake, Ready, then the
/// event loop until either side closes.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    jwt_secret: String,
    db: Arc<Database>,
) {
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) = wait_for_identify(&mut receiver, &jwt_secret, IDENTIFY_TIMEOUT).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    let user_id = claims.sub;
    let Some(profile) = load_profile(db.clone(), user_id).await else {
        return;
    };

    let session = Session {
        user_id,
        username: profile.username,
        is_staff: profile.role.is_staff(),
    };
    info!("{} ({}) connected to gateway", session.username, session.user_id);

    let ready = GatewayEvent::Ready {
        user_id: session.user_id,
        username: session.username.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, session).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    session: Session,
) {
    let Session {
        user_id,
        username,
        mut is_staff,
    } = session;

    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    // Tell this client who is already here before announcing ourselves
    for (uid, uname) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            username: uname,
            online: true,
        };
        if !send_event(&mut sender, &event).await {
            dispatcher.unregister_user_channel(user_id, conn_id).await;
            return;
        }
    }

    dispatcher.user_online(user_id, username.clone()).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();
    let role_db = db.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !should_deliver(&event, &send_subscriptions, is_staff) {
                        continue;
                    }
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if let Some(staff) = refreshed_staff_flag(&role_db, user_id, &event).await {
                        if staff != is_staff {
                            debug!("{} staff access now {}", user_id, staff);
                        }
                        is_staff = staff;
                    }
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let dispatcher_recv = dispatcher.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &dispatcher_recv,
                            &db,
                            user_id,
                            &username_recv,
                            cmd,
                            &subscriptions,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Audience filter for broadcast events on one connection.
fn should_deliver(event: &GatewayEvent, subscriptions: &Subscriptions, is_staff: bool) -> bool {
    match event.audience() {
        Audience::Everyone => true,
        Audience::Staff => is_staff,
        Audience::Scope(id) => subscriptions
            .read()
            .map(|subs| subs.contains(&id))
            .unwrap_or(false),
    }
}

async fn load_profile(db: Arc<Database>, user_id: Uuid) -> Option<Profile> {
    match tokio::task::spawn_blocking(move || db.get_profile(user_id)).await {
        Ok(Ok(Some(profile))) => Some(profile),
        Ok(Ok(None)) => {
            warn!("Gateway lookup for unknown user {}", user_id);
            None
        }
        Ok(Err(e)) => {
            error!("Gateway profile lookup failed: {}", e);
            None
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            None
        }
    }
}

/// Staff-only delivery follows the current role. A `ProfileUpdated` aimed at
/// this user may carry a role change, so the role is read again.
async fn refreshed_staff_flag(db: &Arc<Database>, user_id: Uuid, event: &GatewayEvent) -> Option<bool> {
    match event {
        GatewayEvent::ProfileUpdated { profile_id } if *profile_id == user_id => {
            load_profile(db.clone(), user_id)
                .await
                .map(|profile| profile.role.is_staff())
        }
        _ => None,
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            true
        }
    }
}

/// Skip anything that is not `Identify` until one arrives, the stream ends
/// or `limit` passes. A bad token ends the wait.
async fn wait_for_identify<S, E>(receiver: &mut S, jwt_secret: &str, limit: Duration) -> Option<Claims>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;
                    return Some(token_data.claims);
                }
            }
        }
        None
    };

    tokio::time::timeout(limit, identify)
        .await
        .ok()
        .flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { scopes } => {
            let requested = scopes.len();
            let allowed = match authorize_scopes(db.clone(), user_id, scopes).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    error!("Scope authorization failed for {}: {}", user_id, e);
                    return;
                }
            };
            if allowed.len() < requested {
                warn!(
                    "{} ({}) denied {} of {} subscription scopes",
                    username,
                    user_id,
                    requested - allowed.len(),
                    requested
                );
            }
            debug!("{} ({}) subscribed to {} scopes", username, user_id, allowed.len());
            if let Ok(mut subs) = subscriptions.write() {
                subs.extend(allowed);
            }
        }

        GatewayCommand::Unsubscribe { scopes } => {
            if let Ok(mut subs) = subscriptions.write() {
                for scope in &scopes {
                    subs.remove(scope);
                }
            }
        }

        GatewayCommand::StartTyping { channel_id } => {
            let subscribed = subscriptions
                .read()
                .map(|subs| subs.contains(&channel_id))
                .unwrap_or(false);
            if subscribed {
                dispatcher.broadcast(GatewayEvent::TypingStart {
                    channel_id,
                    user_id,
                    username: username.to_string(),
                });
            }
        }
    }
}

/// Keep only the scopes this user may watch: chat channels they are in and
/// alerts they created (offers are private to the creator).
async fn authorize_scopes(db: Arc<Database>, user_id: Uuid, scopes: Vec<Uuid>) -> anyhow::Result<Vec<Uuid>> {
    let allowed = tokio::task::spawn_blocking(move || -> lifeline_db::Result<Vec<Uuid>> {
        let mut allowed = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if let Some(channel) = db.get_channel(scope)? {
                if channel.has_participant(user_id) {
                    allowed.push(scope);
                }
                continue;
            }
            if let Some(alert) = db.get_alert(scope)? {
                if alert.created_by == user_id {
                    allowed.push(scope);
                }
            }
        }
        Ok(allowed)
    })
    .await??;
    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::{SystemTime, UNIX_EPOCH};

    use futures_util::stream;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use lifeline_types::models::{ReportStatus, Role};

    const SECRET: &str = "gateway-test-secret";

    fn token(secret: &str, user: Uuid) -> String {
        let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as usize + 3600;
        let claims = Claims {
            sub: user,
            username: "sam".into(),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn text(value: serde_json::Value) -> Result<Message, Infallible> {
        Ok(Message::Text(value.to_string().into()))
    }

    #[tokio::test]
    async fn identify_skips_other_frames() {
        let user = Uuid::new_v4();
        let mut frames = stream::iter(vec![
            Ok(Message::Ping(Vec::new().into())),
            text(json!({ "type": "StartTyping", "data": { "channel_id": Uuid::new_v4() } })),
            text(json!({ "type": "Identify", "data": { "token": token(SECRET, user) } })),
        ]);
        let claims = wait_for_identify(&mut frames, SECRET, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(claims.sub, user);
    }

    #[tokio::test]
    async fn identify_rejects_foreign_token() {
        let forged = token("someone-elses-secret", Uuid::new_v4());
        let mut frames = stream::iter(vec![
            text(json!({ "type": "Identify", "data": { "token": forged } })),
            text(json!({ "type": "Identify", "data": { "token": token(SECRET, Uuid::new_v4()) } })),
        ]);
        assert!(wait_for_identify(&mut frames, SECRET, Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test]
    async fn identify_gives_up_on_silence() {
        let mut silent = stream::pending::<Result<Message, Infallible>>();
        let waited = wait_for_identify(&mut silent, SECRET, Duration::from_millis(20)).await;
        assert!(waited.is_none());

        let mut closed = stream::empty::<Result<Message, Infallible>>();
        assert!(wait_for_identify(&mut closed, SECRET, Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test]
    async fn staff_flag_follows_role_changes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sam = Uuid::new_v4();
        db.create_profile(sam, "sam", "h").unwrap();
        let own = GatewayEvent::ProfileUpdated { profile_id: sam };

        assert_eq!(refreshed_staff_flag(&db, sam, &own).await, Some(false));

        db.set_role(sam, Role::Moderator).unwrap();
        let someone_else = GatewayEvent::ProfileUpdated { profile_id: Uuid::new_v4() };
        assert_eq!(refreshed_staff_flag(&db, sam, &someone_else).await, None);
        assert_eq!(refreshed_staff_flag(&db, sam, &own).await, Some(true));

        db.set_role(sam, Role::User).unwrap();
        assert_eq!(refreshed_staff_flag(&db, sam, &own).await, Some(false));
    }

    #[test]
    fn audience_filtering() {
        let subs: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
        let channel_id = Uuid::new_v4();
        let typing = GatewayEvent::TypingStart {
            channel_id,
            user_id: Uuid::new_v4(),
            username: "sam".into(),
        };
        assert!(!should_deliver(&typing, &subs, true));
        subs.write().unwrap().insert(channel_id);
        assert!(should_deliver(&typing, &subs, false));

        let report = GatewayEvent::ReportChanged {
            report_id: Uuid::new_v4(),
            status: ReportStatus::Pending,
        };
        assert!(!should_deliver(&report, &subs, false));
        assert!(should_deliver(&report, &subs, true));
    }

    #[tokio::test]
    async fn scopes_limited_to_own_channels_and_alerts() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let eve = Uuid::new_v4();
        db.create_profile(alice, "alice", "h").unwrap();
        db.create_profile(bob, "bob", "h").unwrap();
        db.create_profile(eve, "eve", "h").unwrap();
        let alert = db.create_alert(alice, "help").unwrap();
        let sent = db.send_offer(alert.id, bob, "hi", 3).unwrap();
        let channel = db.accept_offer(sent.offer.id, alice).unwrap().channel;

        let scopes = vec![alert.id, channel.id, Uuid::new_v4()];
        let alice_ok = authorize_scopes(db.clone(), alice, scopes.clone()).await.unwrap();
        assert_eq!(alice_ok, vec![alert.id, channel.id]);

        let bob_ok = authorize_scopes(db.clone(), bob, scopes.clone()).await.unwrap();
        assert_eq!(bob_ok, vec![channel.id]);

        let eve_ok = authorize_scopes(db, eve, scopes).await.unwrap();
        assert!(eve_ok.is_empty());
    }
}
