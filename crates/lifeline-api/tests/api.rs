//! Drives the full router in memory: auth, the function endpoints and the
//! chat that an accepted offer opens.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use lifeline_api::auth::{AppState, AppStateInner};
use lifeline_db::Database;
use lifeline_gateway::dispatcher::Dispatcher;
use lifeline_types::models::Role;

struct TestApp {
    router: Router,
    state: AppState,
}

struct User {
    id: Uuid,
    token: String,
}

fn app() -> TestApp {
    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        jwt_secret: "integration-test-secret".into(),
        dispatcher: Dispatcher::new(),
        max_responders: 3,
    });
    TestApp {
        router: lifeline_api::router(state.clone()),
        state,
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(&self, username: &str) -> User {
        let (status, body) = self
            .call(
                "POST",
                "/auth/register",
                None,
                Some(json!({ "username": username, "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        User {
            id: body["user_id"].as_str().unwrap().parse().unwrap(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    async fn alert(&self, user: &User, action: &str, payload: Value) -> (StatusCode, Value) {
        self.call(
            "POST",
            "/functions/alert-manager",
            Some(&user.token),
            Some(json!({ "action": action, "payload": payload })),
        )
        .await
    }

    async fn admin(&self, user: &User, action: &str, payload: Value) -> (StatusCode, Value) {
        self.call(
            "POST",
            "/functions/admin-manager",
            Some(&user.token),
            Some(json!({ "action": action, "payload": payload })),
        )
        .await
    }

    fn promote(&self, user: &User, role: Role) {
        self.state.db.set_role(user.id, role).unwrap();
    }
}

#[tokio::test]
async fn auth_round_trip_and_guard() {
    let app = app();

    let (status, body) = app.call("GET", "/profiles/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");

    let (status, _) = app.call("GET", "/profiles/me", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let sam = app.register("sam").await;
    let (status, body) = app
        .call(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "sam", "password": "another password" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Username is already taken.");

    let (status, body) = app
        .call(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "sam", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");

    let (status, body) = app
        .call(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "sam", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "user");

    let (status, body) = app.call("GET", "/profiles/me", Some(&sam.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "sam");
}

#[tokio::test]
async fn alert_offer_accept_chat_resolve() {
    let app = app();
    let activator = app.register("river").await;
    let helper = app.register("harbor").await;

    let (status, body) = app.alert(&activator, "create", json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let alert_id = body["alert_id"].as_str().unwrap().to_string();

    let (status, body) = app.alert(&activator, "create", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "An active alert already exists for this user.");

    let (_, body) = app.call("POST", "/functions/fetch-dashboard", Some(&activator.token), None).await;
    assert_eq!(body["data"]["activeAlertsCount"], 1);

    let (_, feed) = app.call("GET", "/alerts", Some(&activator.token), None).await;
    assert_eq!(feed, json!([]));
    let (status, feed) = app.call("GET", "/alerts", Some(&helper.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed.as_array().unwrap().len(), 1);
    assert_eq!(feed[0]["creator_username"], "river");
    assert_eq!(feed[0]["creator_avatar_url"], Value::Null);

    let (status, body) = app
        .alert(&activator, "send_offer", json!({ "alert_id": alert_id, "offer_message": "hi" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "You cannot respond to your own alert.");

    let (status, body) = app.alert(&helper, "send_offer", json!({ "alert_id": alert_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing payload fields");

    let (status, body) = app
        .alert(
            &helper,
            "send_offer",
            json!({ "alert_id": alert_id, "offer_message": "I'm here if you want to talk." }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let uri = format!("/alerts/{alert_id}");
    let (_, body) = app.call("GET", &uri, Some(&helper.token), None).await;
    assert_eq!(body["status"], "fulfilled");

    let uri = format!("/alerts/{alert_id}/offers");
    let (status, _) = app.call("GET", &uri, Some(&helper.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, offers) = app.call("GET", &uri, Some(&activator.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offers[0]["responder_username"], "harbor");
    let offer_id = offers[0]["id"].as_str().unwrap().to_string();

    let (status, body) = app.alert(&helper, "accept_offer", json!({ "offer_id": offer_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Only the alert creator can accept offers.");

    let (status, body) = app.alert(&activator, "accept_offer", json!({ "offer_id": offer_id })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let channel_id = body["channel_id"].as_str().unwrap().to_string();

    let messages = format!("/channels/{channel_id}/messages");
    let (status, _) = app
        .call("POST", &messages, Some(&helper.token), Some(json!({ "content": "   " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .call("POST", &messages, Some(&helper.token), Some(json!({ "content": "How are you holding up?" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let outsider = app.register("outsider").await;
    let (status, _) = app.call("GET", &messages, Some(&outsider.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, chats) = app.call("GET", "/channels", Some(&activator.token), None).await;
    assert_eq!(chats[0]["other_participant"]["username"], "harbor");
    assert_eq!(chats[0]["has_unread_messages"], true);

    let (status, history) = app.call("GET", &messages, Some(&activator.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (_, chats) = app.call("GET", "/channels", Some(&activator.token), None).await;
    assert_eq!(chats[0]["has_unread_messages"], false);

    let older = format!("{messages}?before={}", history[0]["id"].as_str().unwrap());
    let (status, page) = app.call("GET", &older, Some(&activator.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page, json!([]));
    let unknown = format!("{messages}?before={}", Uuid::new_v4());
    let (status, body) = app.call("GET", &unknown, Some(&activator.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Message not found.");

    let (status, body) = app
        .alert(&activator, "resolve", json!({ "alert_id": alert_id, "outcome": "great" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid outcome value.");

    let (status, body) = app
        .alert(&activator, "resolve", json!({ "alert_id": alert_id, "outcome": "good" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app.alert(&activator, "cancel", json!({ "alert_id": alert_id })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Alert not found, not owned by you, or already closed.");

    let (status, _) = app
        .call(
            "POST",
            "/feedback",
            Some(&activator.token),
            Some(json!({ "alert_id": alert_id, "supporter_id": helper.id, "rating": 6 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = app
        .call(
            "POST",
            "/feedback",
            Some(&activator.token),
            Some(json!({ "alert_id": alert_id, "supporter_id": helper.id, "rating": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (_, body) = app.call("POST", "/functions/award-badges", Some(&helper.token), None).await;
    assert_eq!(body["message"], "Checked badges for 1 responses.");
    assert_eq!(body["awarded"], json!(["First Responder"]));
}

#[tokio::test]
async fn alert_manager_envelope_errors() {
    let app = app();
    let user = app.register("wren").await;

    let (status, body) = app
        .call("POST", "/functions/alert-manager", Some(&user.token), Some(json!({ "payload": {} })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required field: action");

    let (_, body) = app.alert(&user, "explode", json!({})).await;
    assert_eq!(body["error"], "Invalid action: explode");

    let (_, body) = app.alert(&user, "accept_offer", json!({})).await;
    assert_eq!(body["error"], "Missing payload field: offer_id");

    let (_, body) = app.alert(&user, "resolve", json!({ "alert_id": Uuid::new_v4() })).await;
    assert_eq!(body["error"], "Missing payload fields: alert_id, outcome");
}

#[tokio::test]
async fn admin_manager_permissions() {
    let app = app();
    let root = app.register("root").await;
    let member = app.register("member").await;

    let (status, body) = app
        .admin(&member, "set_role", json!({ "target_user_id": member.id, "new_role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Permission denied. You must be a Super Admin.");

    app.promote(&root, Role::SuperAdmin);
    let (status, body) = app
        .admin(&root, "set_role", json!({ "target_user_id": Uuid::new_v4(), "new_role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Target user not found.");

    let (status, body) = app
        .admin(&root, "set_role", json!({ "target_user_id": member.id, "new_role": "moderator" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .admin(
            &root,
            "set_verification_status",
            json!({ "target_user_id": member.id, "type": "military", "status": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Verification status updated.");

    let (status, body) = app
        .admin(
            &root,
            "update_user_profile",
            json!({
                "target_user_id": member.id,
                "updates": { "city": "Tacoma", "role": "super_admin", "mood_status": "good" },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let profile = app.state.db.get_profile(member.id).unwrap().unwrap();
    assert_eq!(profile.role, Role::Moderator);
    assert!(profile.military_verified);
    assert_eq!(profile.city.as_deref(), Some("Tacoma"));

    let (_, body) = app.admin(&root, "update_user_profile", json!({ "target_user_id": member.id })).await;
    assert_eq!(body["error"], "Missing target_user_id or updates payload.");
}

#[tokio::test]
async fn suspension_blocks_alerts() {
    let app = app();
    let moderator = app.register("mod").await;
    let troll = app.register("troll").await;
    let friend = app.register("friend").await;
    app.promote(&moderator, Role::Moderator);

    // A chat the troll is already part of, and an open alert they could answer.
    let (_, body) = app.alert(&troll, "create", json!({})).await;
    let troll_alert = body["alert_id"].clone();
    app.alert(&friend, "send_offer", json!({ "alert_id": troll_alert, "offer_message": "hey" }))
        .await;
    let offers = format!("/alerts/{}/offers", troll_alert.as_str().unwrap());
    let (_, offers) = app.call("GET", &offers, Some(&troll.token), None).await;
    let (status, body) = app
        .alert(&troll, "accept_offer", json!({ "offer_id": offers[0]["id"] }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let messages = format!("/channels/{}/messages", body["channel_id"].as_str().unwrap());
    let (_, body) = app.alert(&friend, "create", json!({})).await;
    let friend_alert = body["alert_id"].clone();

    let (status, report) = app
        .call(
            "POST",
            "/reports",
            Some(&moderator.token),
            Some(json!({ "reported_user_id": troll.id, "category": "spam" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{report}");

    let (status, body) = app
        .admin(&troll, "suspend_user", json!({ "target_user_id": moderator.id }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, body) = app
        .admin(
            &moderator,
            "suspend_user",
            json!({ "target_user_id": troll.id, "suspension_duration_days": 100_000 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Suspension cannot exceed 3650 days.");

    let (status, body) = app
        .admin(
            &moderator,
            "suspend_user",
            json!({ "target_user_id": troll.id, "report_id": report["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app.alert(&troll, "create", json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .alert(&troll, "send_offer", json!({ "alert_id": friend_alert, "offer_message": "hi" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, body) = app
        .call("POST", &messages, Some(&troll.token), Some(json!({ "content": "still here" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert!(body["error"].as_str().unwrap().starts_with("Your account is suspended until"));

    // Reading stays open to a suspended user.
    let (status, _) = app.call("GET", &messages, Some(&troll.token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, reports) = app.call("GET", "/reports", Some(&moderator.token), None).await;
    assert_eq!(reports[0]["status"], "resolved");
}

#[tokio::test]
async fn admin_badge_award() {
    let app = app();
    let admin = app.register("keeper").await;
    let member = app.register("member").await;
    let champion = "00000000-0000-0000-0000-0000000000b4";

    let (status, body) = app
        .call("POST", "/functions/award-admin-badge", Some(&admin.token), Some(json!({ "user_id": member.id })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "user_id and badge_id are required.");

    let award = json!({ "user_id": member.id, "badge_id": champion });
    let (status, body) = app
        .call("POST", "/functions/award-admin-badge", Some(&admin.token), Some(award.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Only admins or super_admins can award badges.");

    app.promote(&admin, Role::Admin);
    for _ in 0..2 {
        let (status, body) = app
            .call("POST", "/functions/award-admin-badge", Some(&admin.token), Some(award.clone()))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (_, body) = app.call("POST", "/functions/fetch-dashboard", Some(&member.token), None).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["badges"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["badges"][0]["name"], "Community Champion");

    let uri = format!("/profiles/{}/badges", member.id);
    let (status, badges) = app.call("GET", &uri, Some(&admin.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(badges, json!([{ "id": champion, "name": "Community Champion" }]));

    let uri = format!("/profiles/{}/badges", Uuid::new_v4());
    let (status, body) = app.call("GET", &uri, Some(&admin.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Profile not found.");
}
