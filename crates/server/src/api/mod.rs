pub mod accounts;
pub mod compositions;
pub mod elements;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::auth::csrf::session_csrf_guard;
use crate::auth::session::{require_session, SessionStore};
use crate::config::ServerConfig;
use crate::store::{CompositionStore, MemberDirectory};
use crate::sync::broadcast::BroadcastRouter;
use crate::ws::authz::TopicGate;

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<ServerConfig>,
    pub members: MemberDirectory,
    pub compositions: CompositionStore,
    pub sessions: SessionStore,
    pub broadcast: Arc<BroadcastRouter>,
    pub gate: TopicGate,
}

pub fn router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/api/v1/rest/accounts/myself", get(accounts::myself))
        .route(
            "/api/v1/rest/compositions",
            get(compositions::list_compositions).post(compositions::create_composition),
        )
        .route(
            "/api/v1/rest/compositions/{composition_id}",
            get(compositions::get_composition)
                .patch(compositions::update_composition)
                .delete(compositions::delete_composition),
        )
        .route(
            "/api/v1/rest/compositions/{composition_id}/elements",
            post(elements::add_element),
        )
        .route(
            "/api/v1/rest/compositions/{composition_id}/elements/{element_id}",
            patch(elements::update_element).delete(elements::delete_element),
        )
        .route(
            "/api/v1/rest/compositions/{composition_id}/elements/{element_id}/position",
            patch(elements::update_element_position),
        )
        .route_layer(middleware::from_fn(require_session));

    Router::new()
        .route("/api/login", post(accounts::login))
        .route("/api/logout", post(accounts::logout))
        .route("/api/v1/rest/csrf", get(accounts::csrf_token))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.sessions.clone(), session_csrf_guard))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{COOKIE, SET_COOKIE},
            Method, Request, StatusCode,
        },
        response::Response,
        Router,
    };
    use ensemble_common::protocol::orders::CompositionEvent;
    use ensemble_common::protocol::ws::WsFrame;
    use ensemble_common::types::Member;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::{router, ApiState};
    use crate::auth::session::SessionStore;
    use crate::config::ServerConfig;
    use crate::store::{seed::seed_demo_data, CompositionStore, MemberDirectory};
    use crate::sync::broadcast::BroadcastRouter;
    use crate::ws::authz::TopicGate;

    struct Harness {
        app: Router,
        state: ApiState,
    }

    /// A client-side credential set, as the browser harness would hold it:
    /// the session cookie, the double-submit cookie, and the single
    /// mutable CSRF token slot.
    #[derive(Clone, Default)]
    struct Client {
        session_cookie: Option<String>,
        xsrf_cookie: Option<String>,
        csrf_header: Option<(String, String)>,
    }

    impl Client {
        fn cookie_header(&self) -> Option<String> {
            let mut parts = Vec::new();
            if let Some(session) = &self.session_cookie {
                parts.push(format!("ENSEMBLE_SESSION={session}"));
            }
            if let Some(xsrf) = &self.xsrf_cookie {
                parts.push(format!("XSRF-TOKEN={xsrf}"));
            }
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }

        /// Capture rotation headers and cookies from a response, the way
        /// `checkAndUpdateCsrf` does on the browser side.
        fn absorb(&mut self, response: &Response) {
            for name in ["X-TOKEN-CSRF", "X-TOKEN-XSRF"] {
                if let Some(value) = response.headers().get(name) {
                    if let Ok(value) = value.to_str() {
                        self.csrf_header = Some((name.to_string(), value.to_string()));
                    }
                }
            }
            for cookie in response.headers().get_all(SET_COOKIE) {
                let Ok(raw) = cookie.to_str() else { continue };
                let Some((name_value, _)) = raw.split_once(';').or(Some((raw, ""))) else {
                    continue;
                };
                let Some((name, value)) = name_value.split_once('=') else { continue };
                match name {
                    "ENSEMBLE_SESSION" => {
                        self.session_cookie =
                            (!value.is_empty()).then(|| value.to_string());
                    }
                    "XSRF-TOKEN" => self.xsrf_cookie = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }

    async fn harness() -> Harness {
        let members = MemberDirectory::default();
        let compositions = CompositionStore::default();
        seed_demo_data(&members, &compositions).await.expect("seeding should succeed");

        let broadcast = Arc::new(BroadcastRouter::new());
        let gate = TopicGate::new(compositions.clone(), Arc::clone(&broadcast));
        let state = ApiState {
            config: Arc::new(ServerConfig::from_env()),
            members,
            compositions,
            sessions: SessionStore::default(),
            broadcast,
            gate,
        };
        Harness { app: router(state.clone()), state }
    }

    async fn send(
        harness: &Harness,
        client: &mut Client,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = client.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some((name, value)) = &client.csrf_header {
            builder = builder.header(name.as_str(), value.as_str());
        } else if let Some(xsrf) = &client.xsrf_cookie {
            builder = builder.header("X-XSRF-TOKEN", xsrf.as_str());
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request should build");

        let response = harness
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request should produce a response");
        client.absorb(&response);
        response
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be valid json")
    }

    /// Bootstrap + login, as the browser harness does it: fetch the CSRF
    /// material, then post credentials with the double-submit pair.
    async fn login(harness: &Harness, email: &str, password: &str) -> Client {
        let mut client = Client::default();
        let response =
            send(harness, &mut client, Method::GET, "/api/v1/rest/csrf", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            harness,
            &mut client,
            Method::POST,
            "/api/login",
            Some(json!({ "username": email, "password": password })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK, "login should succeed for {email}");
        client
    }

    async fn member_by_email(harness: &Harness, email: &str) -> Member {
        harness
            .state
            .members
            .find_by_email(email)
            .await
            .expect("seeded member should exist")
    }

    #[tokio::test]
    async fn login_without_csrf_material_fails() {
        let harness = harness().await;
        let mut client = Client::default();
        let response = send(
            &harness,
            &mut client,
            Method::POST,
            "/api/login",
            Some(json!({ "username": "mem1@collamap.com", "password": "pwd-mem1" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(harness.state.sessions.session_count().await, 0);
    }

    #[tokio::test]
    async fn login_issues_session_cookie_and_rotation_header() {
        let harness = harness().await;
        let client = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        assert!(client.session_cookie.is_some(), "login must set the session cookie");
        let (name, _token) =
            client.csrf_header.as_ref().expect("login must attach a rotation header");
        assert_eq!(name, harness.state.config.csrf_issue_header.as_str());
        assert_eq!(harness.state.sessions.session_count().await, 1);
    }

    #[tokio::test]
    async fn login_with_bad_credentials_is_unauthorized() {
        let harness = harness().await;
        let mut client = Client::default();
        send(&harness, &mut client, Method::GET, "/api/v1/rest/csrf", None).await;

        let response = send(
            &harness,
            &mut client,
            Method::POST,
            "/api/login",
            Some(json!({ "username": "mem1@collamap.com", "password": "wrong" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let parsed = body_json(response).await;
        assert_eq!(parsed["error"]["code"], "AUTH_INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn login_while_authenticated_is_a_conflict() {
        let harness = harness().await;
        let mut client = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        let response = send(
            &harness,
            &mut client,
            Method::POST,
            "/api/login",
            Some(json!({ "username": "mem2@collamap.com", "password": "pwd-mem2" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // The original session is untouched.
        let response = send(
            &harness,
            &mut client,
            Method::GET,
            "/api/v1/rest/accounts/myself",
            None,
        )
        .await;
        let parsed = body_json(response).await;
        assert_eq!(parsed["email"], "mem1@collamap.com");
        assert_eq!(harness.state.sessions.session_count().await, 1);
    }

    #[tokio::test]
    async fn stale_token_is_rejected_after_an_intervening_rotation() {
        let harness = harness().await;
        let mut client = login(&harness, "mem1@collamap.com", "pwd-mem1").await;
        let stale = client.csrf_header.clone().expect("login should issue a token");

        // An intervening mutating call rotates the token.
        let response = send(
            &harness,
            &mut client,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "First", "collaborative": false })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let fresh = client.csrf_header.clone().expect("mutation should rotate the token");
        assert_ne!(stale.1, fresh.1);

        // Replaying the pre-rotation token fails; the fresh one works.
        client.csrf_header = Some(stale);
        let response = send(
            &harness,
            &mut client,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "Second", "collaborative": false })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        client.csrf_header = Some(fresh);
        let response = send(
            &harness,
            &mut client,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "Second", "collaborative": false })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn get_endpoints_never_require_the_token() {
        let harness = harness().await;
        let mut client = login(&harness, "mem1@collamap.com", "pwd-mem1").await;
        client.csrf_header = None;
        client.xsrf_cookie = None;

        let response = send(
            &harness,
            &mut client,
            Method::GET,
            "/api/v1/rest/compositions",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn csrf_endpoint_reports_the_session_slot() {
        let harness = harness().await;
        let mut client = login(&harness, "mem1@collamap.com", "pwd-mem1").await;
        let held = client.csrf_header.clone().expect("login should issue a token");

        let response =
            send(&harness, &mut client, Method::GET, "/api/v1/rest/csrf", None).await;
        let parsed = body_json(response).await;
        assert_eq!(parsed["headerName"], held.0);
        assert_eq!(parsed["token"], held.1);
    }

    #[tokio::test]
    async fn logout_destroys_the_session() {
        let harness = harness().await;
        let mut client = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        let response = send(&harness, &mut client, Method::POST, "/api/logout", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(harness.state.sessions.session_count().await, 0);

        let response = send(
            &harness,
            &mut client,
            Method::GET,
            "/api/v1/rest/accounts/myself",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_routes_reject_anonymous_callers() {
        let harness = harness().await;
        let mut client = Client::default();
        let response = send(
            &harness,
            &mut client,
            Method::GET,
            "/api/v1/rest/compositions",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // End-to-end scenario A: a private composition is invisible to other
    // members: read denied, guest list untouched.
    #[tokio::test]
    async fn private_composition_is_not_readable_or_joinable_by_others() {
        let harness = harness().await;
        let mut owner = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        let response = send(
            &harness,
            &mut owner,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "Private", "collaborative": false })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let compo = body_json(response).await;
        let compo_id = compo["id"].as_str().expect("created composition has an id").to_owned();

        let mut other = login(&harness, "mem2@collamap.com", "pwd-mem2").await;
        let response = send(
            &harness,
            &mut other,
            Method::GET,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let compo_uuid: Uuid = compo_id.parse().expect("id should be a uuid");
        assert_eq!(
            harness.state.compositions.guests(compo_uuid).await.map(|g| g.len()),
            Some(0)
        );
    }

    // End-to-end scenario B: flipping collaborative on admits the next
    // reader as a guest and the owner observes MEMBER_JOINED.
    #[tokio::test]
    async fn collaborative_composition_admits_guests_and_announces_them() {
        let harness = harness().await;
        let mut owner = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        let response = send(
            &harness,
            &mut owner,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "Becomes shared", "collaborative": false })),
        )
        .await;
        let compo = body_json(response).await;
        let compo_id: Uuid = compo["id"]
            .as_str()
            .expect("created composition has an id")
            .parse()
            .expect("id should be a uuid");

        let response = send(
            &harness,
            &mut owner,
            Method::PATCH,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            Some(json!({ "collaborative": true })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // The owner watches the topic over the realtime channel.
        let owner_member = member_by_email(&harness, "mem1@collamap.com").await;
        let (tx, mut owner_rx) = mpsc::unbounded_channel();
        let owner_conn = harness.state.broadcast.register(owner_member, tx).await;
        harness.state.broadcast.subscribe_topic(owner_conn, compo_id).await;

        let mut other = login(&harness, "mem2@collamap.com", "pwd-mem2").await;
        let response = send(
            &harness,
            &mut other,
            Method::GET,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let guests = harness
            .state
            .compositions
            .guests(compo_id)
            .await
            .expect("composition should exist");
        assert_eq!(guests.len(), 1);
        assert_eq!(guests[0].email, "mem2@collamap.com");

        match owner_rx.try_recv().expect("owner should observe the join") {
            WsFrame::Event { event: CompositionEvent::MemberJoined { email, .. }, .. } => {
                assert_eq!(email, "mem2@collamap.com");
            }
            other => panic!("expected MEMBER_JOINED, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rest_element_mutations_broadcast_to_subscribers() {
        let harness = harness().await;
        let mut owner = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        let response = send(
            &harness,
            &mut owner,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "Shared", "collaborative": true })),
        )
        .await;
        let compo = body_json(response).await;
        let compo_id: Uuid = compo["id"]
            .as_str()
            .expect("created composition has an id")
            .parse()
            .expect("id should be a uuid");

        let watcher = member_by_email(&harness, "mem2@collamap.com").await;
        let (tx, mut watcher_rx) = mpsc::unbounded_channel();
        let watcher_conn = harness.state.broadcast.register(watcher, tx).await;
        harness.state.broadcast.subscribe_topic(watcher_conn, compo_id).await;

        let response = send(
            &harness,
            &mut owner,
            Method::POST,
            &format!("/api/v1/rest/compositions/{compo_id}/elements"),
            Some(json!({
                "id": Uuid::new_v4(),
                "elementType": "note",
                "style": "fill:#fff",
                "x": 1.0,
                "y": 2.0,
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let element = body_json(response).await;
        let element_id = element["id"].as_str().expect("element has an id").to_owned();

        let response = send(
            &harness,
            &mut owner,
            Method::PATCH,
            &format!("/api/v1/rest/compositions/{compo_id}/elements/{element_id}/position"),
            Some(json!({ "x": 54.0, "y": 89.0 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            &harness,
            &mut owner,
            Method::DELETE,
            &format!("/api/v1/rest/compositions/{compo_id}/elements/{element_id}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let mut observed = Vec::new();
        while let Ok(WsFrame::Event { event, .. }) = watcher_rx.try_recv() {
            observed.push(event.order_type().to_string());
        }
        assert_eq!(observed, vec!["elementAdded", "elementPositionChanged", "elementDeleted"]);
    }

    #[tokio::test]
    async fn deleting_a_composition_informs_guests_privately() {
        let harness = harness().await;
        let mut owner = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        let response = send(
            &harness,
            &mut owner,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "Doomed", "collaborative": true })),
        )
        .await;
        let compo = body_json(response).await;
        let compo_id: Uuid = compo["id"]
            .as_str()
            .expect("created composition has an id")
            .parse()
            .expect("id should be a uuid");

        // mem2 joins as a guest by reading the composition.
        let mut other = login(&harness, "mem2@collamap.com", "pwd-mem2").await;
        let response = send(
            &harness,
            &mut other,
            Method::GET,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let guest_member = member_by_email(&harness, "mem2@collamap.com").await;
        let (tx, mut guest_rx) = mpsc::unbounded_channel();
        let guest_conn = harness.state.broadcast.register(guest_member, tx).await;
        harness
            .state
            .broadcast
            .subscribe_queue(guest_conn, crate::sync::broadcast::PrivateQueue::Compositions)
            .await;

        let response = send(
            &harness,
            &mut owner,
            Method::DELETE,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        match guest_rx.try_recv().expect("guest should be told about the deletion") {
            WsFrame::Event {
                event: CompositionEvent::CompositionDeleted { composition_id, .. },
                ..
            } => assert_eq!(composition_id, compo_id),
            other => panic!("expected compositionDeleted, got {other:?}"),
        }
        assert!(harness.state.compositions.get(compo_id).await.is_none());
    }

    #[tokio::test]
    async fn non_owner_cannot_reconfigure_or_delete() {
        let harness = harness().await;
        let mut owner = login(&harness, "mem1@collamap.com", "pwd-mem1").await;

        let response = send(
            &harness,
            &mut owner,
            Method::POST,
            "/api/v1/rest/compositions",
            Some(json!({ "title": "Shared", "collaborative": true })),
        )
        .await;
        let compo = body_json(response).await;
        let compo_id = compo["id"].as_str().expect("created composition has an id").to_owned();

        let mut other = login(&harness, "mem2@collamap.com", "pwd-mem2").await;
        // Join as guest first so the deny is about ownership, not access.
        send(
            &harness,
            &mut other,
            Method::GET,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            None,
        )
        .await;

        let response = send(
            &harness,
            &mut other,
            Method::PATCH,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            Some(json!({ "collaborative": false })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(
            &harness,
            &mut other,
            Method::DELETE,
            &format!("/api/v1/rest/compositions/{compo_id}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
