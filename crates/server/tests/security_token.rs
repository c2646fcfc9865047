const CSRF_SOURCE: &str = include_str!("../src/auth/csrf.rs");
const SESSION_SOURCE: &str = include_str!("../src/auth/session.rs");
const API_MOD_SOURCE: &str = include_str!("../src/api/mod.rs");
const WS_HANDLER_SOURCE: &str = include_str!("../src/ws/handler.rs");

#[test]
fn csrf_tokens_are_single_slot_and_rotate_on_mutation() {
    assert!(
        SESSION_SOURCE.contains("rotate_csrf"),
        "sessions must expose single-slot token rotation"
    );
    assert!(
        SESSION_SOURCE.contains("rotation_leaves_exactly_one_valid_token"),
        "the single-valid-token regression test must exist"
    );
    assert!(
        API_MOD_SOURCE.contains("stale_token_is_rejected_after_an_intervening_rotation"),
        "the stale-token-after-rotation regression test must exist"
    );
}

#[test]
fn rotation_only_happens_on_successful_mutating_exchanges() {
    assert!(
        CSRF_SOURCE.contains("response.status().is_success()"),
        "rotation must be gated on a successful exchange"
    );
    assert!(
        CSRF_SOURCE.contains("failed_exchanges_do_not_rotate"),
        "the no-rotation-on-failure regression test must exist"
    );
}

#[test]
fn both_rotation_header_names_are_one_mechanism() {
    assert!(
        CSRF_SOURCE.contains("enum CsrfHeaderName"),
        "the issue header must be a configurable name, not a second code path"
    );
    for header in ["X-TOKEN-CSRF", "X-TOKEN-XSRF", "X-XSRF-TOKEN"] {
        assert!(
            CSRF_SOURCE.contains(header),
            "request-side recognition must cover `{header}`"
        );
    }
    assert!(
        CSRF_SOURCE.contains("synonym_header_name_is_recognized_on_requests"),
        "the synonym-header regression test must exist"
    );
}

#[test]
fn anonymous_mutations_use_the_double_submit_cookie() {
    assert!(CSRF_SOURCE.contains("XSRF_COOKIE"), "the double-submit cookie must exist");
    assert!(
        CSRF_SOURCE.contains("anonymous_double_submit_pair_is_accepted"),
        "the double-submit acceptance regression test must exist"
    );
    assert!(
        CSRF_SOURCE.contains("anonymous_mismatched_pair_is_rejected"),
        "the double-submit mismatch regression test must exist"
    );
}

#[test]
fn realtime_handshake_echoes_the_rest_csrf_material() {
    assert!(
        WS_HANDLER_SOURCE.contains("token != session.csrf_token"),
        "the connect frame token must be validated against the session slot"
    );
    assert!(
        WS_HANDLER_SOURCE.contains("CONNECT_REQUIRED"),
        "a non-connect first frame must be rejected"
    );
    assert!(
        WS_HANDLER_SOURCE
            .contains("ServerError::from_code(ErrorCode::AuthenticationRequired)"),
        "an unauthenticated upgrade must be refused before the handshake completes"
    );
}

#[test]
fn session_cookies_are_hashed_at_rest() {
    assert!(
        SESSION_SOURCE.contains("Sha256::digest"),
        "raw session cookie values must not be stored as lookup keys"
    );
}
