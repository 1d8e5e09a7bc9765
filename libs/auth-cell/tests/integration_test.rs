use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use auth_cell::router::auth_routes;
use auth_cell::services::AccountService;
use shared_models::auth::Role;
use shared_utils::test_utils::{empty_request, json_request, read_json, JwtTestUtils, TestConfig, TestUser};

fn registration(email: &str, phone: &str, role: &str) -> serde_json::Value {
    json!({
        "name": "Leonard McCoy",
        "email": email,
        "phone": phone,
        "role": role,
        "password": "bones2266",
        "password_confirm": "bones2266",
        "specialty": "General Practice"
    })
}

#[tokio::test]
async fn test_register_login_verify_flow() {
    let (state, notifier) = TestConfig::default().to_state();
    let app = auth_routes(state.clone());

    let response = app
        .clone()
        .oneshot(json_request("POST", "/register", None, registration("mccoy@example.com", "+15550199001", "doctor")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let user = read_json(response).await;
    assert_eq!(user["role"], "doctor");
    assert!(user.get("password_hash").is_none());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            json!({ "email": "mccoy@example.com", "password": "bones2266", "role": "doctor" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["otp_required"], true);

    let user_id = user["id"].as_str().unwrap().parse().unwrap();
    let otp = notifier.last_otp_for(user_id).expect("otp sent");

    let response = app
        .clone()
        .oneshot(json_request("POST", "/verify", None, json!({ "email": "mccoy@example.com", "otp": otp })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["user"]["online"], true);
    let token = body["session"]["access_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/me", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["email"], "mccoy@example.com");

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/logout", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/me", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(empty_request("POST", "/validate", Some(&token)))
        .await
        .unwrap();
    assert_eq!(read_json(response).await["valid"], false);

    assert!(!AccountService::new(&state).get_by_id(user_id).unwrap().online);
}

#[tokio::test]
async fn test_register_validation_and_duplicates() {
    let (state, _) = TestConfig::default().to_state();
    let app = auth_routes(state);

    let mut bad = registration("not-an-email", "+15550199002", "patient");
    bad["password_confirm"] = json!("something-else1");
    let response = app.clone().oneshot(json_request("POST", "/register", None, bad)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/register", None, registration("dup@example.com", "+15550199003", "patient")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(json_request("POST", "/register", None, registration("dup@example.com", "+15550199004", "patient")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_with_wrong_role_or_password() {
    let (state, _) = TestConfig::default().to_state();
    let app = auth_routes(state);

    app.clone()
        .oneshot(json_request("POST", "/register", None, registration("kirk@example.com", "+15550199005", "patient")))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            json!({ "email": "kirk@example.com", "password": "bones2266", "role": "doctor" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["error"], "Account is not registered as a doctor");

    let response = app
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            json!({ "email": "kirk@example.com", "password": "wrong-pass1", "role": "patient" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_otp_is_unauthorized() {
    let (state, _) = TestConfig::default().to_state();
    let app = auth_routes(state);

    app.clone()
        .oneshot(json_request("POST", "/register", None, registration("spock@example.com", "+15550199006", "patient")))
        .await
        .unwrap();
    app.clone()
        .oneshot(json_request(
            "POST",
            "/login",
            None,
            json!({ "email": "spock@example.com", "password": "bones2266", "role": "patient" }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request("POST", "/verify", None, json!({ "email": "spock@example.com", "otp": "12345" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_routes_reject_bad_tokens() {
    let config = TestConfig::default();
    let (state, _) = config.to_state();
    let app = auth_routes(state.clone());
    let user = TestUser::patient("uhura@example.com").insert(&state.db);

    let response = app.clone().oneshot(empty_request("GET", "/me", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let expired = JwtTestUtils::create_expired_token(&user, &config.session_secret);
    let response = app.clone().oneshot(empty_request("GET", "/me", Some(&expired))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = JwtTestUtils::create_invalid_signature_token(&user);
    let response = app.clone().oneshot(empty_request("GET", "/me", Some(&forged))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let malformed = JwtTestUtils::create_malformed_token();
    let response = app.clone().oneshot(empty_request("GET", "/me", Some(&malformed))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A token for a user that does not exist in the store.
    let ghost = TestUser::new("ghost@example.com", Role::Doctor);
    let response = app
        .oneshot(empty_request("GET", "/me", Some(&ghost.token(&config.session_secret))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deactivated_account_loses_session() {
    let config = TestConfig::default();
    let (state, _) = config.to_state();
    let app = auth_routes(state.clone());
    let user = TestUser::patient("sulu@example.com").insert(&state.db);
    let token = user.token(&config.session_secret);

    let response = app.clone().oneshot(empty_request("DELETE", "/me", Some(&token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(empty_request("GET", "/me", Some(&token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_validate_session_endpoint() {
    let config = TestConfig::default();
    let (state, _) = config.to_state();
    let app = auth_routes(state);
    let user = TestUser::doctor("chapel@example.com");

    let token = user.token(&config.session_secret);
    let response = app.clone().oneshot(empty_request("POST", "/validate", Some(&token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["valid"], true);
    assert_eq!(body["role"], "doctor");

    let expired = JwtTestUtils::create_expired_token(&user, &config.session_secret);
    let response = app.clone().oneshot(empty_request("POST", "/validate", Some(&expired))).await.unwrap();
    assert_eq!(read_json(response).await["valid"], false);

    let response = app.oneshot(empty_request("POST", "/validate", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_ends_old_sessions_but_not_new_ones() {
    let (state, notifier) = TestConfig::default().to_state();
    let app = auth_routes(state.clone());

    let response = app
        .clone()
        .oneshot(json_request("POST", "/register", None, registration("chapel@example.com", "+15550199077", "patient")))
        .await
        .unwrap();
    let user_id = read_json(response).await["id"].as_str().unwrap().parse().unwrap();

    let mut tokens = Vec::new();
    for _ in 0..2 {
        app.clone()
            .oneshot(json_request(
                "POST",
                "/login",
                None,
                json!({ "email": "chapel@example.com", "password": "bones2266", "role": "patient" }),
            ))
            .await
            .unwrap();
        let otp = notifier.last_otp_for(user_id).unwrap();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/verify", None, json!({ "email": "chapel@example.com", "otp": otp })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let token = read_json(response).await["session"]["access_token"].as_str().unwrap().to_string();
        tokens.push(token);

        if tokens.len() == 1 {
            let response = app
                .clone()
                .oneshot(empty_request("POST", "/logout", Some(&tokens[0])))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    let response = app.clone().oneshot(empty_request("GET", "/me", Some(&tokens[0]))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(empty_request("GET", "/me", Some(&tokens[1]))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
