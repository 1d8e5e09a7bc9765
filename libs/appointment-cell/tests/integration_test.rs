use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::router::appointment_routes;
use appointment_cell::{AppointmentError, AppointmentStatus, BookingService};
use doctor_cell::AvailabilityService;
use shared_utils::state::AppState;
use shared_utils::test_utils::{empty_request, json_request, read_json, TestConfig, TestUser};

fn publish_half_hour(state: &AppState, doctor: &TestUser, hours_ahead: i64) -> Uuid {
    let start = Utc::now() + Duration::hours(hours_ahead);
    AvailabilityService::new(state)
        .publish_slot(&doctor.context(), start, start + Duration::minutes(30))
        .unwrap()
        .id
}

#[tokio::test]
async fn test_book_conflict_confirm_cancel_rebook() {
    let config = TestConfig::default();
    let (state, _) = config.to_state();
    let app = appointment_routes(state.clone());

    let doctor = TestUser::doctor("d@example.com").insert(&state.db);
    let p1 = TestUser::patient("p1@example.com").insert(&state.db);
    let p2 = TestUser::patient("p2@example.com").insert(&state.db);
    let slot_id = publish_half_hour(&state, &doctor, 10);

    let doctor_token = doctor.token(&config.session_secret);
    let p1_token = p1.token(&config.session_secret);
    let p2_token = p2.token(&config.session_secret);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/", Some(&p1_token), json!({ "slot_id": slot_id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let appointment = read_json(response).await;
    assert_eq!(appointment["status"], "requested");
    let appointment_id = appointment["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/", Some(&p2_token), json!({ "slot_id": slot_id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(response).await["error"], "Slot no longer available");

    let uri = format!("/{}/confirm", appointment_id);
    let response = app.clone().oneshot(empty_request("POST", &uri, Some(&doctor_token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "confirmed");

    let uri = format!("/{}/cancel", appointment_id);
    let response = app
        .clone()
        .oneshot(json_request("POST", &uri, Some(&p1_token), json!({ "reason": "schedule clash" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = read_json(response).await;
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancellation_reason"], "schedule clash");

    let response = app
        .clone()
        .oneshot(json_request("POST", "/", Some(&p2_token), json!({ "slot_id": slot_id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(empty_request("GET", "/?status=cancelled", Some(&p1_token)))
        .await
        .unwrap();
    let listed = read_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], appointment_id.as_str());
}

#[tokio::test]
async fn test_participants_only_and_role_checks() {
    let config = TestConfig::default();
    let (state, _) = config.to_state();
    let app = appointment_routes(state.clone());

    let doctor = TestUser::doctor("d2@example.com").insert(&state.db);
    let patient = TestUser::patient("owner@example.com").insert(&state.db);
    let stranger = TestUser::patient("stranger@example.com").insert(&state.db);
    let slot_id = publish_half_hour(&state, &doctor, 6);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/",
            Some(&doctor.token(&config.session_secret)),
            json!({ "slot_id": slot_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/",
            Some(&patient.token(&config.session_secret)),
            json!({ "slot_id": slot_id }),
        ))
        .await
        .unwrap();
    let id = read_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/{}", id), Some(&stranger.token(&config.session_secret))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Patients cannot confirm their own request.
    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/{}/confirm", id),
            Some(&patient.token(&config.session_secret)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Video is closed until the appointment is confirmed.
    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/{}/video", id),
            Some(&patient.token(&config.session_secret)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(empty_request(
            "GET",
            &format!("/{}", Uuid::new_v4()),
            Some(&patient.token(&config.session_secret)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_without_body() {
    let config = TestConfig::default();
    let (state, _) = config.to_state();
    let app = appointment_routes(state.clone());
    let doctor = TestUser::doctor("d3@example.com").insert(&state.db);
    let patient = TestUser::patient("p3@example.com").insert(&state.db);
    let slot_id = publish_half_hour(&state, &doctor, 3);

    let appointment = BookingService::new(&state).book(&patient.context(), slot_id).await.unwrap();

    let response = app
        .oneshot(empty_request(
            "POST",
            &format!("/{}/cancel", appointment.id),
            Some(&doctor.token(&config.session_secret)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(read_json(response).await["cancellation_reason"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_booking_has_one_winner() {
    let (state, _) = TestConfig::default().to_state();
    let doctor = TestUser::doctor("busy@example.com").insert(&state.db);
    let slot_id = publish_half_hour(&state, &doctor, 12);

    let contenders: Vec<_> = (0..8)
        .map(|i| TestUser::patient(&format!("racer{}@example.com", i)).insert(&state.db))
        .collect();

    let handles: Vec<_> = contenders
        .iter()
        .map(|patient| {
            let state: Arc<AppState> = Arc::clone(&state);
            let ctx = patient.context();
            tokio::spawn(async move { BookingService::new(&state).book(&ctx, slot_id).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(appointment) => {
                assert_eq!(appointment.status, AppointmentStatus::Requested);
                winners += 1;
            }
            Err(AppointmentError::SlotUnavailable) => {}
            Err(other) => panic!("unexpected booking error: {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_confirm_and_cancel_never_both_apply() {
    let (state, _) = TestConfig::default().to_state();
    let doctor = TestUser::doctor("race-doc@example.com").insert(&state.db);
    let patient = TestUser::patient("race-pat@example.com").insert(&state.db);
    let slot_id = publish_half_hour(&state, &doctor, 12);
    let appointment_id = BookingService::new(&state).book(&patient.context(), slot_id).await.unwrap().id;

    let confirm = {
        let state = Arc::clone(&state);
        let ctx = doctor.context();
        tokio::spawn(async move { BookingService::new(&state).confirm(&ctx, appointment_id).await })
    };
    let cancel = {
        let state = Arc::clone(&state);
        let ctx = patient.context();
        tokio::spawn(async move { BookingService::new(&state).cancel(&ctx, appointment_id, None).await })
    };

    let confirmed = confirm.await.unwrap();
    let cancelled = cancel.await.unwrap();

    let final_status = BookingService::new(&state)
        .get(&patient.context(), appointment_id)
        .unwrap()
        .status;
    match (confirmed, cancelled) {
        // Cancel may legitimately follow a confirm.
        (Ok(_), Ok(_)) => assert_eq!(final_status, AppointmentStatus::Cancelled),
        (Ok(_), Err(e)) => panic!("cancel after confirm must succeed: {e}"),
        (Err(AppointmentError::InvalidStatusTransition { .. }), Ok(_)) => {
            assert_eq!(final_status, AppointmentStatus::Cancelled)
        }
        (Err(e), _) => panic!("unexpected confirm error: {e}"),
    }
}
