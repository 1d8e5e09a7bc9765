use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use shared_utils::test_utils::{empty_request, json_request, read_json, RecordingNotifier, TestConfig};
use telemed_api::create_router;
use telemed_api::ticker::drain_due_reminders;

async fn sign_in(
    app: &axum::Router,
    notifier: &RecordingNotifier,
    name: &str,
    email: &str,
    phone: &str,
    role: &str,
) -> (Uuid, String) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            json!({
                "name": name,
                "email": email,
                "phone": phone,
                "role": role,
                "password": "correct-horse42",
                "password_confirm": "correct-horse42",
                "specialty": if role == "doctor" { Some("Cardiology") } else { None }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let user_id: Uuid = read_json(response).await["id"].as_str().unwrap().parse().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({ "email": email, "password": "correct-horse42", "role": role }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let otp = notifier.last_otp_for(user_id).expect("otp delivered");
    let response = app
        .clone()
        .oneshot(json_request("POST", "/auth/verify", None, json!({ "email": email, "otp": otp })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token = read_json(response).await["session"]["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    (user_id, token)
}

#[tokio::test]
async fn test_health_and_root() {
    let (state, _) = TestConfig::default().to_state();
    let app = create_router(state);

    let response = app.clone().oneshot(empty_request("GET", "/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ok");

    let response = app.oneshot(empty_request("GET", "/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_consultation_day() {
    let (state, notifier) = TestConfig::default().to_state();
    let app = create_router(state.clone());

    let (doctor_id, doctor_token) =
        sign_in(&app, &notifier, "Gregory House", "house@example.com", "+15550100001", "doctor").await;
    let (patient_id, patient_token) =
        sign_in(&app, &notifier, "Rebecca Adler", "adler@example.com", "+15550100002", "patient").await;

    // Doctor is online after verifying and shows up in the directory.
    let response = app
        .clone()
        .oneshot(empty_request("GET", "/doctors/online", Some(&patient_token)))
        .await
        .unwrap();
    let online: Value = read_json(response).await;
    assert!(online
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["id"] == doctor_id.to_string()));

    // A slot starting soon enough for the video room to be open.
    let start = Utc::now() + Duration::minutes(10);
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/doctors/me/slots",
            Some(&doctor_token),
            json!({ "start_time": start, "end_time": start + Duration::minutes(30) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let slot_id = read_json(response).await["id"].as_str().unwrap().to_string();

    let uri = format!("/doctors/{}/slots", doctor_id);
    let response = app.clone().oneshot(empty_request("GET", &uri, Some(&patient_token))).await.unwrap();
    assert_eq!(read_json(response).await["slots"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(json_request("POST", "/appointments", Some(&patient_token), json!({ "slot_id": slot_id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let appointment_id = read_json(response).await["id"].as_str().unwrap().to_string();
    assert!(!notifier.sent_to(doctor_id).is_empty());

    // Booked slots drop out of the public listing.
    let response = app.clone().oneshot(empty_request("GET", &uri, Some(&patient_token))).await.unwrap();
    assert!(read_json(response).await["slots"].as_array().unwrap().is_empty());

    // No video before confirmation.
    let video_uri = format!("/appointments/{}/video", appointment_id);
    let response = app
        .clone()
        .oneshot(empty_request("GET", &video_uri, Some(&patient_token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/appointments/{}/confirm", appointment_id),
            Some(&doctor_token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &video_uri, Some(&patient_token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let video = read_json(response).await;
    assert_eq!(video["domain"], "meet.example.org");
    assert!(video["join_url"].as_str().unwrap().starts_with("https://meet.example.org/telemed-"));

    // Medication reminder that the ticker delivers.
    let first_fire = Utc::now() + Duration::minutes(5);
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/reminders",
            Some(&patient_token),
            json!({
                "medicine_name": "Ibuprofen",
                "notes": "after food",
                "recurrence": { "kind": "once" },
                "first_fire_time": first_fire
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let before = notifier.sent_to(patient_id).len();
    assert_eq!(drain_due_reminders(&state, first_fire + Duration::seconds(1)).await, 1);
    let sent = notifier.sent_to(patient_id);
    assert_eq!(sent.len(), before + 1);
    assert!(sent.last().unwrap().message.contains("Ibuprofen"));

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/reminders", Some(&patient_token)))
        .await
        .unwrap();
    assert_eq!(read_json(response).await[0]["fired"], true);

    // Both parties see the appointment; logging out ends the session.
    let response = app
        .clone()
        .oneshot(empty_request("GET", "/appointments", Some(&doctor_token)))
        .await
        .unwrap();
    assert_eq!(read_json(response).await[0]["status"], "confirmed");

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/auth/logout", Some(&patient_token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(empty_request("GET", "/appointments", Some(&patient_token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
