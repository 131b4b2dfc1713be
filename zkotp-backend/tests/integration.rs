use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use zkotp_backend::{app_router, AppState};
use zkotp_common::TimeStepClock;
use zkotp_prover::{Orchestrator, ProverConfig};
use zkotp_test_fixtures::{fixtures, golden, MockCircuitBackend, MockFault};

const BODY_LIMIT: usize = usize::MAX;

async fn test_app_with(fault: MockFault) -> Router {
    let orchestrator = Orchestrator::start(
        MockCircuitBackend::shared(fault),
        ProverConfig::default(),
        TimeStepClock::fixed(golden::DEMO_TIME_STEP),
    )
    .await
    .expect("mock circuit compiles");
    app_router(AppState::with_components(orchestrator))
}

async fn test_app() -> Router {
    test_app_with(MockFault::None).await
}

fn prove_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/prove")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn valid_body() -> Value {
    json!({
        "secret": golden::DEMO_SECRET,
        "otp_code": golden::DEMO_OTP_CODE.to_string(),
        "to": golden::RECIPIENT,
        "amount": golden::AMOUNT_WEI,
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn prove_returns_proof_and_public_inputs() {
    let (status, value) = send(test_app().await, prove_request(valid_body())).await;

    assert_eq!(status, StatusCode::OK, "{value}");
    assert!(value["proofHex"].as_str().unwrap().starts_with("0x"));
    let inputs = value["publicInputs"].as_array().unwrap();
    assert_eq!(inputs.len(), 5);
    assert_eq!(value["timeStep"], golden::DEMO_TIME_STEP);
    assert_eq!(value["actionHash"], golden::ACTION_HASH);
    assert!(value.get("proofBytes32Array").is_none());
    // time_step is the third public input.
    assert_eq!(
        inputs[2].as_str().unwrap(),
        format!("0x{:064x}", golden::DEMO_TIME_STEP)
    );
}

#[tokio::test]
async fn prove_accepts_numeric_fields_and_bytes32() {
    let body = json!({
        "secret": golden::DEMO_SECRET,
        "otp_code": golden::DEMO_OTP_CODE,
        "to": golden::RECIPIENT,
        "amount": 1_000_000_000_000_000_000u64,
        "tx_nonce": 7,
        "bytes32": true,
    });
    let (status, value) = send(test_app().await, prove_request(body)).await;

    assert_eq!(status, StatusCode::OK, "{value}");
    assert_eq!(value["txNonce"], 7);
    assert_eq!(value["actionHash"], golden::ACTION_HASH);
    let chunks = value["proofBytes32Array"].as_array().unwrap();
    assert!(!chunks.is_empty());
}

#[tokio::test]
async fn malformed_base32_is_rejected_before_hashing() {
    let mut body = valid_body();
    body["secret"] = json!("JBSWY3DP1HPK3PXP");
    let (status, value) = send(test_app().await, prove_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error_code"], "SECRET_DECODE_FAILED");
    assert_eq!(value["stage"], "decode");
}

#[tokio::test]
async fn wrong_otp_is_a_verification_failure() {
    let mut body = valid_body();
    let wrong = (golden::DEMO_OTP_CODE + 1) % 1_000_000;
    body["otp_code"] = json!(format!("{wrong:06}"));
    let (status, value) = send(test_app().await, prove_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error_code"], "WITNESS_UNSATISFIED");
    assert_eq!(value["stage"], "execute");
}

#[tokio::test]
async fn bad_checksum_address_is_an_encoding_error() {
    let mut body = valid_body();
    body["to"] = json!("0x000000000000000000000000000000000000DEad");
    let (status, value) = send(test_app().await, prove_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error_code"], "ACTION_ENCODING_FAILED");
    assert_eq!(value["stage"], "bind");
}

#[tokio::test]
async fn oversized_amount_is_an_encoding_error() {
    let mut body = valid_body();
    body["amount"] = json!(format!("0x1{}", "0".repeat(64)));
    let (status, value) = send(test_app().await, prove_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error_code"], "ACTION_ENCODING_FAILED");
}

#[tokio::test]
async fn missing_fields_are_input_errors() {
    let (status, value) = send(
        test_app().await,
        prove_request(json!({ "secret": golden::DEMO_SECRET })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error_code"], "INPUT_INVALID");
    assert!(value["error"].as_str().unwrap().contains("otp_code"));
}

#[tokio::test]
async fn proving_faults_are_server_errors() {
    let (status, value) = send(
        test_app_with(MockFault::Proving).await,
        prove_request(valid_body()),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(value["error_code"], "PROVING_FAILED");
    assert_eq!(value["stage"], "prove");
}

#[tokio::test]
async fn health_reports_circuit() {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, value) = send(test_app().await, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "ok");
    assert_eq!(value["available_proof_slots"], 1);
    assert!(value["fingerprint"].as_str().unwrap().len() == 64);
}

#[tokio::test]
async fn time_step_reports_fixed_clock() {
    let request = Request::builder()
        .uri("/time-step")
        .body(Body::empty())
        .unwrap();
    let (status, value) = send(test_app().await, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["time_step"], golden::DEMO_TIME_STEP);
    assert_eq!(value["fixed"], true);
    let remaining = value["seconds_remaining"].as_u64().unwrap();
    assert!((1..=30).contains(&remaining));
}

#[test]
fn fixture_code_matches_golden_constant() {
    assert_eq!(
        fixtures().demo_code(golden::DEMO_TIME_STEP),
        golden::DEMO_OTP_CODE
    );
}
