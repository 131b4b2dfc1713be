//! HTTP prover service.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use zkotp_common::{
    totp::{unix_now, TIME_STEP_SECS},
    ActionEncoding, StageError, TimeStepClock, ZkOtpError,
};
use zkotp_prover::{NargoBackend, Orchestrator, ProofOutput, ProofRequest, ProverConfig};

const CODE_INPUT_INVALID: &str = "INPUT_INVALID";

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Compile the configured circuit and build the service state.
    ///
    /// Fails when the circuit does not compile; the caller must not serve.
    pub async fn from_env() -> Result<Self, StageError> {
        let config = ProverConfig::from_env();
        let backend = Arc::new(NargoBackend::from_config(&config));
        let orchestrator = Orchestrator::start(backend, config, TimeStepClock::from_env()).await?;
        Ok(Self::with_components(orchestrator))
    }

    pub fn with_components(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

/// A JSON value that may arrive as a string or a bare number.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StringOrNumber {
    Number(u64),
    Text(String),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            StringOrNumber::Number(value) => value.to_string(),
            StringOrNumber::Text(value) => value,
        }
    }
}

#[derive(Deserialize)]
pub struct ProveRequestBody {
    pub secret: String,
    pub otp_code: StringOrNumber,
    pub to: String,
    pub amount: StringOrNumber,
    #[serde(default)]
    pub tx_nonce: Option<u64>,
    /// Also return the proof as `bytes32` segments.
    #[serde(default)]
    pub bytes32: bool,
}

impl From<ProveRequestBody> for ProofRequest {
    fn from(body: ProveRequestBody) -> Self {
        ProofRequest {
            secret: body.secret,
            otp_code: body.otp_code.into_string(),
            to: body.to,
            amount: body.amount.into_string(),
            tx_nonce: body.tx_nonce,
            bytes32: body.bytes32,
            encoding: ActionEncoding::Standard,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveResponse {
    pub proof_hex: String,
    pub public_inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_bytes32_array: Option<Vec<String>>,
    pub time_step: u64,
    pub action_hash: String,
    pub tx_nonce: u64,
    pub job_id: String,
}

impl From<ProofOutput> for ProveResponse {
    fn from(output: ProofOutput) -> Self {
        Self {
            proof_hex: output.proof_hex,
            public_inputs: output.public_inputs,
            proof_bytes32_array: output.proof_bytes32,
            time_step: output.time_step,
            action_hash: output.action_hash,
            tx_nonce: output.tx_nonce,
            job_id: output.job_id,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    circuit: String,
    fingerprint: String,
    available_proof_slots: usize,
}

#[derive(Serialize)]
struct TimeStepResponse {
    time_step: u64,
    seconds_remaining: u64,
    skew: u64,
    fixed: bool,
}

struct ApiError {
    status: StatusCode,
    code: &'static str,
    stage: Option<&'static str>,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            stage: None,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn from_stage(err: StageError) -> Self {
        let status = status_for(&err.source);
        let mut api = Self::new(status, err.source.code(), err.source.to_string());
        api.stage = Some(err.stage.as_str());
        if status.is_server_error() {
            tracing::error!(stage = %err.stage, error = %err.source, "proof request failed");
        } else {
            tracing::warn!(stage = %err.stage, error = %err.source, "proof request rejected");
        }
        api
    }
}

/// Caller-attributable failures are 400; toolchain faults are 500.
fn status_for(err: &ZkOtpError) -> StatusCode {
    match err {
        ZkOtpError::Decode(_)
        | ZkOtpError::Input(_)
        | ZkOtpError::Encoding(_)
        | ZkOtpError::Assembly(_)
        | ZkOtpError::Witness(_) => StatusCode::BAD_REQUEST,
        ZkOtpError::CircuitCompile(_) | ZkOtpError::Proving(_) | ZkOtpError::Timeout(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
            stage: self.stage,
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/prove", post(prove_handler))
        .route("/health", get(health_handler))
        .route("/time-step", get(time_step_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn prove_handler(
    State(state): State<AppState>,
    payload: Result<Json<ProveRequestBody>, JsonRejection>,
) -> Result<Json<ProveResponse>, ApiError> {
    let Json(body) =
        payload.map_err(|rejection| ApiError::bad_request(CODE_INPUT_INVALID, rejection.body_text()))?;
    let output = state
        .orchestrator()
        .prove(body.into())
        .await
        .map_err(ApiError::from_stage)?;
    Ok(Json(output.into()))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = state.orchestrator();
    Json(HealthResponse {
        status: "ok",
        circuit: orchestrator.circuit().package.clone(),
        fingerprint: orchestrator.circuit().fingerprint.clone(),
        available_proof_slots: orchestrator.available_permits(),
    })
}

async fn time_step_handler(State(state): State<AppState>) -> Json<TimeStepResponse> {
    let clock = state.orchestrator().clock();
    Json(TimeStepResponse {
        time_step: clock.current(),
        seconds_remaining: TIME_STEP_SECS - unix_now() % TIME_STEP_SECS,
        skew: clock.skew(),
        fixed: clock.is_fixed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_faults_map_to_bad_request() {
        for err in [
            ZkOtpError::Decode("x".into()),
            ZkOtpError::Encoding("x".into()),
            ZkOtpError::Witness("x".into()),
        ] {
            assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn toolchain_faults_map_to_server_error() {
        assert_eq!(
            status_for(&ZkOtpError::Proving("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ZkOtpError::Timeout(std::time::Duration::from_secs(1))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn numeric_fields_accept_both_shapes() {
        let body: ProveRequestBody = serde_json::from_str(
            r#"{"secret":"JBSWY3DPEHPK3PXP","otp_code":81804,"to":"0x00","amount":"0x10"}"#,
        )
        .unwrap();
        let request = ProofRequest::from(body);
        assert_eq!(request.otp_code, "81804");
        assert_eq!(request.amount, "0x10");
        assert!(!request.bytes32);
        assert_eq!(request.encoding, ActionEncoding::Standard);
    }
}
