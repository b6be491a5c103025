use crate::error::ExtractError;
use crate::input::{FileHandle, Submission, ValidatedSubmission};
use crate::models::ExtractResponse;
use crate::request_id::{RequestId, inject_request_id};
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

/// Room for the question field and multipart framing on top of the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    Router::new()
        .route("/", get(index))
        .route("/extract", post(extract))
        .route("/health", get(|| async { "OK" }))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(inject_request_id))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn index() -> Html<&'static str> {
    Html(include_str!("ui/index.html"))
}

#[axum_macros::debug_handler]
pub async fn extract(
    State(state): State<AppState>,
    request_id: RequestId,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let submission = match multipart {
        Ok(multipart) => read_submission(multipart, state.config.max_upload_bytes).await,
        Err(rejection) => Err(ExtractError::MalformedUpload { reason: rejection.body_text() }),
    };
    let outcome = match submission {
        Ok(submission) => run_extraction(&state, submission, &request_id).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(answer) => (StatusCode::OK, Json(answer)).into_response(),
        Err(e) => {
            if e.is_input_error() {
                info!("Submission rejected: {}", e);
            } else {
                error!("Extraction failed: {}", e);
            }
            e.into_response()
        }
    }
}

/// Validates the submission and, only if it is complete, asks the model.
pub async fn run_extraction(
    state: &AppState,
    submission: Submission,
    request_id: &RequestId,
) -> Result<ExtractResponse, ExtractError> {
    let ValidatedSubmission { image, question } = submission.validate()?;

    // The semaphore is never closed, so a failed acquire cannot happen.
    let _permit = state.extraction_slots.acquire().await.ok();
    info!(
        "Extracting from {} ({} bytes) with model {}",
        image.file_name.as_deref().unwrap_or("<unnamed>"),
        image.bytes.len(),
        state.config.model
    );

    let answer = state
        .llm_client
        .extract(&question, &image, &state.config.instruction, request_id)
        .await?;
    debug!("Answer has {} chars", answer.text.chars().count());

    Ok(ExtractResponse {
        answer: answer.text,
        model_version: answer.model_version,
        finish_reason: answer.finish_reason,
        total_tokens: answer.total_tokens,
    })
}

async fn read_submission(mut multipart: Multipart, max_image_bytes: usize) -> Result<Submission, ExtractError> {
    let mut submission = Submission::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "question" => {
                submission.question = field.text().await.map_err(multipart_error)?;
            }
            "image" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if bytes.len() > max_image_bytes {
                    return Err(ExtractError::PayloadTooLarge {
                        reason: format!("image is {} bytes, the limit is {}", bytes.len(), max_image_bytes),
                    });
                }
                submission.image = Some(FileHandle::new(file_name, content_type, bytes));
            }
            other => debug!("Ignoring form field {:?}", other),
        }
    }
    Ok(submission)
}

fn multipart_error(e: MultipartError) -> ExtractError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ExtractError::PayloadTooLarge { reason: e.body_text() }
    } else {
        ExtractError::MalformedUpload { reason: e.body_text() }
    }
}
