//! HTTP route handlers for the chat gateway API.

use std::sync::Arc;

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, GatewayError, UserMetadata};

use super::error::ApiError;
use super::state::AppState;

const SUCCESS: &str = "success";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/health", get(health_check))
        .route("/upload", post(upload_file))
        .route("/send_message", post(send_message))
        .route("/get_user_conversations", get(get_user_conversations))
        .route("/get_conversation/{email}/{conv_id}", get(get_conversation))
        .route("/create_conversation", post(create_conversation))
        .route(
            "/delete_conversation/{email}/{conv_id}",
            delete(delete_conversation),
        )
        .route("/get_user_metadata/{email}", get(get_user_metadata))
        .route("/download/{email}/{conv_id}/{filename}", get(download_file))
        .layer(body_limit)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Always `success`.
    pub status: &'static str,
    /// Object key of the stored file.
    pub file_key: String,
    /// Id of the file message.
    pub message_id: String,
}

/// Accept a multipart upload with `file`, `email` and `conv_id` parts.
async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut email = None;
    let mut conv_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                file = Some((filename, bytes.to_vec()));
            }
            "email" | "conv_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                if name == "email" {
                    email = Some(value);
                } else {
                    conv_id = Some(value);
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::missing_field("file"))?;
    let email = email.ok_or_else(|| ApiError::missing_field("email"))?;
    let conv_id = conv_id.ok_or_else(|| ApiError::missing_field("conv_id"))?;

    let receipt = state
        .gateway
        .upload_file(&email, &conv_id, &filename, bytes)
        .await?;

    Ok(Json(UploadResponse {
        status: SUCCESS,
        file_key: receipt.file_key,
        message_id: receipt.message_id.as_str().to_string(),
    }))
}

/// Send message form.
#[derive(Debug, Deserialize)]
pub struct SendMessageForm {
    /// Owner of the conversation.
    pub email: Option<String>,
    /// Conversation id, with or without the `CONV#` prefix.
    pub conv_id: Option<String>,
    /// Message text.
    pub content: Option<String>,
    /// Whether the bot sent the message; defaults to false.
    pub is_bot: Option<String>,
}

/// Send message response.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    /// Always `success`.
    pub status: &'static str,
    /// Id of the appended message.
    pub message_id: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    form: Result<Form<SendMessageForm>, FormRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Form(form) = form.map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
    let email = form.email.ok_or_else(|| ApiError::missing_field("email"))?;
    let conv_id = form
        .conv_id
        .ok_or_else(|| ApiError::missing_field("conv_id"))?;
    let content = form
        .content
        .ok_or_else(|| ApiError::missing_field("content"))?;
    let is_bot = parse_flag(form.is_bot.as_deref())?;

    let message_id = state
        .gateway
        .send_message(&email, &conv_id, &content, is_bot)
        .await?;

    Ok(Json(SendMessageResponse {
        status: SUCCESS,
        message_id: message_id.as_str().to_string(),
    }))
}

/// Parse a form boolean the way HTML forms and scripts send it.
fn parse_flag(raw: Option<&str>) -> Result<bool, ApiError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "off" => Ok(false),
        "true" | "1" | "yes" | "on" => Ok(true),
        other => Err(GatewayError::invalid_input(format!(
            "is_bot: '{other}' is not a valid boolean"
        ))
        .into()),
    }
}

/// Email query parameter.
#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    /// User email.
    pub email: Option<String>,
}

async fn get_user_conversations(
    State(state): State<Arc<AppState>>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
    let email = query.email.ok_or_else(|| ApiError::missing_field("email"))?;

    Ok(Json(state.gateway.list_conversations(&email).await?))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path((email, conv_id)): Path<(String, String)>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(state.gateway.get_conversation(&email, &conv_id).await?))
}

/// Create conversation form.
#[derive(Debug, Deserialize)]
pub struct CreateConversationForm {
    /// Owner of the new conversation.
    pub email: Option<String>,
}

/// Create conversation response.
#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    /// Always `success`.
    pub status: &'static str,
    /// Id of the new conversation, without prefix.
    pub conv_id: String,
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    form: Result<Form<CreateConversationForm>, FormRejection>,
) -> Result<Json<CreateConversationResponse>, ApiError> {
    let Form(form) = form.map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
    let email = form.email.ok_or_else(|| ApiError::missing_field("email"))?;

    let conv_id = state.gateway.create_conversation(&email).await?;

    Ok(Json(CreateConversationResponse {
        status: SUCCESS,
        conv_id: conv_id.as_str().to_string(),
    }))
}

/// Bare status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Always `success`.
    pub status: &'static str,
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path((email, conv_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.gateway.delete_conversation(&email, &conv_id).await?;
    Ok(Json(StatusResponse { status: SUCCESS }))
}

async fn get_user_metadata(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<UserMetadata>, ApiError> {
    Ok(Json(state.gateway.user_metadata(&email).await?))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((email, conv_id, filename)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state
        .gateway
        .download_file(&email, &conv_id, &filename)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::conversation::{AppendMode, ConversationGateway};
    use crate::storage::{MemoryKvStore, OpendalObjectStore};

    const BOUNDARY: &str = "chatgatewayboundary";

    fn app_with(max_upload_bytes: usize) -> Router {
        let gateway = ConversationGateway::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(OpendalObjectStore::in_memory()),
            "chat-app-documents",
            AppendMode::RequireExisting,
        );
        create_router(AppState::new(gateway, max_upload_bytes))
    }

    fn app() -> Router {
        app_with(1024 * 1024)
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn call_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = call(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn form(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn multipart(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn create(app: &Router, email: &str) -> String {
        let (status, body) = call_json(
            app,
            form(Method::POST, "/create_conversation", &format!("email={email}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("success"));
        body["conv_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call_json(&app(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["service"], json!("chat-gateway"));
    }

    #[tokio::test]
    async fn test_create_send_get() {
        let app = app();
        let conv_id = create(&app, "a%40x.com").await;

        let (status, body) = call_json(
            &app,
            form(
                Method::POST,
                "/send_message",
                &format!("email=a%40x.com&conv_id={conv_id}&content=hello"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message_id"].as_str().unwrap().starts_with("MSG#"));

        let (status, body) = call_json(
            &app,
            get_req(&format!("/get_conversation/a@x.com/{conv_id}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["SK"], json!(format!("CONV#{conv_id}")));
        assert_eq!(body["totalMessages"], json!(1));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], json!("hello"));
        assert_eq!(messages[0]["senderType"], json!("user"));
        assert_eq!(messages[0]["type"], json!("text"));
    }

    #[tokio::test]
    async fn test_bot_flag() {
        let app = app();
        let conv_id = create(&app, "b%40x.com").await;

        let (status, _) = call_json(
            &app,
            form(
                Method::POST,
                "/send_message",
                &format!("email=b%40x.com&conv_id={conv_id}&content=hi&is_bot=true"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call_json(
            &app,
            get_req(&format!("/get_conversation/b@x.com/{conv_id}")),
        )
        .await;
        assert_eq!(body["messages"][0]["senderType"], json!("bot"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(!parse_flag(None).unwrap());
        assert!(!parse_flag(Some("")).unwrap());
        assert!(!parse_flag(Some("False")).unwrap());
        assert!(parse_flag(Some("1")).unwrap());
        assert!(parse_flag(Some("on")).unwrap());
        assert!(parse_flag(Some("maybe")).is_err());
    }

    #[tokio::test]
    async fn test_missing_form_field_is_unprocessable() {
        let (status, body) = call_json(
            &app(),
            form(Method::POST, "/send_message", "email=a%40x.com&conv_id=c1"),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"], json!("field required: content"));
    }

    #[tokio::test]
    async fn test_get_missing_conversation() {
        let (status, body) =
            call_json(&app(), get_req("/get_conversation/a@x.com/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "message": "Conversation not found" }));
    }

    #[tokio::test]
    async fn test_send_to_missing_conversation() {
        let (status, _) = call_json(
            &app(),
            form(
                Method::POST,
                "/send_message",
                "email=a%40x.com&conv_id=ghost&content=hello",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let app = app();
        let (status, body) =
            call_json(&app, get_req("/get_user_conversations?email=c%40x.com")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let first = create(&app, "c%40x.com").await;
        create(&app, "c%40x.com").await;

        let (_, body) =
            call_json(&app, get_req("/get_user_conversations?email=c%40x.com")).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = call_json(&app, get_req("/get_user_metadata/c@x.com")).await;
        assert_eq!(body["totalConversations"], json!(2));

        let delete = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/delete_conversation/c@x.com/CONV%23{first}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call_json(&app, delete).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "success" }));

        let (status, _) = call_json(
            &app,
            get_req(&format!("/get_conversation/c@x.com/{first}")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call_json(&app, get_req("/get_user_metadata/c@x.com")).await;
        assert_eq!(body["totalConversations"], json!(1));
    }

    #[tokio::test]
    async fn test_list_requires_email() {
        let (status, _) = call_json(&app(), get_req("/get_user_conversations")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let app = app();
        let conv_id = create(&app, "d%40x.com").await;

        let (status, body) = call_json(
            &app,
            multipart(
                &[("email", "d@x.com"), ("conv_id", conv_id.as_str())],
                Some(("notes.txt", &b"file contents"[..])),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("success"));
        assert_eq!(
            body["file_key"],
            json!(format!("d@x.com/CONV#{conv_id}/notes.txt"))
        );

        let (status, bytes) = call(
            &app,
            get_req(&format!("/download/d@x.com/{conv_id}/notes.txt")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"file contents");

        let (_, body) = call_json(
            &app,
            get_req(&format!("/get_conversation/d@x.com/{conv_id}")),
        )
        .await;
        assert_eq!(body["messages"][0]["type"], json!("file"));
        assert_eq!(body["messages"][0]["content"], json!("File: notes.txt"));
    }

    #[tokio::test]
    async fn test_upload_without_file() {
        let (status, body) = call_json(
            &app(),
            multipart(&[("email", "d@x.com"), ("conv_id", "c1")], None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"], json!("field required: file"));
    }

    #[tokio::test]
    async fn test_upload_over_limit() {
        let app = app_with(64);
        let big = vec![b'x'; 1024];
        let (status, _) = call(
            &app,
            multipart(&[("email", "d@x.com"), ("conv_id", "c1")], Some(("big.bin", big.as_slice()))),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let (status, body) =
            call_json(&app(), get_req("/download/d@x.com/c1/none.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "message": "File not found" }));
    }
}
