//! Browser front-end.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Chat page for the caller's session |
//! | `POST` | `/process` | Multipart PDF upload; rebuilds the session index |
//! | `POST` | `/ask` | Form-encoded question |
//!
//! Sessions are identified by the `pdf_chat_session` cookie and live in memory.
//! A session untouched for longer than the configured idle time is dropped,
//! and the cookie carries the same lifetime as `Max-Age`. Each session sits
//! behind its own async mutex, so requests for the same session run one at a
//! time while different sessions proceed independently.

use axum::{
    extract::{DefaultBodyLimit, Form, Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use pdf_chat_core::presentation::{error_notice, escape_html, process_notice, render_history, CSS};
use pdf_chat_core::{Pipeline, PipelineError, RawDocument, Session, SessionState};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SESSION_COOKIE: &str = "pdf_chat_session";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type SharedSession = Arc<tokio::sync::Mutex<Session>>;

struct RegistryEntry {
    session: SharedSession,
    last_used: Instant,
}

/// In-memory sessions keyed by cookie id, dropped after `idle_ttl` without use.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, RegistryEntry>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Live session for `id`; touching it restarts its idle clock.
    fn get(&self, id: Uuid, now: Instant) -> Option<SharedSession> {
        let mut sessions = self.sessions.lock().ok()?;
        let entry = sessions.get_mut(&id)?;
        if now.duration_since(entry.last_used) < self.idle_ttl {
            entry.last_used = now;
            return Some(entry.session.clone());
        }
        sessions.remove(&id);
        None
    }

    fn insert(&self, session: Session, now: Instant) -> SharedSession {
        self.evict_idle(now);
        let id = session.id();
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(
                id,
                RegistryEntry {
                    session: shared.clone(),
                    last_used: now,
                },
            );
        }
        shared
    }

    /// Drops every session idle for at least `idle_ttl`; returns how many went.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let Ok(mut sessions) = self.sessions.lock() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_used) < self.idle_ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, session_ttl: Duration) -> Self {
        Self {
            pipeline,
            sessions: Arc::new(SessionRegistry::new(session_ttl)),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Looks up the caller's session, starting a fresh one when the cookie is
    /// missing, unknown or expired.
    async fn session_for(&self, headers: &HeaderMap) -> Result<(Uuid, SharedSession), AppError> {
        let now = Instant::now();
        if let Some(id) = session_cookie(headers) {
            if let Some(existing) = self.sessions.get(id, now) {
                return Ok((id, existing));
            }
        }

        let session = Session::start(&self.pipeline)
            .await
            .map_err(AppError::from_pipeline)?;
        let id = session.id();
        let shared = self.sessions.insert(session, now);
        info!(session = %id, active_sessions = self.sessions.len(), "new browser session");
        Ok((id, shared))
    }

    fn session_cookie_header(&self, id: Uuid) -> String {
        format!(
            "{SESSION_COOKIE}={id}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.sessions.idle_ttl().as_secs()
        )
    }
}

/// Periodically drops idle sessions so abandoned ones don't pile up between requests.
fn spawn_session_sweeper(sessions: Arc<SessionRegistry>) {
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(Instant::now());
            if evicted > 0 {
                debug!(evicted, remaining = sessions.len(), "idle sessions dropped");
            }
        }
    });
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handle_page))
        .route("/process", post(handle_process))
        .route("/ask", post(handle_ask))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    pipeline: Arc<Pipeline>,
    bind: &str,
    max_upload_bytes: usize,
    session_ttl: Duration,
) -> anyhow::Result<()> {
    let state = AppState::new(pipeline, session_ttl);
    spawn_session_sweeper(state.sessions().clone());
    let app = router(state, max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind = %bind, "chat UI listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn session_cookie(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find_map(|raw| Uuid::parse_str(raw).ok())
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn from_pipeline(error: PipelineError) -> Self {
        Self {
            status: status_for(&error),
            message: error_notice(&error),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::Extraction(_) | PipelineError::Chunking(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Embedding { .. } | PipelineError::Generation { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::EmptyQuestion => StatusCode::BAD_REQUEST,
        PipelineError::Configuration(_) | PipelineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Every page re-issues the cookie so its `Max-Age` slides with server-side use.
fn page_response(state: &AppState, status: StatusCode, session: Uuid, body: String) -> Response {
    let mut response = (status, Html(body)).into_response();
    match HeaderValue::from_str(&state.session_cookie_header(session)) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(error) => warn!(%error, "could not encode session cookie"),
    }
    response
}

async fn handle_page(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let (session_id, shared) = state.session_for(&headers).await?;
    let session = shared.lock().await;
    Ok(page_response(&state, StatusCode::OK, session_id, render_page(&session, None)))
}

#[derive(Debug, Deserialize)]
struct AskForm {
    #[serde(default)]
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AskForm>,
) -> Result<Response, AppError> {
    let (session_id, shared) = state.session_for(&headers).await?;
    let mut session = shared.lock().await;

    if form.question.trim().is_empty() {
        return Ok(page_response(&state, StatusCode::OK, session_id, render_page(&session, None)));
    }

    let (status, notice) = match session.ask(&state.pipeline, &form.question).await {
        Ok(_) => (StatusCode::OK, None),
        Err(error) => {
            warn!(session = %session.id(), kind = error.kind(), "question failed");
            (status_for(&error), Some(error_notice(&error)))
        }
    };
    Ok(page_response(&state, status, session_id, render_page(&session, notice.as_deref())))
}

async fn handle_process(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let (session_id, shared) = state.session_for(&headers).await?;

    let mut documents = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => {
                return Err(AppError {
                    status: StatusCode::BAD_REQUEST,
                    message: format!("upload could not be read: {error}"),
                })
            }
        };
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|error| AppError {
            status: StatusCode::BAD_REQUEST,
            message: format!("upload could not be read: {error}"),
        })?;
        // Browsers send an empty part when the file picker was left blank.
        if !name.is_empty() && !bytes.is_empty() {
            documents.push(RawDocument::new(name, bytes.to_vec()));
        }
    }

    let mut session = shared.lock().await;
    let (status, notice) = match session.process_documents(&state.pipeline, &documents).await {
        Ok(outcome) => (StatusCode::OK, process_notice(&outcome)),
        Err(error) => {
            warn!(session = %session.id(), kind = error.kind(), "processing failed");
            (status_for(&error), error_notice(&error))
        }
    };
    Ok(page_response(&state, status, session_id, render_page(&session, Some(&notice))))
}

fn render_page(session: &Session, notice: Option<&str>) -> String {
    let notice_html = notice
        .map(|text| format!("<p class=\"notice\">{}</p>", escape_html(text)))
        .unwrap_or_default();

    let documents_html = match (session.state(), session.summary()) {
        (SessionState::Ready, Some(summary)) => summary
            .documents
            .iter()
            .map(|document| {
                format!(
                    "<li>{} ({} pages)</li>",
                    escape_html(&document.name),
                    document.pages
                )
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => "<li>No documents processed yet.</li>".to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Chatbot</title>
{CSS}
</head>
<body>
<aside>
  <h3>Your documents</h3>
  <form action="/process" method="post" enctype="multipart/form-data">
    <label>Upload your PDFs here and click on Process
      <input type="file" name="pdfs" accept="application/pdf" multiple>
    </label>
    <button type="submit">Process</button>
  </form>
  <ul>{documents_html}</ul>
</aside>
<main>
  <h1>Chatbot &#129302;</h1>
  {notice_html}
  <form action="/ask" method="post">
    <input type="text" name="question" placeholder="Upload PDF documents and start asking questions" autofocus>
  </form>
  {history}
</main>
</body>
</html>"#,
        history = render_history(session.history()),
    )
}
