pub mod auth;
pub mod mail;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use draw_core::Participant;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::JwtKeys;
use crate::mail::{GiftMessage, LogMailer, Mailer};

#[derive(Clone)]
pub struct AppState {
    users: Arc<RwLock<HashMap<String, UserRecord>>>,
    rooms: Arc<RwLock<HashMap<String, RoomRecord>>>,
    jwt_keys: JwtKeys,
    mailer: Arc<dyn Mailer>,
    persist_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            jwt_keys: JwtKeys::new(jwt_secret),
            mailer: Arc::new(LogMailer),
            persist_path: None,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub async fn with_persistence(
        path: impl Into<PathBuf>,
        jwt_secret: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let mut state = Self::new(jwt_secret);
        state.persist_path = Some(path.clone());
        if let Ok(bytes) = tokio::fs::read(&path).await {
            if let Ok(saved) = serde_json::from_slice::<Snapshot>(&bytes) {
                *state.users.write().await = saved.users;
                *state.rooms.write().await = saved.rooms;
            }
        }
        state
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            let snapshot = Snapshot {
                users: self.users.read().await.clone(),
                rooms: self.rooms.read().await.clone(),
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(json) => {
                    if let Err(err) = tokio::fs::write(path, json).await {
                        tracing::error!("persist error: {err}");
                    }
                }
                Err(err) => tracing::error!("persist encode error: {err}"),
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    users: HashMap<String, UserRecord>,
    rooms: HashMap<String, RoomRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub room_type: String,
    pub sorter_date: DateTime<Utc>,
    pub created_by: PersonRecord,
    pub people: Vec<PersonRecord>,
    pub drawn_at: Option<DateTime<Utc>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/register-me/:slug", post(join_room))
        .route("/api/rooms/:id", get(get_room))
        .route("/api/services/send-emails/", post(send_emails))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionUser {
    name: String,
    id: String,
    token: String,
    avatar_url: Option<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    user: SessionUser,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    success: bool,
    incorrect_password: bool,
    incorrect_email: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<SessionUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    name: String,
    room_type: String,
    sorter_date: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonView {
    id: String,
    name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomView {
    id: String,
    name: String,
    room_type: String,
    sorter_date: DateTime<Utc>,
    created_by: PersonView,
    people: Vec<PersonView>,
    member_count: usize,
    join_slug: String,
    drawn_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct DrawRequest {
    room: String,
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct DrawResponse {
    err: bool,
}

// The join link advertised by the room page uses the room name with
// spaces collapsed to dashes.
fn slugify(name: &str) -> String {
    name.trim().replace(' ', "-")
}

fn person_view(person: &PersonRecord) -> PersonView {
    PersonView {
        id: person.id.clone(),
        name: person.name.clone(),
    }
}

fn room_view(room: &RoomRecord) -> RoomView {
    RoomView {
        id: room.id.clone(),
        name: room.name.clone(),
        room_type: room.room_type.clone(),
        sorter_date: room.sorter_date,
        created_by: person_view(&room.created_by),
        people: room.people.iter().map(person_view).collect(),
        member_count: room.people.len() + 1,
        join_slug: room.slug.clone(),
        drawn_at: room.drawn_at,
    }
}

fn to_participant(person: &PersonRecord) -> Participant {
    Participant {
        id: person.id.clone(),
        name: person.name.clone(),
        email: person.email.clone(),
    }
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserRecord, Response> {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Err((StatusCode::UNAUTHORIZED, "authorization required").into_response());
    };

    let Some(token) = value.strip_prefix("Bearer ") else {
        return Err((StatusCode::UNAUTHORIZED, "bearer token required").into_response());
    };

    let claims = match state.jwt_keys.verify(token) {
        Ok(claims) => claims,
        Err(_) => return Err((StatusCode::UNAUTHORIZED, "invalid token").into_response()),
    };

    let users = state.users.read().await;
    users
        .get(&claims.user_id)
        .cloned()
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "unknown user").into_response())
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    let name = payload.name.trim();
    let email = payload.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() {
        return (StatusCode::BAD_REQUEST, "name and email required").into_response();
    }
    if payload.password.len() < 6 {
        return (StatusCode::BAD_REQUEST, "password must be at least 6 characters").into_response();
    }

    let mut users = state.users.write().await;
    if users.values().any(|u| u.email == email) {
        return (StatusCode::CONFLICT, "email already registered").into_response();
    }

    let password_hash = match bcrypt::hash(&payload.password, bcrypt::DEFAULT_COST) {
        Ok(hash) => hash,
        Err(err) => {
            tracing::error!("password hash failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "registration failed").into_response();
        }
    };

    let id = Uuid::new_v4().to_string();
    let token = match state.jwt_keys.issue(&id, &email) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!("token issue failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "registration failed").into_response();
        }
    };

    users.insert(
        id.clone(),
        UserRecord {
            id: id.clone(),
            name: name.to_string(),
            email: email.clone(),
            password_hash,
            avatar_url: payload.avatar_url.clone(),
        },
    );

    drop(users);
    state.persist().await;
    tracing::info!(user = %id, "registered new user");

    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: SessionUser {
                name: name.to_string(),
                id,
                token,
                avatar_url: payload.avatar_url,
            },
        }),
    )
        .into_response()
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let email = payload.email.trim().to_lowercase();

    let users = state.users.read().await;
    let Some(user) = users.values().find(|u| u.email == email) else {
        return Json(LoginResponse {
            success: false,
            incorrect_password: false,
            incorrect_email: true,
            user: None,
        })
        .into_response();
    };

    let password_ok = match bcrypt::verify(&payload.password, &user.password_hash) {
        Ok(ok) => ok,
        Err(err) => {
            tracing::error!("password verify failed: {err}");
            false
        }
    };

    if !password_ok {
        return Json(LoginResponse {
            success: false,
            incorrect_password: true,
            incorrect_email: false,
            user: None,
        })
        .into_response();
    }

    let token = match state.jwt_keys.issue(&user.id, &user.email) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!("token issue failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "login failed").into_response();
        }
    };

    tracing::info!(user = %user.id, "user logged in");

    Json(LoginResponse {
        success: true,
        incorrect_password: false,
        incorrect_email: false,
        user: Some(SessionUser {
            name: user.name.clone(),
            id: user.id.clone(),
            token,
            avatar_url: user.avatar_url.clone(),
        }),
    })
    .into_response()
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoomRequest>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let name = payload.name.trim();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, "name required").into_response();
    }
    let room_type = payload.room_type.trim();
    if room_type.is_empty() {
        return (StatusCode::BAD_REQUEST, "roomType required").into_response();
    }

    let slug = slugify(name);
    let mut rooms = state.rooms.write().await;
    if rooms.values().any(|r| r.slug == slug) {
        return (StatusCode::CONFLICT, "room name taken").into_response();
    }

    let room = RoomRecord {
        id: Uuid::new_v4().to_string(),
        slug,
        name: name.to_string(),
        room_type: room_type.to_string(),
        sorter_date: payload.sorter_date,
        created_by: PersonRecord {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        },
        people: Vec::new(),
        drawn_at: None,
    };

    let view = room_view(&room);
    tracing::info!(room = %room.id, creator = %user.id, "room created");
    rooms.insert(room.id.clone(), room);

    drop(rooms);
    state.persist().await;

    (StatusCode::CREATED, Json(view)).into_response()
}

async fn join_room(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.values_mut().find(|r| r.slug == slug) else {
        return (StatusCode::NOT_FOUND, "room not found").into_response();
    };

    if room.drawn_at.is_some() {
        return (StatusCode::CONFLICT, "draw already performed").into_response();
    }

    if room.created_by.id == user.id || room.people.iter().any(|p| p.id == user.id) {
        return (StatusCode::CONFLICT, "already a member").into_response();
    }

    room.people.push(PersonRecord {
        id: user.id.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
    });

    let view = room_view(room);
    tracing::info!(room = %view.id, user = %user.id, "user joined room");

    drop(rooms);
    state.persist().await;

    (StatusCode::OK, Json(view)).into_response()
}

async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }

    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(&id) else {
        return (StatusCode::NOT_FOUND, "room not found").into_response();
    };

    (StatusCode::OK, Json(room_view(room))).into_response()
}

// Draw endpoint contract: HTTP 200 with `{ "err": bool }` either way,
// the caller branches on the flag.
async fn send_emails(
    State(state): State<AppState>,
    Query(params): Query<DrawParams>,
    Json(payload): Json<DrawRequest>,
) -> Json<DrawResponse> {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(&payload.room) else {
        tracing::warn!(room = %payload.room, "draw requested for unknown room");
        return Json(DrawResponse { err: true });
    };

    // The creator participates in the draw alongside `people`.
    let mut participants = Vec::with_capacity(room.people.len() + 1);
    participants.push(to_participant(&room.created_by));
    participants.extend(room.people.iter().map(to_participant));

    let mut rng = params
        .seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);

    let assignment = match draw_core::draw(&participants, &mut rng) {
        Ok(assignment) => assignment,
        Err(err) => {
            tracing::warn!(room = %room.id, "draw rejected: {err}");
            return Json(DrawResponse { err: true });
        }
    };

    room.drawn_at = Some(Utc::now());
    let room_id = room.id.clone();
    let room_name = room.name.clone();

    drop(rooms);
    state.persist().await;

    // Dispatch after the lock is released; failures mark the response
    // but already-computed assignments stay in place.
    let mut err = false;
    for giver in &participants {
        let Some(recipient_id) = assignment.recipient_of(&giver.id) else {
            continue;
        };
        let Some(recipient) = participants.iter().find(|p| p.id == recipient_id) else {
            continue;
        };
        let message = GiftMessage {
            to_name: giver.name.clone(),
            to_email: giver.email.clone(),
            recipient_name: recipient.name.clone(),
            room_name: room_name.clone(),
        };
        if let Err(send_err) = state.mailer.send(&message) {
            tracing::error!(room = %room_id, "draw email failed: {send_err}");
            err = true;
        }
    }

    tracing::info!(
        room = %room_id,
        participants = participants.len(),
        err,
        "draw completed"
    );

    Json(DrawResponse { err })
}
