use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{AuthService, AuthUser};
use crate::error::{ServiceError, ServiceResult};
use crate::membership::MembershipService;
use crate::models::*;
use crate::reminders::{CheckInEngine, MentionEngine};
use crate::store::{notifications, Store};

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub membership: Arc<MembershipService>,
    pub mentions: Arc<MentionEngine>,
    pub checkins: Arc<CheckInEngine>,
}

/// Map a service failure onto the response envelope and its HTTP status
pub fn error_response(err: ServiceError) -> HttpResponse {
    let body = ApiResponse::<()>::error(err.to_string()).with_code(err.kind());
    match err {
        ServiceError::NotFound(_) => HttpResponse::NotFound().json(body),
        ServiceError::Conflict(_) => HttpResponse::Conflict().json(body),
        ServiceError::Forbidden(_) => HttpResponse::Forbidden().json(body),
        ServiceError::Invalid(_) => HttpResponse::BadRequest().json(body),
        ServiceError::StorageUnavailable(ref msg) => {
            log::error!("Storage unavailable: {}", msg);
            HttpResponse::ServiceUnavailable().json(body)
        }
    }
}

fn ok<T: Serialize>(result: ServiceResult<T>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::success(data)),
        Err(e) => error_response(e),
    }
}

fn created<T: Serialize>(result: ServiceResult<T>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Created().json(ApiResponse::success(data)),
        Err(e) => error_response(e),
    }
}

fn no_content<T>(result: ServiceResult<T>) -> HttpResponse {
    match result {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => error_response(e),
    }
}

/// Role of the caller in `space_id`; `Forbidden` unless they are an active member
fn require_role(state: &AppState, space_id: &str, user_id: &str) -> ServiceResult<MemberRole> {
    // Surface a missing space as NotFound before the membership check
    state.membership.get_space(space_id)?;
    state
        .membership
        .get_role(space_id, user_id)?
        .ok_or_else(|| ServiceError::Forbidden(format!("Not a member of space {}", space_id)))
}

/// The caller must outrank the member they are approving, rejecting or removing
fn authorize_member_action(state: &AppState, actor_id: &str, member_id: &str) -> ServiceResult<SpaceMember> {
    let member = state.membership.get_member(member_id)?;
    let role = require_role(state, &member.space_id, actor_id)?;
    if !role.can_manage(member.role) {
        return Err(ServiceError::Forbidden(format!(
            "A {} cannot manage a {}",
            role, member.role
        )));
    }
    Ok(member)
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Users ====================

pub async fn create_user(
    state: web::Data<AppState>,
    body: web::Json<CreateUserRequest>,
) -> impl Responder {
    let user = match state
        .membership
        .create_user(&body.username, body.display_name.as_deref())
    {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(t) => t,
        Err(_) => return HttpResponse::InternalServerError().json(ApiResponse::<()>::error("Failed to generate token")),
    };

    HttpResponse::Created().json(ApiResponse::success(CreateUserResponse { token, user }))
}

pub async fn get_current_user(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    ok(state.membership.get_user(&auth_user.user_id))
}

pub async fn get_user(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    ok(state.membership.get_user(&path.into_inner()))
}

// ==================== Friends ====================

pub async fn send_friend_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<FriendRequestBody>,
) -> impl Responder {
    created(
        state
            .membership
            .send_friend_request(&auth_user.user_id, &body.receiver_id),
    )
}

pub async fn list_friends(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    ok(state.membership.list_friends(&auth_user.user_id))
}

pub async fn list_friend_requests(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    ok(state
        .membership
        .list_incoming_friend_requests(&auth_user.user_id))
}

pub async fn accept_friend_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    ok(state
        .membership
        .accept_friend_request(&path.into_inner(), &auth_user.user_id))
}

pub async fn reject_friend_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    ok(state
        .membership
        .reject_friend_request(&path.into_inner(), &auth_user.user_id))
}

// ==================== Couples ====================

pub async fn send_couple_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CoupleRequestBody>,
) -> impl Responder {
    created(
        state
            .membership
            .send_couple_request(&auth_user.user_id, &body.partner_id),
    )
}

pub async fn list_couple_requests(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    ok(state
        .membership
        .list_incoming_couple_requests(&auth_user.user_id))
}

/// Only the user a couple request was sent to may answer it
fn require_couple_receiver(state: &AppState, couple_id: &str, user_id: &str) -> ServiceResult<()> {
    let couple = state.membership.get_couple(couple_id)?;
    if couple.partner_id != user_id {
        return Err(ServiceError::Forbidden(
            "only the receiving partner can answer a couple request".to_string(),
        ));
    }
    Ok(())
}

pub async fn accept_couple_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let couple_id = path.into_inner();
    ok(require_couple_receiver(&state, &couple_id, &auth_user.user_id)
        .and_then(|_| state.membership.accept_couple_request(&couple_id)))
}

pub async fn reject_couple_request(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let couple_id = path.into_inner();
    ok(require_couple_receiver(&state, &couple_id, &auth_user.user_id)
        .and_then(|_| state.membership.reject_couple_request(&couple_id)))
}

// ==================== Spaces ====================

pub async fn create_space(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CreateSpaceRequest>,
) -> impl Responder {
    created(state.membership.create_space(
        &body.name,
        body.space_type,
        &auth_user.user_id,
        body.partner_id.as_deref(),
        body.check_in_interval_seconds,
    ))
}

pub async fn list_spaces(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    ok(state.membership.list_spaces_for_user(&auth_user.user_id))
}

pub async fn get_space(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let space_id = path.into_inner();
    ok(require_role(&state, &space_id, &auth_user.user_id)
        .and_then(|_| state.membership.get_space(&space_id)))
}

pub async fn join_space(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<JoinSpaceRequest>,
) -> impl Responder {
    ok(state
        .membership
        .join_by_invite_code(&auth_user.user_id, &body.invite_code))
}

pub async fn list_members(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let space_id = path.into_inner();
    ok(require_role(&state, &space_id, &auth_user.user_id)
        .and_then(|_| state.membership.list_members(&space_id)))
}

pub async fn update_check_in_interval(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdateCheckInRequest>,
) -> impl Responder {
    let space_id = path.into_inner();
    let result = require_role(&state, &space_id, &auth_user.user_id).and_then(|role| {
        if role == MemberRole::Member {
            return Err(ServiceError::Forbidden(
                "only owners and admins can change the check-in interval".to_string(),
            ));
        }
        state
            .membership
            .update_check_in_interval(&space_id, body.check_in_interval_seconds)
    });
    ok(result)
}

pub async fn get_check_in_status(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let space_id = path.into_inner();
    ok(require_role(&state, &space_id, &auth_user.user_id)
        .and_then(|_| state.checkins.status_for_space(&space_id)))
}

pub async fn leave_space(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    ok(state
        .membership
        .leave_space(&path.into_inner(), &auth_user.user_id))
}

pub async fn dissolve_space(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let space_id = path.into_inner();
    let result = require_role(&state, &space_id, &auth_user.user_id).and_then(|role| {
        if role != MemberRole::Owner {
            return Err(ServiceError::Forbidden(
                "only an owner can dissolve a space".to_string(),
            ));
        }
        state.membership.dissolve_space(&space_id)
    });
    no_content(result)
}

// ==================== Members ====================

pub async fn approve_member(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let member_id = path.into_inner();
    ok(authorize_member_action(&state, &auth_user.user_id, &member_id)
        .and_then(|_| state.membership.approve_member(&member_id)))
}

pub async fn reject_member(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let member_id = path.into_inner();
    no_content(
        authorize_member_action(&state, &auth_user.user_id, &member_id)
            .and_then(|_| state.membership.reject_member(&member_id)),
    )
}

pub async fn remove_member(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let member_id = path.into_inner();
    ok(authorize_member_action(&state, &auth_user.user_id, &member_id)
        .and_then(|_| state.membership.remove_member(&member_id)))
}

// ==================== Posts & Mentions ====================

pub async fn create_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<CreatePostRequest>,
) -> impl Responder {
    created(
        state
            .membership
            .create_post(&path.into_inner(), &auth_user.user_id, &body.content),
    )
}

pub async fn delete_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    no_content(
        state
            .membership
            .delete_post(&path.into_inner(), &auth_user.user_id),
    )
}

pub async fn create_mentions(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<CreateMentionsRequest>,
) -> impl Responder {
    created(state.mentions.create_mentions(
        &path.into_inner(),
        &auth_user.user_id,
        &body.mentioned_user_ids,
        body.timeout_seconds,
    ))
}

pub async fn list_pending_mentions(state: web::Data<AppState>, auth_user: AuthUser) -> impl Responder {
    ok(state.mentions.pending_for(&auth_user.user_id))
}

pub async fn get_mention(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let result = state.mentions.get_mention(&path.into_inner()).and_then(|m| {
        if m.mentioned_user_id != auth_user.user_id && m.mentioner_user_id != auth_user.user_id {
            return Err(ServiceError::Forbidden("not your mention".to_string()));
        }
        Ok(m)
    });
    ok(result)
}

pub async fn view_mention(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    ok(state
        .mentions
        .mark_viewed(&path.into_inner(), &auth_user.user_id))
}

pub async fn ignore_mention(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    ok(state
        .mentions
        .mark_ignored(&path.into_inner(), &auth_user.user_id))
}

pub async fn update_mention_timeout(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdateTimeoutRequest>,
) -> impl Responder {
    ok(state
        .mentions
        .update_timeout(&path.into_inner(), &auth_user.user_id, body.timeout_seconds))
}

// ==================== Notifications ====================

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list_notifications(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<ListNotificationsQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    match state
        .store
        .read(|c| notifications::list_notifications(c, &auth_user.user_id, limit, offset))
    {
        Ok(items) => HttpResponse::Ok().json(ApiResponse::success(items)),
        Err(e) => error_response(e.into()),
    }
}

pub async fn mark_notification_read(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state
        .store
        .read(|c| notifications::mark_notification_read(c, &id, &auth_user.user_id))
    {
        Ok(0) => HttpResponse::NotFound().json(ApiResponse::<()>::error("Notification not found").with_code("not_found")),
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => error_response(e.into()),
    }
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(health))

        // Users (no auth required to create an identity)
        .route("/api/users", web::post().to(create_user))
        .route("/api/users/{id}", web::get().to(get_user))
        .route("/api/auth/me", web::get().to(get_current_user))

        // Friends
        .route("/api/friends", web::get().to(list_friends))
        .route("/api/friends", web::post().to(send_friend_request))
        .route("/api/friends/requests", web::get().to(list_friend_requests))
        .route("/api/friends/{id}/accept", web::post().to(accept_friend_request))
        .route("/api/friends/{id}/reject", web::post().to(reject_friend_request))

        // Couples
        .route("/api/couples", web::post().to(send_couple_request))
        .route("/api/couples/requests", web::get().to(list_couple_requests))
        .route("/api/couples/{id}/accept", web::post().to(accept_couple_request))
        .route("/api/couples/{id}/reject", web::post().to(reject_couple_request))

        // Spaces
        .route("/api/spaces", web::get().to(list_spaces))
        .route("/api/spaces", web::post().to(create_space))
        .route("/api/spaces/join", web::post().to(join_space))
        .route("/api/spaces/{id}", web::get().to(get_space))
        .route("/api/spaces/{id}", web::delete().to(dissolve_space))
        .route("/api/spaces/{id}/members", web::get().to(list_members))
        .route("/api/spaces/{id}/leave", web::post().to(leave_space))
        .route("/api/spaces/{id}/checkin", web::get().to(get_check_in_status))
        .route("/api/spaces/{id}/checkin-interval", web::put().to(update_check_in_interval))
        .route("/api/spaces/{id}/posts", web::post().to(create_post))

        // Members
        .route("/api/members/{id}/approve", web::post().to(approve_member))
        .route("/api/members/{id}/reject", web::post().to(reject_member))
        .route("/api/members/{id}", web::delete().to(remove_member))

        // Posts & mentions
        .route("/api/posts/{id}", web::delete().to(delete_post))
        .route("/api/posts/{id}/mentions", web::post().to(create_mentions))
        .route("/api/mentions", web::get().to(list_pending_mentions))
        .route("/api/mentions/{id}", web::get().to(get_mention))
        .route("/api/mentions/{id}/view", web::post().to(view_mention))
        .route("/api/mentions/{id}/ignore", web::post().to(ignore_mention))
        .route("/api/mentions/{id}/timeout", web::put().to(update_mention_timeout))

        // Notifications
        .route("/api/notifications", web::get().to(list_notifications))
        .route("/api/notifications/{id}/read", web::post().to(mark_notification_read));
}
