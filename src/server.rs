use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing,
};
use rearch::Container;
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    config,
    link_repo::Owner,
    link_service::{CreateLinkError, CreateLinkPayload, ListLinksError, link_service_capsule},
    resolver::{Outcome, RedirectPage, resolver_capsule},
};

/// Routes for resolving, creating and listing links, backed by `container`.
pub fn router(container: Container) -> Router {
    Router::new()
        .route("/", routing::post(create_guest_link))
        .route("/{short_code}", routing::get(resolve_link))
        .route(
            "/owners/{owner_id}/links",
            routing::get(list_owner_links).post(create_owner_link),
        )
        .with_state(container)
}

#[derive(Serialize)]
pub struct Error {
    error: String,
    error_id: String,
}

#[instrument(skip(container))]
async fn resolve_link(
    State(container): State<Container>,
    Path(short_code): Path<String>,
) -> Response {
    let (resolver, countdown_seconds) =
        container.read((resolver_capsule, config::redirect_countdown_seconds_capsule));

    // NOTE: always a 200 or 404; the client navigates after the countdown
    match resolver.resolve(&short_code).await {
        Outcome::Resolved { destination } => Json(RedirectPage {
            destination,
            countdown_seconds,
        })
        .into_response(),
        Outcome::NotFound => {
            let err_uuid = Uuid::new_v4();
            info!(?err_uuid, short_code, "Short code did not resolve");
            (
                StatusCode::NOT_FOUND,
                Json(Error {
                    error: "Link not found".to_owned(),
                    error_id: err_uuid.to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[instrument(skip(container))]
async fn create_guest_link(
    State(container): State<Container>,
    Json(CreateLinkPayload { url }): Json<CreateLinkPayload>,
) -> impl IntoResponse {
    create_link(&container, &url, Owner::Guest).await
}

#[instrument(skip(container))]
async fn create_owner_link(
    State(container): State<Container>,
    Path(owner_id): Path<String>,
    Json(CreateLinkPayload { url }): Json<CreateLinkPayload>,
) -> impl IntoResponse {
    create_link(&container, &url, Owner::from(owner_id)).await
}

async fn create_link(container: &Container, url: &str, owner: Owner) -> Response {
    container
        .read(link_service_capsule)
        .create_link(url, owner)
        .await
        .map(|shortened_link| (StatusCode::CREATED, Json(shortened_link)))
        .map_err(|error: CreateLinkError| {
            let err_uuid = Uuid::new_v4();
            match error {
                CreateLinkError::InvalidUrl(_) => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    (
                        StatusCode::BAD_REQUEST,
                        Json(Error {
                            error: error.to_string(),
                            error_id: err_uuid.to_string(),
                        }),
                    )
                }
                CreateLinkError::WriteFailure(_) => {
                    error!(?err_uuid, ?error, "Encountered an error while creating a link");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(Error {
                            error: "Internal server error".to_owned(),
                            error_id: err_uuid.to_string(),
                        }),
                    )
                }
            }
        })
        .into_response()
}

#[instrument(skip(container))]
async fn list_owner_links(
    State(container): State<Container>,
    Path(owner_id): Path<String>,
) -> impl IntoResponse {
    container
        .read(link_service_capsule)
        .links_for_owner(&Owner::from(owner_id))
        .await
        .map(Json)
        .map_err(|error: ListLinksError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ListLinksError::Internal(_) => {
                    error!(?err_uuid, ?error, "Encountered an error while listing links");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(Error {
                            error: "Internal server error".to_owned(),
                            error_id: err_uuid.to_string(),
                        }),
                    )
                }
            }
        })
}
