use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::{Router, middleware as axum_middleware};
use tower_http::trace::TraceLayer;

use crate::AppState;

#[cfg(test)]
use axum_test::TestServer;

pub(crate) mod client;
pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod middleware;
pub(crate) mod prove;
pub(crate) mod users;

/// Builds the keyshare router: the public registration and PIN endpoints,
/// the authenticated proof endpoints behind the user/authorization
/// middleware chain, and the optional downstream issuance mount.
pub(crate) fn new_app(
    app_state: AppState,
    input_max_body_limit: usize,
    issuance_router: Option<Router>,
) -> Router {
    let authenticated = Router::new()
        .route("/users/isAuthorized", post(users::is_authorized))
        .route("/prove/getCommitments", post(prove::get_commitments))
        .route("/prove/getResponse", post(prove::get_response))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            middleware::authorization_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            middleware::user_middleware,
        ));

    let mut router = Router::new()
        .route("/client/register", post(client::register))
        .route("/users/verify/pin", post(users::verify_pin))
        .route("/users/change/pin", post(users::change_pin))
        .merge(authenticated)
        .merge(health::routes());

    // downstream issuance session server, used during enrollment
    if let Some(issuance) = issuance_router {
        router = router.nest_service("/irma", issuance);
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(input_max_body_limit))
        .with_state(app_state)
}

#[cfg(test)]
pub(crate) fn new_test_app(app_state: AppState, input_max_body_limit: usize) -> TestServer {
    let app = new_app(app_state, input_max_body_limit, None);
    TestServer::builder()
        .expect_success_by_default()
        .mock_transport()
        .build(app)
        .unwrap()
}
