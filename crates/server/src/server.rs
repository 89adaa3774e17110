use std::net::SocketAddr;

use api_types::{Record, expense::Expense, income::Income, recurring::RecurringTemplate};
use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use sea_orm::DatabaseConnection;

use crate::{Owner, ServerError, recurring, resources};

#[derive(Clone)]
pub struct ServerState {
    pub db: DatabaseConnection,
}

/// Every request needs `Authorization: Bearer <token>`. The token is not
/// verified: it only scopes the data to one owner. A header that does not
/// parse as a bearer is answered like a missing one.
async fn auth(
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Ok(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(ServerError::Unauthorized);
    };
    let token = bearer.token().trim();
    if token.is_empty() {
        return Err(ServerError::Unauthorized);
    }

    request.extensions_mut().insert(Owner(token.to_string()));
    Ok(next.run(request).await)
}

fn resource<R: Record>(router: Router<ServerState>) -> Router<ServerState> {
    let path = format!("/{}", R::KIND.path());
    router
        .route(&path, get(resources::list::<R>).post(resources::create::<R>))
        .route(
            &format!("{path}/{{id}}"),
            patch(resources::update::<R>).delete(resources::delete::<R>),
        )
}

/// The full router, authentication included.
pub fn app(db: DatabaseConnection) -> Router {
    let state = ServerState { db };
    let router = Router::new()
        .route("/recurring/process-due", post(recurring::process_due))
        .route("/recurring/{id}/generate", post(recurring::generate));

    let router = resource::<Expense>(router);
    let router = resource::<Income>(router);
    resource::<RecurringTemplate>(router)
        .route_layer(middleware::from_fn(auth))
        .with_state(state)
}

pub async fn run_with_listener(
    db: DatabaseConnection,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(db)).await
}

pub fn spawn_with_listener(
    db: DatabaseConnection,
    listener: tokio::net::TcpListener,
) -> Result<SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(db, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
