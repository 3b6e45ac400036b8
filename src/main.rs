mod application;
mod catalog;
mod clock;
mod config;
mod domain;
mod payment;
mod read_model;
mod store;

use std::{
    future::{ready, Ready},
    sync::Arc,
};

use actix_web::{
    dev::{Payload, ServerHandle},
    get,
    http::StatusCode,
    middleware, post, put,
    web::{self, Data, Json, Path, Query},
    App, FromRequest, HttpRequest, HttpResponse, HttpServer, ResponseError,
};
use anyhow::Context;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::application::{Application, CreateBooking, UpdateBookingStatus};
use crate::catalog::{InMemoryCatalog, ListingCatalog, PgCatalog};
use crate::clock::SystemClock;
use crate::config::{AppConfig, HttpConfig};
use crate::domain::{ActingUser, BookingStatus, Role, UserId};
use crate::payment::MockPayments;
use crate::read_model::{AvailabilityQuery, Repository};
use crate::store::{BookingStore, InMemoryStore, PgStore};

const USER_ID_HEADER: &str = "X-User-Id";
const USER_ROLE_HEADER: &str = "X-User-Role";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logger()?;

    let config = AppConfig::from_env()?;
    let (store, catalog) = connect(&config).await?;

    let application = Application::new(
        store.clone(),
        catalog.clone(),
        Arc::new(MockPayments::default()),
        Arc::new(SystemClock),
    );
    let repository = Repository::new(store, catalog);

    http_server(config.http, application, repository).await
}

fn init_logger() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let subscriber = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    tracing_subscriber::registry()
        .with(subscriber)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

async fn connect(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn BookingStore>, Arc<dyn ListingCatalog>)> {
    if let Some(database) = &config.database {
        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .connect(&database.url)
            .await
            .context("cannot connect to the database")?;
        let store = PgStore::new(pool.clone()).await?;
        if config.catalog_seed.is_some() {
            warn!("CATALOG_SEED_FILE is ignored when DATABASE_URL is set");
        }
        info!("bookings are stored in postgres");
        return Ok((Arc::new(store), Arc::new(PgCatalog::new(pool))));
    }

    let catalog = match &config.catalog_seed {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read catalog seed {}", path.display()))?;
            InMemoryCatalog::from_json(&raw)
                .with_context(|| format!("malformed catalog seed {}", path.display()))?
        }
        None => InMemoryCatalog::default(),
    };
    warn!("DATABASE_URL is not set, bookings are kept in memory");
    Ok((Arc::new(InMemoryStore::default()), Arc::new(catalog)))
}

async fn http_server(
    config: HttpConfig,
    app: Application,
    repository: Repository,
) -> anyhow::Result<()> {
    let app = Data::new(app);
    let repository = Data::new(repository);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(app.clone())
            .app_data(repository.clone())
            .configure(configure)
    })
    .disable_signals()
    .bind((config.host.as_str(), config.port))?
    .run();

    info!(host = %config.host, port = config.port, "listening");
    tokio::spawn(shutdown(server.handle()));
    server.await?;

    Ok(())
}

async fn shutdown(handle: ServerHandle) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("shutting down");
            handle.stop(true).await;
        }
        Err(err) => error!(%err, "failed to listen for ctrl-c"),
    }
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| MalformedRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| MalformedRequest(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|_, _| application::Error::from(domain::Error::NotFound).into()),
    )
    .service(health)
    .service(create_booking)
    .service(my_bookings)
    .service(booking_requests)
    .service(earnings)
    .service(update_booking_status)
    .service(cancel_booking)
    .service(complete_booking)
    .service(availability);
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

#[post("/bookings")]
async fn create_booking(
    app: Data<Application>,
    user: ActingUser,
    data: Json<CreateBooking>,
) -> Result<HttpResponse, application::Error> {
    let booking = app.create_booking(user, data.into_inner()).await?;
    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Booking created successfully. Awaiting host approval.",
        "booking": booking,
    })))
}

#[get("/bookings/my-bookings")]
async fn my_bookings(
    repository: Data<Repository>,
    user: ActingUser,
) -> Result<HttpResponse, application::Error> {
    let bookings = repository.my_bookings(user).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "bookings": bookings })))
}

#[get("/bookings/requests")]
async fn booking_requests(
    repository: Data<Repository>,
    user: ActingUser,
) -> Result<HttpResponse, application::Error> {
    let bookings = repository.booking_requests(user).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "bookings": bookings })))
}

#[get("/bookings/earnings")]
async fn earnings(
    repository: Data<Repository>,
    user: ActingUser,
) -> Result<HttpResponse, application::Error> {
    let earnings = repository.earnings(user).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "earnings": earnings })))
}

#[put("/bookings/{id}/status")]
async fn update_booking_status(
    app: Data<Application>,
    user: ActingUser,
    id: Path<Uuid>,
    data: Json<UpdateBookingStatus>,
) -> Result<HttpResponse, application::Error> {
    let booking = app
        .update_booking_status(user, id.into_inner(), data.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("Booking {} successfully", booking.status),
        "booking": booking,
    })))
}

#[put("/bookings/{id}/cancel")]
async fn cancel_booking(
    app: Data<Application>,
    user: ActingUser,
    id: Path<Uuid>,
) -> Result<HttpResponse, application::Error> {
    let booking = app.cancel_booking(user, id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Booking cancelled successfully",
        "booking": booking,
    })))
}

#[put("/bookings/{id}/complete")]
async fn complete_booking(
    app: Data<Application>,
    user: ActingUser,
    id: Path<Uuid>,
) -> Result<HttpResponse, application::Error> {
    let booking = app.complete_booking(user, id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Booking completed successfully",
        "booking": booking,
    })))
}

#[get("/listings/{id}/availability")]
async fn availability(
    repository: Data<Repository>,
    _user: ActingUser,
    id: Path<Uuid>,
    query: Query<AvailabilityQuery>,
) -> Result<HttpResponse, application::Error> {
    let availability = repository
        .availability(id.into_inner(), query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "availability": availability })))
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<BookingStatus>,
}

impl ErrorBody {
    fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind,
            message: message.into(),
            remaining: None,
            status: None,
        }
    }
}

impl ResponseError for application::Error {
    fn status_code(&self) -> StatusCode {
        use domain::Error::*;
        match self {
            application::Error::Domain(err) => match err {
                MissingField(_)
                | InvalidCapacity
                | StartDateInPast
                | InvalidDateRange
                | ExceedsTotalCapacity { .. }
                | ExceedsAvailableCapacity { .. }
                | InvalidTransition { .. }
                | InvalidStatus => StatusCode::BAD_REQUEST,
                RoleRequired(_) => StatusCode::FORBIDDEN,
                NotFound | Forbidden | ListingUnavailable => StatusCode::NOT_FOUND,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            application::Error::Domain(err) => {
                let mut body = ErrorBody::new(err.kind(), err.to_string());
                match err {
                    domain::Error::ExceedsAvailableCapacity { remaining } => {
                        body.remaining = Some(*remaining)
                    }
                    domain::Error::InvalidTransition { current } => body.status = Some(*current),
                    _ => {}
                }
                body
            }
            unexpected => {
                error!(error = %unexpected, "request failed unexpectedly");
                ErrorBody::new("Unexpected", "server error")
            }
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("malformed request: {0}")]
struct MalformedRequest(String);

impl ResponseError for MalformedRequest {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(ErrorBody::new("MalformedRequest", self.to_string()))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    #[error("missing {0} header")]
    Missing(&'static str),
    #[error("invalid {0} header")]
    Invalid(&'static str),
}

impl ResponseError for IdentityError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(ErrorBody::new("Unauthenticated", self.to_string()))
    }
}

/// Identity is resolved upstream and forwarded as headers.
impl FromRequest for ActingUser {
    type Error = IdentityError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(identify(req))
    }
}

fn identify(req: &HttpRequest) -> Result<ActingUser, IdentityError> {
    let id = header(req, USER_ID_HEADER)?
        .parse::<UserId>()
        .map_err(|_| IdentityError::Invalid(USER_ID_HEADER))?;
    let role = header(req, USER_ROLE_HEADER)?
        .parse::<Role>()
        .map_err(|_| IdentityError::Invalid(USER_ROLE_HEADER))?;
    Ok(ActingUser::new(id, role))
}

fn header<'r>(req: &'r HttpRequest, name: &'static str) -> Result<&'r str, IdentityError> {
    req.headers()
        .get(name)
        .ok_or(IdentityError::Missing(name))?
        .to_str()
        .map_err(|_| IdentityError::Invalid(name))
}
