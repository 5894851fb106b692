use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::email::Mailer;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::permissions::PermissionRegistry;
use crate::routes::{auth, health, roles, tasks, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub permissions: Arc<PermissionRegistry>,
    pub mailer: Arc<Mailer>,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, permissions: PermissionRegistry, mailer: Mailer) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            permissions: Arc::new(permissions),
            mailer: Arc::new(mailer),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let permissions = PermissionRegistry::from_env()?;
    let mailer = Mailer::from_env()?;
    let state = AppState::new(pool, jwt_config, permissions, mailer);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(match std::env::var("ALLOWED_ORIGIN") {
            Ok(origin) => AllowOrigin::exact(
                origin
                    .parse()
                    .map_err(|_| AppError::configuration("ALLOWED_ORIGIN is not a valid origin"))?,
            ),
            Err(_) => AllowOrigin::from(Any),
        })
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/profile", get(auth::profile));

    // `/permissions` before `/:id` so it is not captured as an id
    let role_routes = Router::new()
        .route("/permissions", get(roles::get_permissions))
        .route("/", get(roles::list_roles))
        .route("/", post(roles::create_role))
        .route("/:id", get(roles::get_role))
        .route("/:id", put(roles::update_role))
        .route("/:id", delete(roles::delete_role));

    let user_routes = Router::new()
        .route("/", get(users::list_users))
        .route("/", post(users::create_user))
        .route("/:id", get(users::get_user))
        .route("/:id", put(users::update_user))
        .route("/:id", delete(users::delete_user));

    // `/users` and `/bulk-update` before `/:id` for the same reason
    let task_routes = Router::new()
        .route("/users", get(tasks::list_assignable_users))
        .route("/bulk-update", post(tasks::bulk_update_status))
        .route("/", get(tasks::list_tasks))
        .route("/", post(tasks::create_task))
        .route("/:id", get(tasks::get_task))
        .route("/:id", put(tasks::update_task))
        .route("/:id", delete(tasks::delete_task));

    let api = Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/role", role_routes)
        .nest("/user", user_routes)
        .nest("/tasks", task_routes);

    let router = Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
