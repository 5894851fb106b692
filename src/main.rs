use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use taskboard::models;
use taskboard::routes::auth;

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(
            models::user::User,
            auth::AuthResponse,
            auth::LoginRequest,
            auth::RegisterRequest,
            models::user::UserCreateRequest,
            models::user::UserUpdateRequest,
            models::role::Role,
            models::role::RoleCreateRequest,
            models::role::RoleUpdateRequest,
            models::task::Task,
            models::task::TaskCreateRequest,
            models::task::TaskUpdateRequest,
            models::task::BulkUpdateRequest
        )
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Roles", description = "Role and permission management"),
        (name = "Users", description = "User administration"),
        (name = "Tasks", description = "Task management")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = taskboard::db::init().await?;
    let app = taskboard::create_app(pool).await?;
    let app = app.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn load_env() {
    // missing .env is fine in production, env vars come from the environment
    let _ = dotenvy::dotenv();
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}
