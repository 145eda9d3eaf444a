use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use common::cache::RedisPool;
use common::KvStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use account::{
    AppState,
    code::{CodeService, CodeStore},
    config::Settings,
    database,
    jwt::JwtService,
    limiter::SlidingWindowLimiter,
    repositories::PgUserStore,
    routes,
    session::SessionManager,
    sms::{FailoverSender, SmsPipeline},
    user_cache::{CachedUserRepository, UserCache},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    info!("Starting account service");
    let settings = Settings::load()?;

    // Database
    let pool = database::init_pool(&settings.database_config()).await?;
    if !database::health_check(&pool).await {
        anyhow::bail!("Failed to connect to database");
    }
    database::apply_schema(&pool).await?;

    // Key-value store
    let redis = RedisPool::new(&settings.redis_config()).await?;
    if !redis.health_check().await? {
        anyhow::bail!("Failed to connect to Redis");
    }
    let store: Arc<dyn KvStore> = Arc::new(redis);

    let jwt_service = JwtService::new(settings.jwt_config())?;
    let sessions = SessionManager::new(Arc::clone(&store), jwt_service);

    let limiter = Arc::new(SlidingWindowLimiter::new(
        Arc::clone(&store),
        settings.limiter_config(),
    ));
    let sms = SmsPipeline::builder()
        .limit(limiter.clone(), "sms-limiter")
        .trace()
        .observe()
        .deliver(Arc::new(FailoverSender::from_names(&settings.sms.providers)?));
    let codes = CodeService::new(
        CodeStore::new(Arc::clone(&store), settings.code_config()),
        sms,
    );

    let cache_config = settings.cache_config();
    let users = CachedUserRepository::new(
        Arc::new(PgUserStore::new(pool)),
        UserCache::new(Arc::clone(&store), cache_config.ttl),
        cache_config,
    );

    let app_state = AppState {
        sessions,
        codes,
        users,
        ip_limiter: limiter,
    };

    let app = routes::create_router(app_state);

    let address = settings.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("Account service listening on {}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
