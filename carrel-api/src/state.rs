use std::sync::Arc;

use carrel_core::{
    BookingEngine, BookingRepository, BookingRules, Clock, InMemoryStore, SeatRegistry,
    SeatRepository, UserDirectory, UserRepository,
};
use carrel_store::RedisClient;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
    pub bcrypt_cost: u32,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: BookingEngine,
    pub directory: UserDirectory,
    pub clock: Arc<dyn Clock>,
    /// Rate limiting is disabled when absent.
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: i64,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        seats: Arc<dyn SeatRepository>,
        bookings: Arc<dyn BookingRepository>,
        users: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
        rules: BookingRules,
        auth: AuthConfig,
    ) -> Self {
        let registry = SeatRegistry::new(seats, bookings.clone(), clock.clone());
        let engine = BookingEngine::new(registry, bookings, clock.clone(), rules);
        let directory = UserDirectory::new(users, engine.clone(), clock.clone());
        Self {
            engine,
            directory,
            clock,
            redis: None,
            rate_limit_per_minute: 0,
            auth,
        }
    }

    /// Everything backed by one process-local store.
    pub fn in_memory(clock: Arc<dyn Clock>, rules: BookingRules, auth: AuthConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::new(store.clone(), store.clone(), store, clock, rules, auth)
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, per_minute: i64) -> Self {
        self.redis = Some(redis);
        self.rate_limit_per_minute = per_minute;
        self
    }

    pub fn registry(&self) -> &SeatRegistry {
        self.engine.registry()
    }
}
