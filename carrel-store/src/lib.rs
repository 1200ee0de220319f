pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod redis_repo;
pub mod seat_repo;
pub mod user_repo;

pub use app_config::{Config, StorageBackend};
pub use booking_repo::StoreBookingRepository;
pub use database::DbClient;
pub use redis_repo::RedisClient;
pub use seat_repo::StoreSeatRepository;
pub use user_repo::StoreUserRepository;
