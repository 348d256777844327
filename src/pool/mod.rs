mod connection_pool;

pub use connection_pool::ConnectionPool;
pub use connection_pool::PoolError;
