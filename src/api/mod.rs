pub mod health;
pub mod routes;

pub use health::SyncHealth;
pub use routes::{router, ApiState};
