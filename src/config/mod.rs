pub mod schema;

pub use schema::{resolve_config_dir, CalendarConfig, Config, GatewayConfig, SessionsConfig};
