pub mod enums;
pub mod schema;
pub mod state;
pub mod utils;

pub use enums::*;
pub use schema::*;
pub use state::AppState;
pub use utils::{create_conn, redact_database_url, run_migrations, DbPool};
