pub mod people;
pub use self::people::*;

pub mod performance;
pub use self::performance::*;

diesel::allow_tables_to_appear_in_same_query!(employees, performance_reviews, goals);
