use crate::core::shared::schema::people::employees;

diesel::table! {
    performance_reviews (review_id) {
        review_id -> Int4,
        employee_id -> Int4,
        review_date -> Date,
        reviewer_id -> Nullable<Int4>,
        review_period_start -> Date,
        review_period_end -> Date,
        score -> Numeric,
        feedback -> Text,
        goal_progress -> Numeric,
        strengths -> Nullable<Text>,
        areas_for_improvement -> Nullable<Text>,
        recommendations -> Nullable<Text>,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    goals (goal_id) {
        goal_id -> Int4,
        employee_id -> Int4,
        title -> Varchar,
        description -> Text,
        target_value -> Nullable<Numeric>,
        current_value -> Numeric,
        unit -> Nullable<Varchar>,
        start_date -> Date,
        end_date -> Date,
        status -> Varchar,
        progress_percentage -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

// reviewer_id also references employees but diesel allows one join path per table pair.
diesel::joinable!(performance_reviews -> employees (employee_id));
diesel::joinable!(goals -> employees (employee_id));
