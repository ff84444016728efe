// Owned by the employee directory; this service only reads it.
diesel::table! {
    employees (employee_id) {
        employee_id -> Int4,
        first_name -> Varchar,
        last_name -> Varchar,
    }
}
