// Kept in sync by hand with the SQL in db/schema.rs.

diesel::table! {
    courses (id) {
        id -> Text,
        title -> Text,
        pass_threshold -> Nullable<Integer>,
        sequential -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    content_items (id) {
        id -> Text,
        course_id -> Text,
        module_id -> Text,
        position -> Integer,
        kind -> Text,
        title -> Text,
        threshold_kind -> Text,
        threshold_value -> Nullable<Double>,
        duration_seconds -> Nullable<Double>,
        next_item_id -> Nullable<Text>,
        is_final_exam -> Bool,
        metadata_json -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    quiz_questions (id) {
        id -> Text,
        quiz_item_id -> Text,
        position -> Integer,
        question_kind -> Text,
        prompt -> Text,
        correct_answers_json -> Text,
    }
}

diesel::table! {
    progress_records (id) {
        id -> Text,
        user_id -> Text,
        content_item_id -> Text,
        elapsed_measure -> Double,
        completed -> Bool,
        completed_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    quiz_attempts (id) {
        id -> Text,
        user_id -> Text,
        quiz_item_id -> Text,
        score -> Integer,
        passed -> Bool,
        pass_threshold -> Integer,
        answers_json -> Text,
        submitted_at -> Text,
    }
}

diesel::table! {
    certificates (id) {
        id -> Text,
        user_id -> Text,
        course_id -> Text,
        verification_token -> Text,
        serial -> Text,
        issued_at -> Text,
    }
}

diesel::table! {
    scorm_packages (id) {
        id -> Text,
        content_item_id -> Text,
        storage_locator -> Text,
        runtime_version -> Text,
        archive_hash -> Text,
        launch_href -> Text,
        title -> Nullable<Text>,
        file_count -> Integer,
        size_bytes -> BigInt,
        uploaded_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    scorm_runtime_state (user_id, content_item_id) {
        user_id -> Text,
        content_item_id -> Text,
        lesson_status -> Text,
        lesson_location -> Text,
        suspend_data -> Text,
        total_seconds -> Double,
        session_count -> Integer,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    courses,
    content_items,
    quiz_questions,
    progress_records,
    quiz_attempts,
    certificates,
    scorm_packages,
    scorm_runtime_state,
);
