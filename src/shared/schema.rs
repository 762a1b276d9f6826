diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        password_hash -> Varchar,
        display_name -> Varchar,
        role -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    clients (id) {
        id -> Uuid,
        name -> Varchar,
        company -> Nullable<Varchar>,
        email -> Nullable<Varchar>,
        phone -> Nullable<Varchar>,
        address -> Nullable<Text>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    pipelines (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    pipeline_stages (id) {
        id -> Uuid,
        pipeline_id -> Uuid,
        name -> Varchar,
        sort_order -> Int4,
        probability -> Int4,
        is_final -> Bool,
        color -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    leads (id) {
        id -> Uuid,
        pipeline_id -> Uuid,
        stage_id -> Uuid,
        client_id -> Nullable<Uuid>,
        title -> Varchar,
        description -> Nullable<Text>,
        value -> Nullable<Float8>,
        currency -> Nullable<Varchar>,
        source -> Nullable<Varchar>,
        assigned_to -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        closed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    tasks (id) {
        id -> Uuid,
        lead_id -> Nullable<Uuid>,
        client_id -> Nullable<Uuid>,
        assigned_to -> Nullable<Uuid>,
        title -> Varchar,
        description -> Nullable<Text>,
        due_date -> Nullable<Timestamptz>,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    calls (id) {
        id -> Uuid,
        lead_id -> Nullable<Uuid>,
        client_id -> Nullable<Uuid>,
        phone_number -> Varchar,
        direction -> Varchar,
        status -> Varchar,
        retell_call_id -> Nullable<Varchar>,
        transcript -> Nullable<Text>,
        summary -> Nullable<Text>,
        duration_seconds -> Nullable<Int4>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    proposals (id) {
        id -> Uuid,
        lead_id -> Uuid,
        title -> Varchar,
        body -> Text,
        amount -> Nullable<Float8>,
        currency -> Nullable<Varchar>,
        status -> Varchar,
        generated_by_ai -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    settings (id) {
        id -> Uuid,
        key -> Varchar,
        value -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(pipeline_stages -> pipelines (pipeline_id));
diesel::joinable!(leads -> pipelines (pipeline_id));
diesel::joinable!(leads -> clients (client_id));
diesel::joinable!(proposals -> leads (lead_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    clients,
    pipelines,
    pipeline_stages,
    leads,
    tasks,
    calls,
    proposals,
    settings,
);
