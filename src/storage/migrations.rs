//! Embedded schema migrations, versioned through the `revision` table.

use sqlx::PgPool;

const MIGRATION_01: &str = r#"
create type order_status as enum ('REGISTERED', 'PROCESSING', 'PROCESSED', 'INVALID');

create table if not exists "user"
(
    id        bigserial
        constraint users_pk primary key,
    login     varchar(255)   not null,
    password  varchar(255)   not null,
    balance   numeric(10, 2) not null default 0,
    withdrawn numeric(10, 2) not null default 0
);

create unique index if not exists users_login_uindex
    on "user" (login);

create table if not exists user_session
(
    user_id    bigint                   not null
        constraint user_session_user_id_fk
            references "user"
            on update cascade on delete cascade,
    token      varchar(64)              not null,
    created_at timestamp with time zone not null,
    expires_at timestamp with time zone not null,
    constraint user_session_pk
        primary key (user_id, token)
);

create index if not exists user_session_token_index
    on user_session (token, expires_at);

create table if not exists "order"
(
    order_num    varchar(255)                                          not null
        constraint order_pk
            primary key,
    user_id      bigint                                                not null
        constraint order_user_id_fk
            references "user"
            on update restrict on delete restrict,
    status       order_status default 'REGISTERED'::order_status       not null,
    accrual      numeric(10, 2),
    processed_at timestamp with time zone,
    uploaded_at  timestamp with time zone                              not null
);

create index if not exists order_uploaded_at_index
    on "order" (uploaded_at);

create index if not exists order_user_id_uploaded_at_index
    on "order" (user_id, uploaded_at);

create table if not exists withdrawal
(
    id           bigserial
        constraint withdrawal_pk
            primary key,
    order_num    varchar(255)             not null,
    sum          numeric(10, 2)           not null,
    processed_at timestamp with time zone not null default now(),
    user_id      bigint                   not null
        constraint withdrawal_user_id_fk
            references "user"
            on update restrict on delete restrict
);

create index if not exists withdrawal_user_id_processed_at_index
    on withdrawal (user_id, processed_at);
"#;

const MIGRATIONS: &[&str] = &[MIGRATION_01];

/// Brings the schema up to the latest revision. Each pending migration runs
/// in its own transaction together with the revision bump.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS revision
           (version BIGINT CONSTRAINT revision_version_pk PRIMARY KEY)"#,
    )
    .execute(pool)
    .await?;

    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM revision ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    let version = version.unwrap_or(0);

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let target = idx as i64 + 1;
        if version >= target {
            continue;
        }

        tracing::info!(version = target, "applying schema migration");

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO revision (version) VALUES ($1)")
            .bind(target)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}
