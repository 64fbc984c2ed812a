use std::{
    env::{self, VarError},
    fmt::Display,
    str::FromStr,
};

use anyhow::Context;
use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn, EntityTrait};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::orm::link;

const DB_URL_VAR: &str = "DB_URL";
const ADDR_VAR: &str = "ADDR";
const REDIRECT_COUNTDOWN_SECONDS_VAR: &str = "REDIRECT_COUNTDOWN_SECONDS";

const DEFAULT_ADDR: &str = "127.0.0.1:0";
const DEFAULT_REDIRECT_COUNTDOWN_SECONDS: u32 = 10;

/// Connects to the database once and checks the `links` table is usable
/// before anything is served.
///
/// # Errors
/// Will return [`Err`] if the connection to the database fails
/// or the `links` table cannot be read.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!("Connecting to database");
    let db = Database::connect(db_connection_options).await?;
    ensure_links_table(&db).await?;
    set_db_conn(db);

    info!("Container initialized");
    Ok(container)
}

async fn ensure_links_table(db: &DbConn) -> anyhow::Result<()> {
    link::Entity::find()
        .one(db)
        .await
        .context("Cannot read the links table; has sql/schema.sql been applied?")?;
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvVarError {
    #[error("{name} is not set")]
    Missing { name: &'static str },
    #[error("{name} is invalid unicode: {value}")]
    NotUnicode { name: &'static str, value: String },
    #[error("{name} is invalid ({value:?}): {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Interprets the result of reading environment variable `name`.
/// When the variable is unset, `default` is used if there is one.
fn parse_env_var<T>(
    name: &'static str,
    raw: Result<String, VarError>,
    default: Option<T>,
) -> Result<T, EnvVarError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        Ok(value) => {
            info!(var = name, "Environment variable set");
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|err| EnvVarError::Invalid {
                name,
                value,
                reason: err.to_string(),
            })
        }
        Err(VarError::NotPresent) => default
            .inspect(|_| warn!(var = name, "Environment variable not set; using default"))
            .ok_or(EnvVarError::Missing { name }),
        Err(VarError::NotUnicode(actual)) => Err(EnvVarError::NotUnicode {
            name,
            value: actual.display().to_string(),
        }),
    }
}

/// # Panics
/// Panics when the variable is invalid, or unset without a default.
fn env_var_or_panic<T>(name: &'static str, default: Option<T>) -> T
where
    T: FromStr,
    T::Err: Display,
{
    parse_env_var(name, env::var(name), default).unwrap_or_else(|err| panic!("{err}"))
}

/// # Panics
/// Panics when environment variable is not set or is invalid.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    env_var_or_panic::<String>(DB_URL_VAR, None).into()
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    env_var_or_panic(ADDR_VAR, Some(DEFAULT_ADDR.to_owned()))
}

/// Seconds a client should count down before navigating to a resolved link.
///
/// # Panics
/// Panics when environment variable is not a non-negative integer.
pub fn redirect_countdown_seconds_capsule(_: CapsuleHandle) -> u32 {
    env_var_or_panic(
        REDIRECT_COUNTDOWN_SECONDS_VAR,
        Some(DEFAULT_REDIRECT_COUNTDOWN_SECONDS),
    )
}
