use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use gatekeeper::authz::{DefaultPolicyEvaluator, PolicyEvaluator};
use gatekeeper::db;
use gatekeeper::models::user::{NewUser, User};
use gatekeeper::store::seed::initialize_defaults;
use gatekeeper::store::SqliteStore;
use gatekeeper::utils::{hash_password, utc_now};

#[derive(Parser, Debug)]
#[command(author, version, about = "gatekeeper administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Create the default resource types, permissions and roles
    Initialize,
    /// Create an active superuser account
    CreateSuperuser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Admin")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    /// Permanently delete a user; their audit events are kept
    DeleteUser {
        #[arg(long)]
        email: String,
    },
    /// Drop revocation records of tokens that have expired
    PruneTokens,
    /// Ask the engine whether a user holds a permission
    Check {
        #[arg(long)]
        email: String,
        #[arg(long)]
        codename: String,
        #[arg(long)]
        resource: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            let target = last_applied_version(&pool)
                .await?
                .context("no migrations have been applied")?;
            // undo everything newer than the migration before the last one
            let previous = migrator
                .iter()
                .map(|m| m.version)
                .filter(|v| *v < target)
                .max()
                .unwrap_or(0);
            migrator
                .undo(&pool, previous)
                .await
                .context("failed to roll back migration")?;
            println!("Rolled back migration {target}");
        }
        Commands::Initialize => {
            let store = SqliteStore::new(db::init().await?);
            let summary = initialize_defaults(&store).await?;
            println!(
                "{}: {} resource types, {} permissions, roles {}",
                summary.message,
                summary.resource_types,
                summary.permissions,
                summary.created_roles.join(", ")
            );
        }
        Commands::CreateSuperuser {
            email,
            password,
            first_name,
            last_name,
        } => {
            let store = SqliteStore::new(db::init().await?);
            let user = store
                .create_user(NewUser {
                    email: email.trim().to_lowercase(),
                    first_name,
                    last_name,
                    patronymic: String::new(),
                    password_hash: hash_password(&password)?,
                    is_staff: true,
                    is_superuser: true,
                })
                .await?;
            println!("Created superuser {} ({})", user.email, user.id);
        }
        Commands::DeleteUser { email } => {
            let store = SqliteStore::new(db::init().await?);
            let user = store
                .user_by_email(&email.trim().to_lowercase())
                .await?
                .with_context(|| format!("no user with email {email}"))?;
            store.delete_user(user.id).await?;
            println!("Deleted user {} ({})", user.email, user.id);
        }
        Commands::PruneTokens => {
            let store = SqliteStore::new(db::init().await?);
            let pruned = store.prune_revoked_tokens(utc_now()).await?;
            println!("Pruned {pruned} expired token revocations");
        }
        Commands::Check {
            email,
            codename,
            resource,
        } => {
            let store = SqliteStore::new(db::init().await?);
            let user: User = store
                .user_by_email(&email.trim().to_lowercase())
                .await?
                .with_context(|| format!("no user with email {email}"))?
                .into();
            let resource = match resource {
                Some(id) => Some(
                    store
                        .resource(id)
                        .await?
                        .with_context(|| format!("no resource {id}"))?,
                ),
                None => None,
            };

            let engine = DefaultPolicyEvaluator::new(store);
            let decision = engine.decide(&user, &codename, resource.as_ref()).await?;
            println!(
                "{} {} -> {} ({})",
                user.email,
                codename,
                if decision.is_allowed() { "allow" } else { "deny" },
                decision.reason()
            );
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn applied_versions(pool: &SqlitePool) -> anyhow::Result<HashSet<i64>> {
    let table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    if table.is_none() {
        return Ok(HashSet::new());
    }

    let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.try_get::<i64, _>("version").ok())
        .collect())
}

async fn last_applied_version(pool: &SqlitePool) -> anyhow::Result<Option<i64>> {
    Ok(applied_versions(pool).await?.into_iter().max())
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let applied = applied_versions(pool).await?;

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter().filter(|m| m.migration_type.is_up_migration()) {
        let status = if applied.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when run from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
