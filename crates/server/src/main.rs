use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use charter_server::{
    config::Config,
    db::Database,
    invitation::{create_invitation, NewInvitation},
    AppState,
};

#[derive(Parser)]
#[command(name = "charter-server")]
#[command(about = "Invitation and session service for charter bookings", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Apply database migrations and exit
    Migrate,

    /// Issue an invitation and print its token
    Invite {
        #[arg(long)]
        email: String,

        /// Existing customer to invite
        #[arg(long)]
        customer_id: Option<i64>,

        #[arg(long)]
        expires_in_hours: Option<i64>,
    },

    /// Create a staff account
    CreateStaff {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charter_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::new(&config.database.path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database.path))?;
    db.run_migrations().await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(db, config).await,
        Commands::Migrate => Ok(()),
        Commands::Invite {
            email,
            customer_id,
            expires_in_hours,
        } => {
            let invitation = create_invitation(
                &db,
                NewInvitation {
                    email,
                    customer_id,
                    expires_in_hours: expires_in_hours
                        .unwrap_or(config.invitations.default_expiry_hours),
                },
            )
            .await?;

            println!("Invitation: {}", invitation.id);
            println!("Customer:   {}", invitation.customer_id.unwrap_or_default());
            println!("Token:      {}", invitation.token);
            if let Some(expires_at) = invitation.expires_at {
                println!("Expires:    {}", expires_at.to_rfc3339());
            }
            Ok(())
        }
        Commands::CreateStaff {
            email,
            password,
            first_name,
            last_name,
        } => {
            let state = AppState::new(db, config);
            let user = state
                .accounts
                .create_staff(&email, &password, first_name.as_deref(), last_name.as_deref())
                .await?;
            println!("Created staff user {} ({})", user.id, email);
            Ok(())
        }
    }
}

async fn serve(db: Database, config: Config) -> Result<()> {
    tracing::info!("Starting charter server on {}:{}", config.server.host, config.server.port);

    // Create app state
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(db, config);

    // Build router
    let app = charter_server::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
