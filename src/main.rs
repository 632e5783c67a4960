use std::{future::IntoFuture, process, time::Duration};

use supercache::{
    application::error::AppError,
    config::{self, ConfigArgs},
    domain::entities::NewDocument,
    infra::{
        bootstrap::{Application, build_application},
        error::InfraError,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::Config(args) => print_cache_config(&settings, &args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application(&settings);
    seed_welcome_document(&app, &settings).await?;

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;
    info!(addr = %settings.server.addr, "Listening");

    let server = axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    let grace = settings.server.graceful_shutdown;

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::from(InfraError::from(err)))?;
        }
        () = shutdown_deadline(grace) => {
            warn!(grace_seconds = grace.as_secs(), "Graceful shutdown timed out; dropping connections");
        }
    }
    info!("Server stopped");
    Ok(())
}

async fn seed_welcome_document(app: &Application, settings: &config::Settings) -> Result<(), AppError> {
    let document = app
        .content
        .insert_document(NewDocument {
            scope_id: settings.index_scope_id(),
            category_id: 0,
            owner_id: 0,
            title: "Welcome".to_string(),
            body: "This page is served through the page cache.".to_string(),
        })
        .await?;
    info!(document_id = document.id, "Seeded welcome document");
    Ok(())
}

fn print_cache_config(settings: &config::Settings, args: &ConfigArgs) -> Result<(), AppError> {
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&settings.cache)
    } else {
        serde_json::to_string(&settings.cache)
    }
    .map_err(|err| AppError::unexpected(format!("failed to serialize cache config: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received; draining connections");
}

/// Resolves `grace` after the shutdown signal.
async fn shutdown_deadline(grace: Duration) {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}
