use std::{process, sync::Arc};

use newscache::{
    application::{context::ServiceContext, error::AppError, maintenance::SweepScope},
    config,
    infra::{
        error::InfraError,
        http::{self, ApiState},
        storage::build_blob_store,
        tables::build_table_store,
        telemetry,
    },
    util::SystemClock,
};
use tokio::sync::oneshot;
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let context = build_context(&settings)?;

    match command {
        config::Command::Serve(_) => run_serve(&settings, &context).await,
        config::Command::Sweep(args) => run_sweep(&context, args.scope).await,
        config::Command::Status(_) => run_status(&context).await,
    }
}

fn build_context(settings: &config::Settings) -> Result<ServiceContext, AppError> {
    let blobs = build_blob_store(&settings.storage).map_err(InfraError::from)?;
    let tables = build_table_store(&settings.storage).map_err(InfraError::from)?;
    ServiceContext::new(settings, blobs, tables, Arc::new(SystemClock))
}

async fn run_serve(settings: &config::Settings, context: &ServiceContext) -> Result<(), AppError> {
    // Upstream scraper, feed and translator clients are attached by embedders
    // through `ApiState::with_*`; the stock binary serves the operations surface.
    let state = ApiState::new(context);
    serve_http(settings, state).await
}

async fn run_sweep(context: &ServiceContext, scope: SweepScope) -> Result<(), AppError> {
    let report = context.maintenance().sweep(scope).await?;
    print_json(&report)
}

async fn run_status(context: &ServiceContext) -> Result<(), AppError> {
    let status = context.maintenance().status().await?;
    print_json(&status)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "HTTP server listening");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        () = shutdown_signal() => {}
        finished = &mut server => {
            return match finished {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
                Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
            };
        }
    }
    info!("Shutdown requested; draining connections");
    let _ = stop_tx.send(());

    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(AppError::unexpected(format!("server error: {err}"))),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server task failed: {err}"))),
        Err(_) => {
            warn!(
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
