use std::sync::Arc;

use petitioner::channels::EmailChannel;
use petitioner::config::Settings;
use petitioner::pipeline::types::{ContactMailer, MessageSource};
use petitioner::pipeline::{ExecutionRouter, PetitionPipeline};
use petitioner::signer::{BrowserSigner, Signer};
use petitioner::store::{LibSqlStore, RecordStore};
use petitioner::web::{StatusInfo, routes};
use petitioner::worker::spawn_pass_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_env();

    eprintln!("Persistent Petitioner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", settings.database_path);
    eprintln!("   Web UI: http://0.0.0.0:{}/", settings.web_port);
    eprintln!(
        "   Automation: {}",
        if settings.automation_enabled { "ENABLED" } else { "disabled (safe default)" }
    );
    eprintln!(
        "   Retry ceiling: {}, sign timeout: {}s",
        settings.retry_ceiling,
        settings.sign_timeout.as_secs()
    );

    // ── Record store ────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&settings.database_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", settings.database_path, e);
                std::process::exit(1);
            }),
    );

    // ── Pipeline + pass loop (only with a configured inbox) ─────────
    let mut pass_shutdown = None;
    match settings.email.clone() {
        Some(email_settings) => {
            eprintln!(
                "   Email: enabled (IMAP: {}, SMTP: {}, every {} min)",
                email_settings.imap_host,
                email_settings.smtp_host,
                settings.check_interval.as_secs() / 60
            );

            let channel = Arc::new(EmailChannel::new(email_settings));
            let signer: Arc<dyn Signer> = Arc::new(BrowserSigner::new());
            let router = ExecutionRouter::new(
                signer,
                Arc::clone(&channel) as Arc<dyn ContactMailer>,
                settings.profile.clone(),
                settings.automation_enabled,
                settings.sign_timeout,
            );
            let pipeline = Arc::new(PetitionPipeline::new(
                Arc::clone(&store),
                router,
                settings.retry_ceiling,
            ));

            let (_handle, shutdown) = spawn_pass_loop(
                pipeline,
                channel as Arc<dyn MessageSource>,
                settings.check_interval,
            );
            pass_shutdown = Some(shutdown);
        }
        None => {
            eprintln!("   Email: not configured (set EMAIL_IMAP_HOST to enable polling)");
        }
    }

    // ── Web server ──────────────────────────────────────────────────
    let status = StatusInfo {
        email_configured: settings.email.is_some(),
        profile_configured: settings.profile.is_complete(),
        automation_enabled: settings.automation_enabled,
        retry_ceiling: settings.retry_ceiling,
        check_interval_secs: settings.check_interval.as_secs(),
    };
    let app = routes(Arc::clone(&store), status);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.web_port)).await?;
    tracing::info!(port = settings.web_port, "Web server started");
    axum::serve(listener, app).await?;

    if let Some(shutdown) = pass_shutdown {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    Ok(())
}
