use anyhow::Result;
use smtpd_rs::config::Config;
use smtpd_rs::smtp::SmtpServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so logging can be configured from it
    let config = if std::path::Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        Config::default()
    };

    if config.logging.enabled {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        match config.logging.format.as_str() {
            "json" => builder.json().init(),
            _ => builder.pretty().init(),
        }
    }

    info!("Starting {}", config.logging.service_name);
    info!("  SMTP listening on: {}", config.smtp.listen_addr);
    info!("  Hostname: {}", config.server.hostname);
    info!("  Maildir path: {}", config.storage.maildir_path);
    info!("  TLS: {}", config.smtp.enable_tls);
    info!("  AUTH: {}", config.smtp.enable_auth);
    info!("  Greylist: {}", config.greylist.enabled);
    info!("  DNSBL: {}", config.dnsbl.enabled);
    info!("  Webhook: {}", config.webhook.enabled);

    let server = SmtpServer::bind(config).await?;
    server.run().await?;

    Ok(())
}
