use crate::antispam::{DnsblGate, GreylistStore};
use crate::config::Config;
use crate::error::Result;
use crate::security::{Authenticator, RateLimiter, TlsConfig};
use crate::smtp::session::{Session, SessionContext};
use crate::storage::MaildirStorage;
use crate::webhook::WebhookNotifier;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Connection acceptor
///
/// Owns the listening socket and spawns one session task per accepted
/// connection. A semaphore sized to `max_connections` enforces admission
/// control: at the ceiling a new connection is refused with 421 instead of
/// being admitted and starved.
pub struct SmtpServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    permits: Arc<Semaphore>,
    sweep_interval: Duration,
}

impl SmtpServer {
    /// Validate the config, build the shared policy components, and bind
    /// the listening socket.
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let tls = match (&config.smtp.tls_cert_path, &config.smtp.tls_key_path) {
            (Some(cert), Some(key)) if config.smtp.enable_tls => {
                Some(TlsConfig::from_pem_files(cert, key)?)
            }
            _ => None,
        };

        let authenticator = match &config.smtp.auth_database_url {
            Some(url) if config.smtp.enable_auth => Some(Authenticator::new(url).await?),
            _ => None,
        };

        let limiter = Arc::new(RateLimiter::new(
            config.limits.per_ip,
            config.limits.per_user,
            Duration::from_secs(config.limits.window_secs),
        ));

        let greylist = config.greylist.enabled.then(|| {
            Arc::new(GreylistStore::new(
                config.greylist.delay_secs,
                config.greylist.expiry_secs,
            ))
        });

        let dnsbl = config.dnsbl.enabled.then(|| {
            Arc::new(DnsblGate::new(
                config.dnsbl.zones.clone(),
                Duration::from_millis(config.dnsbl.timeout_ms),
            ))
        });

        let webhook = if config.webhook.enabled {
            config.webhook.url.clone().map(WebhookNotifier::start)
        } else {
            None
        };

        let storage = Arc::new(MaildirStorage::new(config.storage.maildir_path.clone()));

        let listener = TcpListener::bind(&config.smtp.listen_addr).await?;
        let permits = Arc::new(Semaphore::new(config.smtp.max_connections));
        let sweep_interval = Duration::from_secs(config.limits.cleanup_interval_secs);

        let ctx = Arc::new(SessionContext {
            config,
            tls,
            authenticator,
            limiter,
            greylist,
            dnsbl,
            webhook,
            storage,
        });

        Ok(Self {
            listener,
            ctx,
            permits,
            sweep_interval,
        })
    }

    /// Address the server is actually bound to (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(&self) -> Result<()> {
        info!("SMTP server listening on {}", self.listener.local_addr()?);

        // Periodic sweeps keep the shared tables bounded by active keys
        tokio::spawn(Arc::clone(&self.ctx.limiter).run_sweeper(self.sweep_interval));
        if let Some(greylist) = &self.ctx.greylist {
            tokio::spawn(Arc::clone(greylist).run_sweeper(self.sweep_interval));
        }

        loop {
            match self.listener.accept().await {
                Ok((mut socket, addr)) => {
                    let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Connection ceiling reached, refusing {}", addr);
                            let hostname = self.ctx.config.server.hostname.clone();
                            tokio::spawn(async move {
                                let _ = socket
                                    .write_all(
                                        format!(
                                            "421 {} Too many connections, try again later\r\n",
                                            hostname
                                        )
                                        .as_bytes(),
                                    )
                                    .await;
                                let _ = socket.shutdown().await;
                            });
                            continue;
                        }
                    };

                    info!("New SMTP connection from {}", addr);

                    let session = Session::new(Arc::clone(&self.ctx), addr);
                    tokio::spawn(async move {
                        if let Err(e) = session.handle(socket).await {
                            error!("Session error for {}: {}", addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
