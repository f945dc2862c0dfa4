use crate::antispam::{DnsblGate, DnsblVerdict, GreylistStore, GreylistVerdict};
use crate::config::Config;
use crate::error::{Result, SmtpdError};
use crate::security::{AuthMechanism, Authenticator, RateLimiter, TlsConfig};
use crate::smtp::commands::SmtpCommand;
use crate::storage::MaildirStorage;
use crate::utils::validate_email;
use crate::webhook::{WebhookEvent, WebhookNotifier};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tracing::{debug, error, info, warn};

/// Maximum line length in SMTP protocol (RFC 5321)
const MAX_LINE_LENGTH: usize = 1000;

/// Maximum number of errored commands before disconnecting
const MAX_ERRORS: usize = 10;

/// Everything a session consults that outlives it: configuration and the
/// policy components shared across connections.
pub(crate) struct SessionContext {
    pub(crate) config: Config,
    pub(crate) tls: Option<TlsConfig>,
    pub(crate) authenticator: Option<Authenticator>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) greylist: Option<Arc<GreylistStore>>,
    pub(crate) dnsbl: Option<Arc<DnsblGate>>,
    pub(crate) webhook: Option<WebhookNotifier>,
    pub(crate) storage: Arc<MaildirStorage>,
}

/// Unified stream type for both plain and TLS connections
///
/// Lets the session keep one channel handle across a STARTTLS upgrade.
enum SessionStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
    /// Temporary state during STARTTLS upgrade - should never be observable
    Upgrading,
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SessionStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            SessionStream::Upgrading => {
                panic!("Attempted I/O on SessionStream during STARTTLS upgrade")
            }
        }
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SessionStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            SessionStream::Upgrading => {
                panic!("Attempted I/O on SessionStream during STARTTLS upgrade")
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SessionStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            SessionStream::Upgrading => {
                panic!("Attempted I/O on SessionStream during STARTTLS upgrade")
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SessionStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            SessionStream::Upgrading => {
                panic!("Attempted I/O on SessionStream during STARTTLS upgrade")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SmtpState {
    /// Connected, no hello yet
    Fresh,
    /// Hello received, no open envelope
    Greeted,
    /// Envelope sender accepted
    MailFrom,
    /// At least one recipient accepted
    RcptTo,
    /// Body transfer in progress
    Data,
}

/// Result of processing SMTP commands
enum SessionResult {
    Continue, // Restart processing (after STARTTLS upgrade)
    Quit,     // Session ended
}

/// Per-connection SMTP session
///
/// Owned exclusively by its connection task. Drives the command dialog and
/// consults the shared policy components for every decision: rate limiter
/// and auth gate at MAIL FROM, greylist at RCPT TO, DNSBL before the
/// transaction opens. Phase deadlines: the greeting deadline covers the
/// first command, the command deadline every later one, and the data
/// deadline the body transfer; an elapsed deadline closes the connection
/// without a further reply.
pub(crate) struct Session {
    ctx: Arc<SessionContext>,
    peer: SocketAddr,
    state: SmtpState,
    from: Option<String>,
    rcpt: Vec<String>,
    data: Vec<u8>,
    error_count: usize,
    is_encrypted: bool,
    authenticated_user: Option<String>,
    seen_first_command: bool,
}

impl Session {
    pub(crate) fn new(ctx: Arc<SessionContext>, peer: SocketAddr) -> Self {
        Self {
            ctx,
            peer,
            state: SmtpState::Fresh,
            from: None,
            rcpt: Vec::new(),
            data: Vec::new(),
            error_count: 0,
            is_encrypted: false,
            authenticated_user: None,
            seen_first_command: false,
        }
    }

    pub(crate) async fn handle(mut self, stream: TcpStream) -> Result<()> {
        let mut stream = SessionStream::Plain(stream);

        stream
            .write_all(
                format!(
                    "220 {} ESMTP Service Ready\r\n",
                    self.ctx.config.server.hostname
                )
                .as_bytes(),
            )
            .await?;

        // Process the session, potentially upgrading to TLS mid-session.
        // A loop instead of recursion so STARTTLS can restart processing.
        loop {
            match self.process_commands(&mut stream).await? {
                SessionResult::Continue => continue,
                SessionResult::Quit => break,
            }
        }

        Ok(())
    }

    /// Deadline for the next command line: the greeting deadline until the
    /// first command has arrived, the command deadline after that.
    fn command_deadline(&self) -> Duration {
        if self.seen_first_command {
            Duration::from_secs(self.ctx.config.smtp.command_timeout_secs)
        } else {
            Duration::from_secs(self.ctx.config.smtp.greeting_timeout_secs)
        }
    }

    async fn process_commands(&mut self, stream: &mut SessionStream) -> Result<SessionResult> {
        // &mut *stream reborrows so the reader can be dropped for STARTTLS
        let mut buf_reader = BufReader::new(&mut *stream);
        let mut line = String::new();

        loop {
            if self.error_count >= MAX_ERRORS {
                warn!("Too many errors from {}, disconnecting", self.peer);
                buf_reader
                    .write_all(b"421 Too many errors, closing connection\r\n")
                    .await?;
                return Ok(SessionResult::Quit);
            }

            line.clear();

            let read_result = timeout(self.command_deadline(), buf_reader.read_line(&mut line)).await;

            let n = match read_result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error reading line from {}: {}", self.peer, e);
                    return Err(e.into());
                }
                Err(_) => {
                    // Deadline elapsed: close without a reply
                    warn!("Command timeout from {}, disconnecting", self.peer);
                    return Ok(SessionResult::Quit);
                }
            };

            if n == 0 {
                debug!("Client {} disconnected", self.peer);
                return Ok(SessionResult::Quit);
            }

            self.seen_first_command = true;

            if line.len() > MAX_LINE_LENGTH {
                error!("Line too long from {}: {} bytes", self.peer, line.len());
                buf_reader.write_all(b"500 Line too long\r\n").await?;
                self.error_count += 1;
                continue;
            }

            let line_trimmed = line.trim_end();
            debug!("Received from {}: {}", self.peer, line_trimmed);

            match SmtpCommand::parse(line_trimmed) {
                Ok(SmtpCommand::StartTls) => {
                    // Drop the reader before the handshake: any plaintext
                    // bytes the peer pipelined behind STARTTLS die with the
                    // reader's buffer instead of replaying post-handshake.
                    drop(buf_reader);

                    match self.handle_starttls_upgrade(stream).await {
                        Ok(true) => {
                            info!("STARTTLS upgrade completed for {}", self.peer);
                            return Ok(SessionResult::Continue);
                        }
                        Ok(false) => {
                            // STARTTLS refused, recreate reader and continue
                            buf_reader = BufReader::new(&mut *stream);
                            continue;
                        }
                        Err(e) => {
                            error!("STARTTLS error for {}: {}", self.peer, e);
                            return Err(e);
                        }
                    }
                }
                Ok(SmtpCommand::Auth {
                    mechanism,
                    initial_response,
                }) => {
                    match self.handle_auth(&mechanism, initial_response, &mut buf_reader).await {
                        Ok(()) => continue,
                        Err(SmtpdError::Timeout(_)) => {
                            warn!("AUTH timeout from {}, disconnecting", self.peer);
                            return Ok(SessionResult::Quit);
                        }
                        Err(e @ SmtpdError::Io(_)) => return Err(e),
                        Err(e) => {
                            error!("AUTH error for {}: {}", self.peer, e);
                            buf_reader.write_all(b"535 Authentication failed\r\n").await?;
                            self.error_count += 1;
                            continue;
                        }
                    }
                }
                Ok(cmd) => {
                    let response = self.handle_command(cmd).await;
                    buf_reader.write_all(response.as_bytes()).await?;

                    if response.starts_with("221") {
                        // QUIT
                        return Ok(SessionResult::Quit);
                    }

                    if self.state == SmtpState::Data {
                        match self.receive_data(&mut buf_reader).await {
                            Ok(()) => {}
                            Err(SmtpdError::Timeout(_)) => {
                                warn!("DATA timeout from {}, disconnecting", self.peer);
                                return Ok(SessionResult::Quit);
                            }
                            Err(e @ SmtpdError::Io(_)) => return Err(e),
                            Err(e) => {
                                error!("Error receiving data from {}: {}", self.peer, e);
                                buf_reader
                                    .write_all(b"451 Error receiving message\r\n")
                                    .await?;
                                self.reset_envelope();
                                self.state = SmtpState::Greeted;
                                self.error_count += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("Command parse error from {}: {}", self.peer, e);
                    buf_reader
                        .write_all(b"500 Syntax error, command unrecognized\r\n")
                        .await?;
                    self.error_count += 1;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: SmtpCommand) -> String {
        match (&self.state, cmd) {
            (_, SmtpCommand::Helo(domain)) => {
                info!("HELO from {}", domain);
                // A hello mid-session aborts any in-progress transaction
                self.reset_envelope();
                self.state = SmtpState::Greeted;
                format!("250 {} Hello {}\r\n", self.ctx.config.server.hostname, domain)
            }
            (_, SmtpCommand::Ehlo(domain)) => {
                info!("EHLO from {}", domain);
                self.reset_envelope();
                self.state = SmtpState::Greeted;

                let mut response = format!(
                    "250-{} Hello {}\r\n",
                    self.ctx.config.server.hostname, domain
                );

                // Advertise STARTTLS only while an upgrade is still possible
                if self.ctx.tls.is_some() && !self.is_encrypted {
                    response.push_str("250-STARTTLS\r\n");
                }

                // Advertise AUTH only where credentials won't cross plaintext
                if self.ctx.authenticator.is_some()
                    && (self.is_encrypted || self.ctx.tls.is_none())
                {
                    response.push_str("250-AUTH PLAIN LOGIN\r\n");
                }

                response.push_str(&format!(
                    "250-SIZE {}\r\n",
                    self.ctx.config.smtp.max_message_size
                ));
                response.push_str("250 HELP\r\n");
                response
            }
            (SmtpState::Fresh, SmtpCommand::MailFrom(_)) => {
                "503 Send hello first\r\n".to_string()
            }
            (SmtpState::Greeted, SmtpCommand::MailFrom(from)) => {
                self.handle_mail_from(from).await
            }
            (SmtpState::MailFrom | SmtpState::RcptTo, SmtpCommand::MailFrom(_)) => {
                // One envelope per transaction
                "503 Sender already specified\r\n".to_string()
            }
            (SmtpState::MailFrom | SmtpState::RcptTo, SmtpCommand::RcptTo(to)) => {
                self.handle_rcpt_to(to)
            }
            (SmtpState::RcptTo, SmtpCommand::Data) => {
                info!("DATA command received from {}", self.peer);
                self.state = SmtpState::Data;
                "354 Start mail input; end with <CRLF>.<CRLF>\r\n".to_string()
            }
            (SmtpState::MailFrom, SmtpCommand::Data) => {
                "503 No recipients specified\r\n".to_string()
            }
            (_, SmtpCommand::Rset) => {
                info!("RSET command from {}", self.peer);
                self.reset_envelope();
                if self.state != SmtpState::Fresh {
                    self.state = SmtpState::Greeted;
                }
                "250 OK\r\n".to_string()
            }
            (_, SmtpCommand::Noop) => "250 OK\r\n".to_string(),
            (_, SmtpCommand::Quit) => {
                info!("QUIT command from {}", self.peer);
                format!(
                    "221 {} closing connection\r\n",
                    self.ctx.config.server.hostname
                )
            }
            // STARTTLS and AUTH are handled out-of-band in process_commands
            (_, SmtpCommand::StartTls) | (_, SmtpCommand::Auth { .. }) => {
                "503 Bad sequence of commands\r\n".to_string()
            }
            (_, SmtpCommand::Unknown(cmd)) => {
                debug!("Unknown command from {}: {}", self.peer, cmd);
                "502 Command not implemented\r\n".to_string()
            }
            _ => "503 Bad sequence of commands\r\n".to_string(),
        }
    }

    /// Open the envelope: auth gate, then reputation, then rate limits.
    /// A denial leaves the transaction state untouched.
    async fn handle_mail_from(&mut self, from: String) -> String {
        if self.ctx.config.smtp.enable_auth && self.authenticated_user.is_none() {
            warn!("MAIL FROM rejected for {}: authentication required", self.peer);
            return "530 Authentication required\r\n".to_string();
        }

        if let Err(e) = validate_email(&from) {
            debug!("MAIL FROM rejected: {}", e);
            return "501 Invalid sender address\r\n".to_string();
        }

        if let Some(gate) = &self.ctx.dnsbl {
            if gate.check(self.peer.ip()).await == DnsblVerdict::Listed {
                warn!("MAIL FROM rejected: {} is DNSBL-listed", self.peer.ip());
                return "554 Service unavailable; client host blocked\r\n".to_string();
            }
        }

        if !self.ctx.limiter.check_and_record_ip(self.peer.ip()) {
            return "451 Rate limit exceeded, try again later\r\n".to_string();
        }
        if let Some(user) = &self.authenticated_user {
            if !self.ctx.limiter.check_and_record_user(user) {
                return "451 Rate limit exceeded, try again later\r\n".to_string();
            }
        }

        info!("MAIL FROM: {}", from);
        self.from = Some(from);
        self.rcpt.clear();
        self.data.clear();
        self.state = SmtpState::MailFrom;
        "250 OK\r\n".to_string()
    }

    /// Add one recipient: greylist verdict first, then the recipient cap.
    /// Rejections leave previously accepted recipients valid.
    fn handle_rcpt_to(&mut self, to: String) -> String {
        if let Err(e) = validate_email(&to) {
            debug!("RCPT TO rejected: {}", e);
            return "501 Invalid recipient address\r\n".to_string();
        }

        if self.rcpt.len() >= self.ctx.config.smtp.max_recipients {
            warn!(
                "Too many recipients from {}: {}",
                self.peer,
                self.rcpt.len()
            );
            return format!(
                "452 Too many recipients (max {})\r\n",
                self.ctx.config.smtp.max_recipients
            );
        }

        if let Some(greylist) = &self.ctx.greylist {
            let sender = self.from.as_deref().unwrap_or("");
            if greylist.evaluate(self.peer.ip(), sender, &to) == GreylistVerdict::TemporaryReject {
                return "451 Greylisted, please retry later\r\n".to_string();
            }
        }

        info!("RCPT TO: {}", to);
        self.rcpt.push(to);
        self.state = SmtpState::RcptTo;
        "250 OK\r\n".to_string()
    }

    /// Receive the message body until the lone-period terminator
    ///
    /// Runs under the data deadline, which is distinct from the command
    /// deadline because a legitimate body transfer may take far longer. A
    /// body exceeding the size limit is drained to the terminator and
    /// rejected with 552; the connection stays usable for a fresh
    /// transaction either way.
    async fn receive_data<S>(&mut self, buf_reader: &mut BufReader<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let data_deadline = Duration::from_secs(self.ctx.config.smtp.data_timeout_secs);
        let max_size = self.ctx.config.smtp.max_message_size;
        let mut line = String::new();
        let mut oversize = false;

        loop {
            line.clear();

            let read_result = timeout(data_deadline, buf_reader.read_line(&mut line)).await;

            let n = match read_result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error during DATA from {}: {}", self.peer, e);
                    return Err(e.into());
                }
                Err(_) => return Err(SmtpdError::Timeout("mail data")),
            };

            if n == 0 {
                return Err(SmtpdError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during DATA",
                )));
            }

            if line.trim_end() == "." {
                if oversize {
                    self.reset_envelope();
                    self.state = SmtpState::Greeted;
                    buf_reader
                        .write_all(
                            format!("552 Message exceeds maximum size of {} bytes\r\n", max_size)
                                .as_bytes(),
                        )
                        .await?;
                    return Ok(());
                }
                info!(
                    "End of DATA from {}, total size: {} bytes",
                    self.peer,
                    self.data.len()
                );
                break;
            }

            if oversize {
                // Drain to the terminator so the dialog stays in sync
                continue;
            }

            if line.len() > MAX_LINE_LENGTH {
                return Err(SmtpdError::Syntax("line too long in DATA".to_string()));
            }

            // Transparency: a stuffed leading dot is not part of the body
            let payload = if line.starts_with("..") {
                &line.as_bytes()[1..]
            } else {
                line.as_bytes()
            };

            if self.data.len() + payload.len() > max_size {
                warn!(
                    "Message from {} exceeds size limit ({} max), draining",
                    self.peer, max_size
                );
                self.data.clear();
                oversize = true;
                continue;
            }

            self.data.extend_from_slice(payload);
        }

        // Hand off to downstream delivery: one copy per recipient
        let mut store_failed = false;
        for recipient in &self.rcpt {
            if let Err(e) = self.ctx.storage.store(recipient, &self.data).await {
                error!("Storage handoff failed for {}: {}", recipient, e);
                store_failed = true;
                break;
            }
        }
        if store_failed {
            self.reset_envelope();
            self.state = SmtpState::Greeted;
            buf_reader
                .write_all(b"451 Local error in processing\r\n")
                .await?;
            return Ok(());
        }

        if let Some(notifier) = &self.ctx.webhook {
            notifier.enqueue(WebhookEvent {
                sender: self.from.clone().unwrap_or_default(),
                recipients: self.rcpt.clone(),
                size: self.data.len(),
                timestamp: chrono::Utc::now(),
                peer: self.peer.to_string(),
            });
        }

        buf_reader.write_all(b"250 OK: Message accepted\r\n").await?;

        // Ready for a follow-on transaction on the same connection
        self.reset_envelope();
        self.state = SmtpState::Greeted;

        Ok(())
    }

    /// Handle STARTTLS and perform the in-band TLS upgrade
    ///
    /// Accepted only before authentication and only once per connection.
    /// On success the plain stream is replaced in place by the TLS stream
    /// and the state resets to Fresh: the client must hello again over the
    /// encrypted channel (RFC 3207).
    ///
    /// Returns `Ok(true)` when the stream was upgraded, `Ok(false)` when
    /// STARTTLS was refused with an in-protocol reply.
    async fn handle_starttls_upgrade(&mut self, stream: &mut SessionStream) -> Result<bool> {
        let tls_config = match &self.ctx.tls {
            Some(config) => config.clone(),
            None => {
                stream.write_all(b"502 STARTTLS not available\r\n").await?;
                return Ok(false);
            }
        };

        if self.is_encrypted {
            stream.write_all(b"503 Already using TLS\r\n").await?;
            return Ok(false);
        }

        if self.authenticated_user.is_some() {
            stream
                .write_all(b"503 STARTTLS not allowed after authentication\r\n")
                .await?;
            return Ok(false);
        }

        if self.state != SmtpState::Greeted {
            stream.write_all(b"503 Bad sequence of commands\r\n").await?;
            return Ok(false);
        }

        info!("STARTTLS: initiating TLS upgrade for {}", self.peer);
        stream.write_all(b"220 Ready to start TLS\r\n").await?;
        stream.flush().await?;

        // Extract the plain TcpStream - Upgrading is a temporary placeholder
        let tcp_stream = match std::mem::replace(stream, SessionStream::Upgrading) {
            SessionStream::Plain(tcp) => tcp,
            SessionStream::Tls(_) | SessionStream::Upgrading => {
                error!("STARTTLS: stream state mismatch for {}", self.peer);
                return Err(SmtpdError::Tls(
                    "internal error: stream state mismatch".to_string(),
                ));
            }
        };

        let acceptor = tls_config.acceptor();
        let tls_stream = acceptor.accept(tcp_stream).await.map_err(|e| {
            error!("TLS handshake failed for {}: {}", self.peer, e);
            SmtpdError::Tls(format!("TLS handshake failed: {}", e))
        })?;

        *stream = SessionStream::Tls(tls_stream);
        self.is_encrypted = true;

        // Client must hello again over the encrypted channel
        self.state = SmtpState::Fresh;
        self.reset_envelope();

        Ok(true)
    }

    /// Handle the AUTH subdialog
    ///
    /// Only IO and timeout errors propagate; every policy outcome is
    /// answered in-protocol here.
    async fn handle_auth<S>(
        &mut self,
        mechanism: &str,
        initial_response: Option<String>,
        buf_reader: &mut BufReader<S>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let authenticator = match &self.ctx.authenticator {
            Some(auth) => auth.clone(),
            None => {
                buf_reader.write_all(b"502 AUTH not available\r\n").await?;
                return Ok(());
            }
        };

        if self.ctx.tls.is_some() && !self.is_encrypted {
            buf_reader
                .write_all(b"530 Must issue STARTTLS first\r\n")
                .await?;
            return Ok(());
        }

        if self.authenticated_user.is_some() {
            buf_reader.write_all(b"503 Already authenticated\r\n").await?;
            return Ok(());
        }

        if self.state != SmtpState::Greeted {
            buf_reader
                .write_all(b"503 Bad sequence of commands\r\n")
                .await?;
            return Ok(());
        }

        let auth_mechanism = match AuthMechanism::from_str(mechanism) {
            Some(m) => m,
            None => {
                buf_reader
                    .write_all(b"504 Authentication mechanism not supported\r\n")
                    .await?;
                return Ok(());
            }
        };

        // Repeated failures burn the IP's window, so brute force runs into
        // the same limiter as everything else
        if !self.ctx.limiter.check_and_record_ip(self.peer.ip()) {
            buf_reader
                .write_all(b"451 Too many attempts, try again later\r\n")
                .await?;
            return Ok(());
        }

        info!("AUTH {} initiated by {}", mechanism, self.peer);

        let credentials = match auth_mechanism {
            AuthMechanism::Plain => {
                let token = match initial_response {
                    Some(data) => data,
                    None => {
                        buf_reader.write_all(b"334 \r\n").await?;
                        self.read_auth_line(buf_reader).await?
                    }
                };

                match Authenticator::decode_plain(&token) {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        warn!("AUTH PLAIN decode failed from {}: {}", self.peer, e);
                        buf_reader
                            .write_all(b"501 Cannot decode credentials\r\n")
                            .await?;
                        self.error_count += 1;
                        return Ok(());
                    }
                }
            }
            AuthMechanism::Login => {
                // base64 "Username:" / "Password:" prompts
                buf_reader.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                let username_line = self.read_auth_line(buf_reader).await?;

                buf_reader.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                let password_line = self.read_auth_line(buf_reader).await?;

                let decoded = Authenticator::decode_login_credential(&username_line)
                    .and_then(|username| {
                        Authenticator::decode_login_credential(&password_line)
                            .map(|password| crate::security::Credentials { username, password })
                    });

                match decoded {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        warn!("AUTH LOGIN decode failed from {}: {}", self.peer, e);
                        buf_reader
                            .write_all(b"501 Cannot decode credentials\r\n")
                            .await?;
                        self.error_count += 1;
                        return Ok(());
                    }
                }
            }
        };

        match authenticator
            .verify(&credentials.username, &credentials.password)
            .await
        {
            Ok(true) => {
                info!("Authentication successful for {}", credentials.username);
                self.authenticated_user = Some(credentials.username);
                buf_reader
                    .write_all(b"235 Authentication successful\r\n")
                    .await?;
            }
            Ok(false) => {
                warn!("Authentication failed for {}", credentials.username);
                buf_reader.write_all(b"535 Authentication failed\r\n").await?;
                self.error_count += 1;
            }
            Err(e) => {
                error!("Credential store error: {}", e);
                buf_reader
                    .write_all(b"454 Temporary authentication failure\r\n")
                    .await?;
            }
        }

        Ok(())
    }

    /// Read one client continuation line of an AUTH subdialog
    async fn read_auth_line<S>(&self, buf_reader: &mut BufReader<S>) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let command_deadline = Duration::from_secs(self.ctx.config.smtp.command_timeout_secs);
        let mut line = String::new();

        let n = timeout(command_deadline, buf_reader.read_line(&mut line))
            .await
            .map_err(|_| SmtpdError::Timeout("AUTH response"))??;

        if n == 0 {
            return Err(SmtpdError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during AUTH",
            )));
        }

        Ok(line.trim().to_string())
    }

    fn reset_envelope(&mut self) {
        self.from = None;
        self.rcpt.clear();
        self.data.clear();
    }
}
