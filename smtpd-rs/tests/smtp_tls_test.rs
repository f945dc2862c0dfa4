//! Integration tests for the STARTTLS upgrade
//!
//! The server runs with a self-signed certificate; the test client uses a
//! verifier that accepts it.

use smtpd_rs::config::Config;
use smtpd_rs::security::tls::generate_self_signed_cert;
use smtpd_rs::smtp::SmtpServer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

const REPLY_DEADLINE: Duration = Duration::from_secs(10);

struct AcceptAnyCert;

impl rustls::client::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

fn tls_connector() -> TlsConnector {
    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn start_tls_server() -> (SocketAddr, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    generate_self_signed_cert(
        "localhost",
        cert_path.to_str().unwrap(),
        key_path.to_str().unwrap(),
    )
    .unwrap();

    let mut config = Config::default();
    config.smtp.listen_addr = "127.0.0.1:0".to_string();
    config.storage.maildir_path = dir.path().join("maildir").to_string_lossy().to_string();
    config.smtp.enable_tls = true;
    config.smtp.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    config.smtp.tls_key_path = Some(key_path.to_string_lossy().to_string());
    config.smtp.greeting_timeout_secs = 5;
    config.smtp.command_timeout_secs = 5;
    config.smtp.data_timeout_secs = 5;
    config.logging.enabled = false;

    let server = SmtpServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, dir)
}

async fn read_reply<S: tokio::io::AsyncRead + Unpin>(reader: &mut BufReader<S>) -> String {
    loop {
        let mut line = String::new();
        let n = timeout(REPLY_DEADLINE, reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        assert!(n > 0, "connection closed while waiting for a reply");

        if line.len() < 4 || line.as_bytes()[3] != b'-' {
            return line.trim_end().to_string();
        }
    }
}

async fn cmd<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    line: &str,
) -> String {
    reader
        .get_mut()
        .write_all(format!("{}\r\n", line).as_bytes())
        .await
        .unwrap();
    read_reply(reader).await
}

/// EHLO, STARTTLS, handshake; returns a reader over the encrypted stream
async fn upgrade(addr: SocketAddr) -> BufReader<TlsStream<TcpStream>> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);

    assert!(read_reply(&mut reader).await.starts_with("220 "));
    assert!(cmd(&mut reader, "EHLO client.example.com").await.starts_with("250"));
    assert!(cmd(&mut reader, "STARTTLS").await.starts_with("220"));

    let stream = reader.into_inner();
    let tls_stream = tls_connector()
        .connect(rustls::ServerName::try_from("localhost").unwrap(), stream)
        .await
        .unwrap();

    BufReader::new(tls_stream)
}

#[tokio::test]
async fn starttls_upgrade_then_transaction() {
    let (addr, dir) = start_tls_server().await;
    let mut reader = upgrade(addr).await;

    // Hello again over the encrypted channel
    assert!(cmd(&mut reader, "EHLO client.example.com").await.starts_with("250"));
    assert!(cmd(&mut reader, "MAIL FROM:<sender@example.com>").await.starts_with("250"));
    assert!(cmd(&mut reader, "RCPT TO:<rcpt@test.com>").await.starts_with("250"));
    assert!(cmd(&mut reader, "DATA").await.starts_with("354"));
    reader.get_mut().write_all(b"over tls\r\n").await.unwrap();
    assert!(cmd(&mut reader, ".").await.starts_with("250"));
    assert!(cmd(&mut reader, "QUIT").await.starts_with("221"));

    let new_dir = dir.path().join("maildir").join("rcpt@test.com").join("new");
    assert_eq!(std::fs::read_dir(new_dir).unwrap().count(), 1);
}

#[tokio::test]
async fn second_starttls_is_rejected() {
    let (addr, _dir) = start_tls_server().await;
    let mut reader = upgrade(addr).await;

    assert!(cmd(&mut reader, "EHLO client.example.com").await.starts_with("250"));
    assert!(cmd(&mut reader, "STARTTLS").await.starts_with("503"));
}

#[tokio::test]
async fn starttls_before_hello_is_rejected() {
    let (addr, _dir) = start_tls_server().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);

    assert!(read_reply(&mut reader).await.starts_with("220 "));
    assert!(cmd(&mut reader, "STARTTLS").await.starts_with("503"));
}

#[tokio::test]
async fn plaintext_pipelined_behind_starttls_is_discarded() {
    let (addr, _dir) = start_tls_server().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);

    assert!(read_reply(&mut reader).await.starts_with("220 "));
    assert!(cmd(&mut reader, "EHLO client.example.com").await.starts_with("250"));

    // Pre-stage a plaintext NOOP behind the STARTTLS in one write. It must
    // never execute as a post-handshake command.
    reader
        .get_mut()
        .write_all(b"STARTTLS\r\nNOOP\r\n")
        .await
        .unwrap();
    assert!(read_reply(&mut reader).await.starts_with("220"));

    let stream = reader.into_inner();
    let tls_stream = tls_connector()
        .connect(rustls::ServerName::try_from("localhost").unwrap(), stream)
        .await
        .unwrap();
    let mut reader = BufReader::new(tls_stream);

    // The first reply over TLS answers EHLO, not the discarded NOOP; a
    // NOOP answer would be a bare "250 OK"
    reader
        .get_mut()
        .write_all(b"EHLO client.example.com\r\n")
        .await
        .unwrap();

    let mut line = String::new();
    timeout(REPLY_DEADLINE, reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();
    assert!(
        line.starts_with("250-") || line.contains("Hello"),
        "pre-handshake command leaked through: {}",
        line.trim_end()
    );
}
