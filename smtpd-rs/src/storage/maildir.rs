use crate::error::{Result, SmtpdError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::info;

/// Downstream delivery handoff: one Maildir per recipient
pub struct MaildirStorage {
    base_path: PathBuf,
    sequence: AtomicU64,
}

impl MaildirStorage {
    pub fn new(base_path: String) -> Self {
        Self {
            base_path: PathBuf::from(base_path),
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn store(&self, recipient: &str, data: &[u8]) -> Result<String> {
        let mailbox_path = self.base_path.join(recipient);
        self.ensure_maildir_structure(&mailbox_path).await?;

        let filename = self.generate_filename();
        let tmp_path = mailbox_path.join("tmp").join(&filename);
        let new_path = mailbox_path.join("new").join(&filename);

        // Write to tmp first, then rename into new (atomic on one filesystem)
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &new_path).await?;

        info!("Stored message for {} as {}", recipient, new_path.display());

        Ok(filename)
    }

    async fn ensure_maildir_structure(&self, mailbox_path: &Path) -> Result<()> {
        for subdir in &["tmp", "new", "cur"] {
            let dir = mailbox_path.join(subdir);
            if !dir.exists() {
                fs::create_dir_all(&dir).await.map_err(|e| {
                    SmtpdError::Storage(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }
        Ok(())
    }

    fn generate_filename(&self) -> String {
        // Maildir filename format: timestamp.pid_seq.hostname
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let pid = std::process::id();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let hostname = gethostname::gethostname().to_string_lossy().to_string();

        format!("{}.{}_{}.{}", timestamp, pid, seq, hostname)
    }
}
