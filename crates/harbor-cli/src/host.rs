//! A throwaway host: one bank and one loader over the configured stores.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use harbor_bank::{Bank, Loader};
use harbor_config::HostConfig;
use harbor_storage::{FileKvStore, KvStore};

/// Subdirectory of the data directory holding the key-value buckets.
const KV_DIR: &str = "kv";

pub(crate) struct Host {
    pub(crate) bank: Arc<Bank>,
    pub(crate) loader: Arc<Loader>,
}

impl Host {
    /// Build a host, with `dir` overriding the configured extension directory.
    pub(crate) async fn open(config: &HostConfig, dir: Option<PathBuf>) -> Result<Self> {
        let mut config = config.clone();
        if let Some(dir) = dir {
            config.paths.extensions_dir = Some(dir);
        }
        let kv_dir = config.paths.data_dir().join(KV_DIR);
        let kv = FileKvStore::open(&kv_dir)
            .await
            .with_context(|| format!("failed to open store at {}", kv_dir.display()))?;
        let kv: Arc<dyn KvStore> = Arc::new(kv);
        let bank = Arc::new(Bank::new(config.bank.signal_capacity));
        let loader = Arc::new(Loader::from_config(&config, Arc::clone(&bank), kv)?);
        Ok(Self { bank, loader })
    }

    /// Tear every loaded extension down.
    pub(crate) async fn close(self) {
        if let Err(e) = self.loader.unload_all().await {
            tracing::warn!(error = %e, "failed to unload extensions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_test::{ExtensionDirFixture, ManifestBuilder};
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dir_override_and_store_location() {
        let data = TempDir::new().unwrap();
        let ext = ExtensionDirFixture::new();
        ext.write(&ManifestBuilder::provider("cli-src").build());

        let mut config = HostConfig::default();
        config.paths.data_dir = Some(data.path().to_path_buf());
        config.paths.extensions_dir = Some(data.path().join("unused"));

        let host = Host::open(&config, Some(ext.path().to_path_buf())).await.unwrap();
        assert_eq!(host.loader.dir(), ext.path());
        let report = host.loader.load_all().await.unwrap();
        assert_eq!(report.loaded, vec!["cli-src"]);
        assert!(data.path().join(KV_DIR).is_dir());

        host.close().await;
    }
}
