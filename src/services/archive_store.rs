//! Where finished bulk archives go
//!
//! Archives are too large for a single NATS reply, so they are streamed into a
//! JetStream object store bucket in chunks and callers fetch them by name.

use std::time::Duration;

use async_nats::jetstream::{self, object_store};
use async_nats::Client;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{BillingError, BillingResult};

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Stream `file` from its current position under `name`, returning the stored size
    async fn put_file(&self, name: &str, file: tokio::fs::File) -> BillingResult<u64>;

    fn bucket(&self) -> &str;
}

/// Bulk archives in a JetStream object store bucket
pub struct NatsArchiveStore {
    bucket: String,
    store: object_store::ObjectStore,
}

impl NatsArchiveStore {
    /// Open the bucket, creating it with `max_age` retention if it does not exist
    pub async fn open(client: &Client, bucket: &str, max_age: Duration) -> anyhow::Result<Self> {
        let js = jetstream::new(client.clone());
        let store = match js.get_object_store(bucket).await {
            Ok(store) => store,
            Err(_) => {
                js.create_object_store(object_store::Config {
                    bucket: bucket.to_string(),
                    description: Some("LiteBill bulk invoice archives".to_string()),
                    max_age,
                    ..Default::default()
                })
                .await?
            }
        };
        info!("JetStream archive bucket '{}' ready", bucket);

        Ok(Self {
            bucket: bucket.to_string(),
            store,
        })
    }
}

#[async_trait]
impl ArchiveStore for NatsArchiveStore {
    async fn put_file(&self, name: &str, mut file: tokio::fs::File) -> BillingResult<u64> {
        let info = self
            .store
            .put(name, &mut file)
            .await
            .map_err(|e| BillingError::Storage(e.to_string()))?;
        debug!("Stored {} in {} ({} chunks)", name, self.bucket, info.chunks);
        Ok(info.size as u64)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// `<tenant>/<jobId>/<filename>`
pub fn archive_object_name(tenant_id: uuid::Uuid, job_id: &str, filename: &str) -> String {
    format!(
        "{}/{}/{}",
        tenant_id,
        crate::types::file_component(job_id),
        filename
    )
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;

    use super::*;

    #[derive(Default)]
    pub struct MemoryArchiveStore {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ArchiveStore for MemoryArchiveStore {
        async fn put_file(&self, name: &str, mut file: tokio::fs::File) -> BillingResult<u64> {
            if self.fail {
                return Err(BillingError::Storage("bucket unavailable".into()));
            }
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).await?;
            let size = bytes.len() as u64;
            self.objects.lock().insert(name.to_string(), bytes);
            Ok(size)
        }

        fn bucket(&self) -> &str {
            "memory"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name_is_tenant_scoped() {
        let tenant = uuid::Uuid::nil();
        assert_eq!(
            archive_object_name(tenant, "job/1", "Invoice_Bulk_2026-03.zip"),
            "00000000-0000-0000-0000-000000000000/job_1/Invoice_Bulk_2026-03.zip"
        );
    }
}
