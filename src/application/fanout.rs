//! Concurrent validation and persistence of a merchant's documents.
//!
//! Inputs are dealt round-robin to a fixed number of workers. Each worker
//! handles its share in order and reports every outcome on a shared channel;
//! the caller waits for all workers, then drains the channel and keeps the
//! first error it sees. Documents a worker already wrote stay staged in the
//! unit of work, so a failed batch is undone by the enclosing rollback.

use crate::config::WorkflowConfig;
use crate::domain::document::{DocumentInput, MerchantDocument};
use crate::domain::merchant::Actor;
use crate::domain::ports::{DocumentStore, UnitOfWork};
use crate::domain::validation;
use crate::error::{MerchantError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Clone)]
pub struct DocumentProcessor {
    documents: Arc<dyn DocumentStore>,
    config: Arc<WorkflowConfig>,
}

struct Batch {
    documents: Arc<dyn DocumentStore>,
    config: Arc<WorkflowConfig>,
    unit: Arc<dyn UnitOfWork>,
    merchant_id: String,
    actor: Actor,
    pending_upgrade: bool,
    now: DateTime<Utc>,
}

impl DocumentProcessor {
    pub fn new(documents: Arc<dyn DocumentStore>, config: Arc<WorkflowConfig>) -> Self {
        Self { documents, config }
    }

    pub fn workers(&self) -> usize {
        self.config.document_workers.max(1)
    }

    /// Validates and stages every input against `unit`.
    ///
    /// Returns all persisted documents, in no particular order, or the first
    /// error reported by any worker.
    #[tracing::instrument(skip_all, fields(merchant_id = %merchant_id, count = inputs.len()))]
    pub async fn process(
        &self,
        unit: Arc<dyn UnitOfWork>,
        merchant_id: &str,
        actor: &Actor,
        inputs: Vec<DocumentInput>,
        pending_upgrade: bool,
    ) -> Result<Vec<MerchantDocument>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        reject_repeated_types(&inputs)?;

        let workers = self.workers();
        let mut partitions: Vec<Vec<DocumentInput>> = vec![Vec::new(); workers];
        for (index, input) in inputs.into_iter().enumerate() {
            partitions[index % workers].push(input);
        }

        let batch = Arc::new(Batch {
            documents: Arc::clone(&self.documents),
            config: Arc::clone(&self.config),
            unit,
            merchant_id: merchant_id.to_string(),
            actor: actor.clone(),
            pending_upgrade,
            now: Utc::now(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = JoinSet::new();
        for partition in partitions.into_iter().filter(|p| !p.is_empty()) {
            let batch = Arc::clone(&batch);
            let tx = tx.clone();
            set.spawn(async move { batch.run(partition, tx).await });
        }
        drop(tx);

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            if let Err(join_err) = joined {
                tracing::error!(error = %join_err, "document worker aborted");
                first_error.get_or_insert(MerchantError::InternalError(Box::new(join_err)));
            }
        }

        let mut saved = Vec::new();
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(document) => saved.push(document),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(saved),
        }
    }
}

/// Each document type may appear once per batch; a second row of the same
/// type would make later lookups by type ambiguous. Blank types are left
/// for the workers to report.
fn reject_repeated_types(inputs: &[DocumentInput]) -> Result<()> {
    let mut seen = HashSet::new();
    for input in inputs {
        let document_type = input.document_type.trim().to_uppercase();
        if !document_type.is_empty() && !seen.insert(document_type.clone()) {
            return Err(MerchantError::validation(format!(
                "document type {document_type} submitted more than once"
            )));
        }
    }
    Ok(())
}

impl Batch {
    async fn run(
        &self,
        inputs: Vec<DocumentInput>,
        tx: mpsc::UnboundedSender<Result<MerchantDocument>>,
    ) {
        for input in inputs {
            let outcome = self.handle(input).await;
            let failed = outcome.is_err();
            if tx.send(outcome).is_err() || failed {
                break;
            }
        }
    }

    async fn handle(&self, input: DocumentInput) -> Result<MerchantDocument> {
        validation::required("document type", &input.document_type)?;
        validation::required("document value", &input.document_value)?;
        let document_type = input.document_type.trim().to_uppercase();
        let document_value = self.config.storage_path(&input.document_value);

        if let Some(owner) = self.documents.find_by_value(&document_value).await?
            && owner.merchant_id != self.merchant_id
        {
            return Err(MerchantError::validation(format!(
                "document {document_value} already used"
            )));
        }

        let existing = match &input.id {
            Some(id) => {
                let document = self
                    .documents
                    .find(id)
                    .await?
                    .ok_or_else(|| MerchantError::not_found("document", id.as_str()))?;
                if document.merchant_id != self.merchant_id {
                    return Err(MerchantError::validation(format!(
                        "document {id} belongs to another merchant"
                    )));
                }
                Some(document)
            }
            None => self
                .documents
                .find_by_merchant(&self.merchant_id)
                .await?
                .into_iter()
                .find(|d| d.document_type == document_type),
        };

        let document = match existing {
            Some(mut document) => {
                document.document_type = document_type;
                document.document_value = document_value;
                document.is_pending_upgrade = self.pending_upgrade;
                document.updated_at = self.now;
                document.updated_by.clone_from(&self.actor.user_id);
                document
            }
            None => MerchantDocument {
                id: Uuid::new_v4().to_string(),
                merchant_id: self.merchant_id.clone(),
                document_type,
                document_value,
                is_pending_upgrade: self.pending_upgrade,
                created_at: self.now,
                created_by: self.actor.user_id.clone(),
                updated_at: self.now,
                updated_by: self.actor.user_id.clone(),
            },
        };

        tracing::debug!(document_id = %document.id, kind = %document.document_type, "staging document");
        self.unit.save_document(&document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::TransactionManager;
    use crate::infrastructure::in_memory::InMemoryStore;

    fn processor(store: &Arc<InMemoryStore>, workers: usize) -> DocumentProcessor {
        let config = WorkflowConfig::new().with_document_workers(workers);
        DocumentProcessor::new(store.clone(), Arc::new(config))
    }

    fn inputs(n: usize) -> Vec<DocumentInput> {
        (0..n)
            .map(|i| DocumentInput::new(format!("TYPE_{i}"), format!("docs/{i}.png")))
            .collect()
    }

    async fn run(
        store: &Arc<InMemoryStore>,
        workers: usize,
        merchant_id: &str,
        docs: Vec<DocumentInput>,
    ) -> Result<Vec<MerchantDocument>> {
        let unit = store.begin().await.unwrap();
        let result = processor(store, workers)
            .process(unit.clone(), merchant_id, &Actor::system(), docs, false)
            .await;
        match &result {
            Ok(_) => unit.commit().await.unwrap(),
            Err(_) => unit.rollback().await.unwrap(),
        }
        result
    }

    #[tokio::test]
    async fn test_every_input_appears_exactly_once() {
        let workers = 4;
        for n in [0, 1, workers, workers + 1, 3 * workers + 2] {
            let store = Arc::new(InMemoryStore::in_memory());
            let saved = run(&store, workers, "M1", inputs(n)).await.unwrap();
            assert_eq!(saved.len(), n, "n={n}");

            let values: HashSet<_> = saved.iter().map(|d| d.document_value.clone()).collect();
            let expected: HashSet<_> = (0..n).map(|i| format!("docs/{i}.png")).collect();
            assert_eq!(values, expected, "n={n}");
            let ids: HashSet<_> = saved.iter().map(|d| d.id.clone()).collect();
            assert_eq!(ids.len(), n);
        }
    }

    #[tokio::test]
    async fn test_empty_input_stages_nothing() {
        let store = Arc::new(InMemoryStore::in_memory());
        let saved = run(&store, 10, "M1", vec![]).await.unwrap();
        assert!(saved.is_empty());
        assert_eq!(store.faults().writes(), 0);
    }

    #[tokio::test]
    async fn test_single_failure_fails_whole_batch() {
        let store = Arc::new(InMemoryStore::in_memory());
        let mut docs = inputs(7);
        docs[5].document_type = "  ".into();

        let err = run(&store, 3, "M1", docs).await.unwrap_err();
        assert!(matches!(err, MerchantError::ValidationError(ref m) if m.contains("document type")));
        assert!(DocumentStore::find_by_merchant(store.as_ref(), "M1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_value_owned_by_other_merchant_is_refused() {
        let store = Arc::new(InMemoryStore::in_memory());
        run(&store, 2, "M2", vec![DocumentInput::new("NPWP", "docs/npwp.png")])
            .await
            .unwrap();

        let err = run(&store, 2, "M1", vec![DocumentInput::new("NPWP", "docs/npwp.png")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[tokio::test]
    async fn test_same_type_reuses_existing_row() {
        let store = Arc::new(InMemoryStore::in_memory());
        let first = run(&store, 2, "M1", vec![DocumentInput::new("ktp", "docs/a.png")])
            .await
            .unwrap();
        let second = run(&store, 2, "M1", vec![DocumentInput::new("KTP", "docs/b.png")])
            .await
            .unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].document_type, "KTP");
        let stored = DocumentStore::find_by_merchant(store.as_ref(), "M1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].document_value, "docs/b.png");
    }

    #[tokio::test]
    async fn test_unknown_carried_id_is_not_found() {
        let store = Arc::new(InMemoryStore::in_memory());
        let mut input = DocumentInput::new("NIB", "docs/nib.png");
        input.id = Some("missing".into());
        let err = run(&store, 2, "M1", vec![input]).await.unwrap_err();
        assert!(matches!(err, MerchantError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_storage_base_is_stripped() {
        let store = Arc::new(InMemoryStore::in_memory());
        let config = WorkflowConfig::new()
            .with(crate::config::keys::STORAGE_BASE_URL, "https://cdn.example.com");
        let processor = DocumentProcessor::new(store.clone(), Arc::new(config));
        let unit = store.begin().await.unwrap();
        let saved = processor
            .process(
                unit.clone(),
                "M1",
                &Actor::system(),
                vec![DocumentInput::new("SIUP", "https://cdn.example.com/docs/siup.pdf")],
                true,
            )
            .await
            .unwrap();
        unit.commit().await.unwrap();
        assert_eq!(saved[0].document_value, "docs/siup.pdf");
        assert!(saved[0].is_pending_upgrade);
    }

    #[tokio::test]
    async fn test_repeated_type_in_one_batch_is_refused() {
        let store = Arc::new(InMemoryStore::in_memory());
        let docs = vec![
            DocumentInput::new("KTP", "docs/a.png"),
            DocumentInput::new("NPWP", "docs/b.png"),
            DocumentInput::new(" ktp ", "docs/c.png"),
        ];

        let err = run(&store, 3, "M1", docs).await.unwrap_err();
        assert!(matches!(err, MerchantError::ValidationError(ref m) if m.contains("KTP")));
        assert_eq!(store.faults().writes(), 0);
        assert!(DocumentStore::find_by_merchant(store.as_ref(), "M1").await.unwrap().is_empty());
    }
}
