//! The labeler: single mutator of the log, read surface for queries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use tern_codec::LabelSigner;
use tern_store::{LogStore, StoreError};
use tern_types::{Entry, Label};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::LabelerError;
use crate::metrics::{Metrics, WriteOutcome};
use crate::semantics::{admissible, collapse};

/// How many times a write is retried after losing a race on its identity
/// tuple before the caller sees an error.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// State shared between the writer and subscriptions. One mutex guards
/// both the wake channel list and the allow-list.
struct Shared {
    wake: Vec<mpsc::Sender<()>>,
    /// `None` allows every label value.
    allowed: Option<HashSet<String>>,
}

/// An authoritative label service over one ordered log.
///
/// The labeler owns the only write path into the store. Queries and
/// subscriptions read the same store directly; signatures are produced at
/// emission time and never persisted.
pub struct Labeler {
    store: Arc<LogStore>,
    signer: LabelSigner,
    did: String,
    shared: Arc<Mutex<Shared>>,
    metrics: Arc<Metrics>,
}

impl Labeler {
    pub fn new(store: Arc<LogStore>, signer: LabelSigner, did: impl Into<String>) -> Self {
        let metrics = Arc::new(Metrics::new());
        if let Ok(max) = store.max_seq() {
            metrics.set_highest_seq(max);
        }
        Self {
            store,
            signer,
            did: did.into(),
            shared: Arc::new(Mutex::new(Shared {
                wake: Vec::new(),
                allowed: None,
            })),
            metrics,
        }
    }

    /// The issuer identity labels default to.
    pub fn did(&self) -> &str {
        &self.did
    }

    /// The `did:key` publication form of the signing key.
    pub fn did_key(&self) -> String {
        self.signer.did_key()
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Sign `entry` with the service key.
    pub fn sign(&self, entry: &Entry) -> Result<Vec<u8>, LabelerError> {
        Ok(self.signer.sign_entry(entry)?)
    }

    // ----- Writing -----

    /// Add a label to the log.
    ///
    /// Values that have no effect (the label already exists, or a negation
    /// targets nothing) are ignored; the return value reports whether a
    /// change was made. On success every subscriber is woken without
    /// blocking.
    pub fn add_label(&self, label: Label) -> Result<bool, LabelerError> {
        let start = Instant::now();
        let result = self.write_label(label);
        let elapsed = start.elapsed();
        let outcome = match &result {
            Ok(true) => WriteOutcome::Written,
            Ok(false) => WriteOutcome::Noop,
            Err(_) => WriteOutcome::Error,
        };
        self.metrics.observe_write(outcome, elapsed);
        result
    }

    fn write_label(&self, mut label: Label) -> Result<bool, LabelerError> {
        let neg = label.neg.unwrap_or(false);
        if label.val.is_empty() {
            return Err(LabelerError::Validation("missing `val`".to_string()));
        }
        // The allow-list applies to positive labels only: a negation of a
        // previously permitted value must always go through.
        if !neg && !self.value_allowed(&label.val) {
            return Err(LabelerError::Validation(format!(
                "label value {:?} is not allowed",
                label.val
            )));
        }
        if label.src.is_empty() {
            label.src = self.did.clone();
        }
        if label.src.is_empty() {
            return Err(LabelerError::Validation("missing `src`".to_string()));
        }
        if label.uri.is_empty() {
            return Err(LabelerError::Validation("missing `uri`".to_string()));
        }
        label.cts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        // Signatures are never stored; they are generated on demand.
        label.sig = None;

        let entry = Entry::from_label(0, &label);

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let observed_max = self.store.max_seq()?;
            let latest = self.store.latest_with_identity(&entry, observed_max)?;
            if !admissible(&entry, latest.as_ref()) {
                return Ok(false);
            }

            match self.store.append_guarded(entry.clone(), observed_max) {
                Ok(written) => {
                    self.metrics.set_highest_seq(written.seq);
                    debug!(
                        seq = written.seq,
                        uri = %written.uri,
                        val = %written.val,
                        neg = written.neg,
                        "label written"
                    );
                    self.wake_subscribers();
                    return Ok(true);
                }
                // Another writer landed the same identity first; re-read
                // and re-decide.
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(LabelerError::Conflict)
    }

    fn value_allowed(&self, val: &str) -> bool {
        let shared = self.shared.lock().unwrap();
        match &shared.allowed {
            Some(allowed) => allowed.contains(val),
            None => true,
        }
    }

    /// Limit what label values can be used for new labels. Existing
    /// entries are unaffected and negations always remain admissible.
    /// Until this is called, all values are allowed.
    pub fn set_allowed_labels(&self, labels: &[String]) {
        let mut shared = self.shared.lock().unwrap();
        shared.allowed = Some(labels.iter().cloned().collect());
    }

    fn wake_subscribers(&self) {
        let shared = self.shared.lock().unwrap();
        for tx in &shared.wake {
            // Non-blocking: the channel is buffered with capacity 1, so a
            // full buffer already means a wake-up is pending.
            let _ = tx.try_send(());
        }
    }

    // ----- Reading -----

    /// Point-in-time query over exact subject URIs: fetch, collapse, and
    /// sign every visible label.
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<Label>, LabelerError> {
        request.validate()?;
        let entries = self
            .store
            .get_for_subjects(&request.uri_patterns, &request.sources)?;
        let visible = collapse(&entries);

        let mut labels = Vec::with_capacity(visible.len());
        for entry in &visible {
            let sig = self.signer.sign_entry(entry)?;
            labels.push(entry.signed_label(sig));
        }
        Ok(labels)
    }

    /// All non-negated entries for one label value, collapse applied.
    /// Expired entries are not filtered out; the result is unsigned.
    pub fn label_entries(&self, label_name: &str) -> Result<Vec<Label>, LabelerError> {
        let entries = self.store.get_by_val(label_name)?;
        Ok(collapse(&entries).iter().map(Entry::to_label).collect())
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> Result<bool, LabelerError> {
        Ok(self.store.is_empty()?)
    }

    /// Populate an empty labeler with pre-sequenced entries.
    pub fn import_entries(
        &self,
        entries: &std::collections::BTreeMap<i64, Entry>,
    ) -> Result<(), LabelerError> {
        self.store.bulk_import(entries)?;
        if let Some(max) = entries.keys().next_back() {
            self.metrics.set_highest_seq(*max);
        }
        Ok(())
    }

    // ----- Subscriptions -----

    /// Register a wake channel for a new subscription. The subscription
    /// unregisters itself on drop.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let mut shared = self.shared.lock().unwrap();
        shared.wake.push(tx.clone());
        self.metrics.set_active_subscriptions(shared.wake.len());
        Subscription {
            rx,
            tx,
            shared: Arc::clone(&self.shared),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// A registered subscription's wake handle.
///
/// Wakes coalesce: any number of writes while the subscriber is busy
/// collapse into a single buffered wake-up.
pub struct Subscription {
    rx: mpsc::Receiver<()>,
    tx: mpsc::Sender<()>,
    shared: Arc<Mutex<Shared>>,
    metrics: Arc<Metrics>,
}

impl Subscription {
    /// Wait for the next wake-up.
    pub async fn woken(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        shared.wake.retain(|tx| !tx.same_channel(&self.tx));
        self.metrics.set_active_subscriptions(shared.wake.len());
    }
}

/// A `queryLabels` request: exact subject URIs, optionally narrowed to a
/// set of issuers.
#[derive(Debug, Default, Clone)]
pub struct QueryRequest {
    pub uri_patterns: Vec<String>,
    pub sources: Vec<String>,
}

impl QueryRequest {
    /// Check the pattern constraints.
    ///
    /// Wildcards are not supported anywhere. Inside an `at://` pattern a
    /// `*` is reported as [`LabelerError::UnsupportedPattern`] (even a
    /// wildcarded rkey makes the query too broad); everything else
    /// malformed is a plain validation error.
    pub fn validate(&self) -> Result<(), LabelerError> {
        if self.uri_patterns.is_empty() {
            return Err(LabelerError::Validation(
                "need at least one pattern".to_string(),
            ));
        }
        for pattern in &self.uri_patterns {
            if pattern.starts_with("did:") {
                if pattern.contains('*') {
                    return Err(LabelerError::Validation(format!(
                        "invalid pattern {pattern:?}"
                    )));
                }
            } else if pattern.starts_with("at://") {
                if pattern.contains('*') {
                    return Err(LabelerError::UnsupportedPattern(pattern.clone()));
                }
            } else {
                return Err(LabelerError::Validation(format!(
                    "invalid pattern {pattern:?}"
                )));
            }
        }
        Ok(())
    }
}
