//! Journal of every call the simulated cluster received.

use arbor_core::{MutationId, Request, TransactionId, Verb};
use serde::{Deserialize, Serialize};

/// How a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    /// Applied and answered
    Applied,
    /// Answered from the mutation ledger without applying again
    Replayed,
    /// Rejected with a remote error
    Rejected {
        /// Error code
        code: i32,
    },
    /// Lost in transport; `applied` tells whether the cluster saw it
    Lost {
        /// Whether the request was applied before the loss
        applied: bool,
    },
}

/// One received call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Arrival order
    pub seq: u64,
    /// Verb
    pub verb: Verb,
    /// Transaction the call ran under
    pub transaction_id: Option<TransactionId>,
    /// Mutation id
    pub mutation_id: Option<MutationId>,
    /// Retry flag
    pub retry: bool,
    /// Outcome
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl JournalEntry {
    pub(crate) fn new(seq: u64, request: &Request, outcome: Outcome) -> Self {
        Self {
            seq,
            verb: request.verb,
            transaction_id: request.params.get_as("transaction_id"),
            mutation_id: request.params.get_as("mutation_id"),
            retry: request.params.get_as("retry").unwrap_or(false),
            outcome,
        }
    }
}

/// Ordered call journal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub(crate) fn push(&mut self, request: &Request, outcome: Outcome) {
        let seq = self.entries.len() as u64;
        self.entries.push(JournalEntry::new(seq, request, outcome));
    }

    /// All entries in arrival order
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Entries for `verb`
    #[must_use]
    pub fn for_verb(&self, verb: Verb) -> Vec<&JournalEntry> {
        self.entries.iter().filter(|e| e.verb == verb).collect()
    }

    /// Entries carrying `mutation_id`
    #[must_use]
    pub fn for_mutation(&self, mutation_id: MutationId) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.mutation_id == Some(mutation_id))
            .collect()
    }

    /// Entries running under `transaction_id`
    #[must_use]
    pub fn for_transaction(&self, transaction_id: TransactionId) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|e| e.transaction_id == Some(transaction_id))
            .collect()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserialize from JSON
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
