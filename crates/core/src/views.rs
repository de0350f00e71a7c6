//! Dashboard projections over documents: the approver inbox, the student
//! overview and an annotated history. Everything here reads derived state,
//! never the stored status cache.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::derivation::derive;
use crate::domain::{
    normalize_identity, Actor, ApproverId, ApproverStatus, Document, DocumentId, DocumentTypeKey,
    LogKind, OverallStatus, StudentId,
};
use crate::round_log::RoundLog;

/// Human-readable names for approver identities.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApproverLabels {
    overrides: BTreeMap<String, String>,
}

impl ApproverLabels {
    /// Keys may be a full identity or just its local part.
    pub fn new(overrides: &BTreeMap<String, String>) -> Self {
        Self {
            overrides: overrides
                .iter()
                .map(|(key, label)| (normalize_identity(key), label.trim().to_string()))
                .filter(|(key, label)| !key.is_empty() && !label.is_empty())
                .collect(),
        }
    }

    pub fn label_for(&self, approver: &ApproverId) -> String {
        let local = local_part(approver.as_str());
        self.overrides
            .get(approver.as_str())
            .or_else(|| self.overrides.get(local))
            .cloned()
            .unwrap_or_else(|| readable_label(approver))
    }

    pub fn actor_label(&self, actor: &Actor) -> String {
        match actor {
            Actor::System => "System".to_string(),
            Actor::Approver(approver) => self.label_for(approver),
        }
    }
}

/// `"exam.cell@dts.com"` becomes `"Exam Cell"`.
pub fn readable_label(approver: &ApproverId) -> String {
    let words: Vec<String> = local_part(approver.as_str())
        .split(['.', '_', '-'])
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect();
    if words.is_empty() {
        approver.to_string()
    } else {
        words.join(" ")
    }
}

fn local_part(identity: &str) -> &str {
    identity.split('@').next().unwrap_or(identity)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn matches_search(haystack: &str, search: Option<&str>) -> bool {
    match search.map(str::trim) {
        None | Some("") => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxFilter {
    pub status: Option<ApproverStatus>,
    pub search: Option<String>,
}

impl InboxFilter {
    /// A status filter matches the document status or any label mentioning it,
    /// so `approved` also finds "Approved (You)" on a still-pending document.
    pub fn matches(&self, item: &InboxItem) -> bool {
        let status_ok = match self.status {
            None => true,
            Some(status) => {
                item.overall_status.as_str() == status.as_str()
                    || item.label.to_lowercase().contains(status.as_str())
            }
        };
        status_ok && matches_search(&item.document_type.0, self.search.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxItem {
    pub document_id: DocumentId,
    pub document_type: DocumentTypeKey,
    pub student_id: StudentId,
    pub overall_status: OverallStatus,
    pub label: String,
    pub can_act: bool,
    pub position: usize,
    pub round: usize,
    pub updated_at: DateTime<Utc>,
}

/// Documents an approver should see: their turn now, or already decided by
/// them in the current round. Most recently updated first.
pub fn build_inbox(
    documents: &[Document],
    approver: &ApproverId,
    filter: &InboxFilter,
) -> Vec<InboxItem> {
    let mut items: Vec<InboxItem> = documents
        .iter()
        .filter_map(|document| {
            let position = document.position_of(approver)?;
            let derived = derive(document);
            let is_turn = derived.is_turn(approver);
            if !is_turn && !derived.has_acted(approver) {
                return None;
            }
            Some(InboxItem {
                document_id: document.id.clone(),
                document_type: document.document_type.clone(),
                student_id: document.student_id.clone(),
                overall_status: derived.overall_status,
                label: derived.label_for(approver),
                can_act: is_turn,
                position,
                round: derived.round,
                updated_at: document.updated_at,
            })
        })
        .filter(|item| filter.matches(item))
        .collect();
    items.sort_by(|left, right| {
        right
            .updated_at
            .cmp(&left.updated_at)
            .then_with(|| left.document_id.cmp(&right.document_id))
    });
    items
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewFilter {
    pub status: Option<OverallStatus>,
    pub search: Option<String>,
}

impl OverviewFilter {
    pub fn matches(&self, item: &OverviewItem) -> bool {
        self.status.map_or(true, |status| item.status == status)
            && matches_search(&item.document_type.0, self.search.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewItem {
    pub document_type: DocumentTypeKey,
    pub document_id: Option<DocumentId>,
    pub status: OverallStatus,
    pub label: String,
    pub current_approver: Option<ApproverId>,
    pub can_resubmit: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One row per configured document type, plus any document whose type has
/// since been removed from configuration.
pub fn build_overview(
    document_types: &[DocumentTypeKey],
    documents: &[Document],
    labels: &ApproverLabels,
    filter: &OverviewFilter,
) -> Vec<OverviewItem> {
    let mut by_type: BTreeMap<&DocumentTypeKey, &Document> = BTreeMap::new();
    for document in documents {
        by_type.insert(&document.document_type, document);
    }

    let mut items: Vec<OverviewItem> = document_types
        .iter()
        .map(|document_type| match by_type.remove(document_type) {
            Some(document) => overview_row(document, labels),
            None => OverviewItem {
                document_type: document_type.clone(),
                document_id: None,
                status: OverallStatus::NotSubmitted,
                label: OverallStatus::NotSubmitted.label().to_string(),
                current_approver: None,
                can_resubmit: false,
                updated_at: None,
            },
        })
        .collect();
    items.extend(by_type.into_values().map(|document| overview_row(document, labels)));

    items.retain(|item| filter.matches(item));
    items
}

fn overview_row(document: &Document, labels: &ApproverLabels) -> OverviewItem {
    let derived = derive(document);
    let label = match &derived.current_approver {
        Some(current) => format!("Pending with {}", labels.label_for(current)),
        None => derived.overall_status.label().to_string(),
    };
    OverviewItem {
        document_type: document.document_type.clone(),
        document_id: Some(document.id.clone()),
        status: derived.overall_status,
        label,
        current_approver: derived.current_approver.clone(),
        can_resubmit: derived.overall_status == OverallStatus::Rejected,
        updated_at: Some(document.updated_at),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLine {
    pub seq: u64,
    pub round: usize,
    pub current_round: bool,
    pub actor: Actor,
    pub actor_label: String,
    pub kind: LogKind,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// Full log in display order, tagged with the round each entry belongs to.
pub fn annotate_history(document: &Document, labels: &ApproverLabels) -> Vec<HistoryLine> {
    let log = RoundLog::of(document);
    let current = log.round_count();
    let mut round = 0;
    log.history()
        .map(|entry| {
            if entry.actor == Actor::System && entry.kind.opens_round() {
                round += 1;
            }
            HistoryLine {
                seq: entry.seq,
                round,
                current_round: round == current,
                actor: entry.actor.clone(),
                actor_label: labels.actor_label(&entry.actor),
                kind: entry.kind,
                comment: entry.comment.clone(),
                timestamp: entry.timestamp,
            }
        })
        .collect()
}
