//! Bus d'evenements type du core
//!
//! Remplace l'emission par topics dynamiques: chaque evenement est un
//! variant de `CoreEvent` avec un payload fixe, diffuse sur un canal
//! broadcast tokio. La livraison est at-most-once par abonne; un abonne
//! en retard perd les evenements les plus anciens et doit re-interroger
//! l'etat a la reconnexion.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::S3MetricsEvent;

/// Etat d'un job d'indexation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Starting,
    Indexing,
    Completed,
    Partial,
    Cancelled,
    Failed,
}

/// Progression d'un job d'indexation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexProgressEvent {
    pub profile_id: String,
    pub bucket_name: String,
    pub objects_indexed: u64,
    pub requests_made: u32,
    pub max_requests: u32,
    pub is_complete: bool,
    pub status: IndexStatus,
    pub error: Option<String>,
}

/// Notification qu'un objet vient d'etre materialise sur le remote
/// (emis apres la prise en compte optimiste dans l'index)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectCompletedEvent {
    pub profile_id: String,
    pub bucket_name: String,
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
}

/// Evenement du core
#[derive(Debug, Clone, Serialize)]
pub enum CoreEvent {
    IndexProgress(IndexProgressEvent),
    ObjectCompleted(ObjectCompletedEvent),
    RequestMetric(S3MetricsEvent),
}

/// Capacite par defaut du canal broadcast
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Bus d'evenements, detenu par le Core
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// S'abonner au flux d'evenements
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Obtenir une poignee d'emission (transmit-only) pour un producteur
    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    /// Emettre un evenement (sans attendre les abonnes)
    pub fn emit(&self, event: CoreEvent) {
        // Pas d'abonne = pas une erreur
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Poignee d'emission clonable, sans acces a la reception
///
/// Remise au driver d'indexation et a l'enregistreur de metriques pour
/// garantir un flux de messages unidirectionnel.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventSink {
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}
