use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::store::RegistrationStore;
use crate::{BookingQueueError, CallOrder, QueueEntry, QueueSnapshot, Registration, RegistrationStatus};

pub type SnapshotSender = broadcast::Sender<String>;
pub type SnapshotReceiver = broadcast::Receiver<String>;

const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
struct WaitingEntry {
    department_id: Uuid,
    entry: QueueEntry,
}

/// One doctor's checked-in patients, earliest session first, then by queue number.
#[derive(Debug, Default)]
struct DoctorWaitingList {
    entries: BTreeMap<CallOrder, WaitingEntry>,
}

impl DoctorWaitingList {
    fn insert(&mut self, department_id: Uuid, entry: QueueEntry) {
        self.entries
            .insert(entry.call_order(), WaitingEntry { department_id, entry });
    }

    fn remove(&mut self, registration_id: Uuid) -> bool {
        let key = self
            .entries
            .keys()
            .find(|(_, _, _, id)| *id == registration_id)
            .copied();
        key.map(|k| self.entries.remove(&k).is_some()).unwrap_or(false)
    }

    fn head(&self) -> Option<Uuid> {
        self.entries.values().next().map(|w| w.entry.registration_id)
    }
}

/// Owns the per-doctor waiting lists and the per-department live channels.
///
/// The waiting lists are a cache of status-2 registrations; `rebuild_from_store`
/// restores them after a restart.
pub struct DoctorQueueBroadcaster {
    registrations: Arc<dyn RegistrationStore>,
    waiting: RwLock<HashMap<Uuid, DoctorWaitingList>>,
    channels: RwLock<HashMap<Uuid, SnapshotSender>>,
}

impl DoctorQueueBroadcaster {
    pub fn new(registrations: Arc<dyn RegistrationStore>) -> Self {
        Self {
            registrations,
            waiting: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn on_enqueue(&self, registration: &Registration) {
        let mut waiting = self.waiting.write().await;
        waiting
            .entry(registration.doctor_id)
            .or_default()
            .insert(registration.department_id, QueueEntry::from(registration));
        debug!(
            "Registration {} joined doctor {} waiting list at {}",
            registration.id, registration.doctor_id, registration.queue_number
        );
    }

    pub async fn on_dequeue(&self, doctor_id: Uuid, registration_id: Uuid) -> bool {
        let mut waiting = self.waiting.write().await;
        let removed = waiting
            .get_mut(&doctor_id)
            .map(|list| list.remove(registration_id))
            .unwrap_or(false);
        if removed {
            debug!("Registration {} left doctor {} waiting list", registration_id, doctor_id);
        }
        removed
    }

    /// Next patient for this doctor, without removing them.
    pub async fn peek_next(&self, doctor_id: Uuid) -> Option<Uuid> {
        self.waiting.read().await.get(&doctor_id).and_then(DoctorWaitingList::head)
    }

    pub async fn waiting_list(&self, doctor_id: Uuid) -> Vec<QueueEntry> {
        self.waiting
            .read()
            .await
            .get(&doctor_id)
            .map(|list| list.entries.values().map(|w| w.entry.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn snapshot(&self, department_id: Uuid) -> Result<QueueSnapshot, BookingQueueError> {
        let mut waiting_list: Vec<QueueEntry> = {
            let waiting = self.waiting.read().await;
            waiting
                .values()
                .flat_map(|list| list.entries.values())
                .filter(|w| w.department_id == department_id)
                .map(|w| w.entry.clone())
                .collect()
        };
        waiting_list.sort_by_key(|e| (e.date, e.shift, e.queue_number, e.doctor_id, e.registration_id));

        let consulting = self
            .registrations
            .list_for_department(department_id, RegistrationStatus::InConsultation)
            .await?;
        let current_patient = consulting
            .iter()
            .max_by_key(|r| r.updated_at)
            .map(QueueEntry::from);

        Ok(QueueSnapshot {
            department_id,
            current_patient,
            waiting_list,
            generated_at: Utc::now(),
        })
    }

    /// Publishes the department snapshot to every live subscriber.
    pub async fn broadcast(&self, department_id: Uuid) -> Result<usize, BookingQueueError> {
        let snapshot = self.snapshot(department_id).await?;
        let message = serde_json::to_string(&snapshot)?;

        let channels = self.channels.read().await;
        let delivered = match channels.get(&department_id) {
            Some(sender) => sender.send(message).unwrap_or_else(|_| {
                debug!("No live subscribers for department {}", department_id);
                0
            }),
            None => 0,
        };

        debug!(
            "Broadcast department {} snapshot ({} waiting) to {} subscribers",
            department_id,
            snapshot.waiting_list.len(),
            delivered
        );
        Ok(delivered)
    }

    pub async fn subscribe(&self, department_id: Uuid) -> SnapshotReceiver {
        let mut channels = self.channels.write().await;
        channels
            .entry(department_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drops channels nobody listens to any more.
    pub async fn prune_channels(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    /// Replaces the in-memory lists with the persisted status-2 registrations.
    pub async fn rebuild_from_store(&self) -> Result<usize, BookingQueueError> {
        let checked_in = self
            .registrations
            .list_by_status(RegistrationStatus::CheckedIn)
            .await?;

        let mut rebuilt: HashMap<Uuid, DoctorWaitingList> = HashMap::new();
        for registration in &checked_in {
            rebuilt
                .entry(registration.doctor_id)
                .or_default()
                .insert(registration.department_id, QueueEntry::from(registration));
        }

        *self.waiting.write().await = rebuilt;

        if checked_in.is_empty() {
            debug!("No checked-in registrations to restore");
        } else {
            info!("Restored {} waiting registrations from storage", checked_in.len());
        }
        Ok(checked_in.len())
    }

    /// Broadcast failures only cost a display refresh; log and carry on.
    pub async fn broadcast_quietly(&self, department_id: Uuid) {
        if let Err(e) = self.broadcast(department_id).await {
            warn!("Failed to broadcast department {} snapshot: {}", department_id, e);
        }
    }
}
