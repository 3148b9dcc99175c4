// Transactional grouping manager: aggregates ChangeEvents sharing a
// source-side transaction id so downstream systems observe the transaction
// atomically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use md5::Md5;
use parking_lot::RwLock;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::{SourceId, TenantId, TransactionId};
use crate::config::{ChecksumAlgorithm, TransactionalConfig};
use crate::error::{CdcError, Result};
use crate::events::ChangeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Active,
    Preparing,
    Delivering,
    Committed,
    RolledBack,
    Failed,
    Timeout,
    Retrying,
}

impl GroupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupStatus::Committed | GroupStatus::RolledBack | GroupStatus::Failed | GroupStatus::Timeout
        )
    }
}

#[derive(Debug, Clone)]
pub struct TransactionalGroup {
    pub transaction_id: TransactionId,
    pub source: SourceId,
    pub tenant_id: Option<TenantId>,
    pub start_timestamp: SystemTime,
    pub end_timestamp: Option<SystemTime>,
    pub sequence_number: u64,
    pub status: GroupStatus,
    pub events: Vec<ChangeEvent>,
    pub checksum: String,
    pub retry_count: u32,
    pub timeout_seconds: u64,
    pub priority: u8,
    pub last_error: Option<String>,
}

impl TransactionalGroup {
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn duration(&self) -> Option<Duration> {
        let end = self.end_timestamp?;
        end.duration_since(self.start_timestamp).ok()
    }

    pub fn is_timed_out(&self, now: SystemTime) -> bool {
        now.duration_since(self.start_timestamp)
            .map(|elapsed| elapsed > Duration::from_secs(self.timeout_seconds))
            .unwrap_or(false)
    }
}

fn compute_checksum(events: &[ChangeEvent], transaction_id: &str, source: &str, algorithm: ChecksumAlgorithm) -> String {
    let mut header = format!("{transaction_id}|{source}|{}", events.len());
    for event in events {
        header.push('|');
        header.push_str(&event.offset);
    }
    match algorithm {
        ChecksumAlgorithm::Md5 => hex::encode(Md5::digest(header.as_bytes())),
        ChecksumAlgorithm::Sha1 => hex::encode(Sha1::digest(header.as_bytes())),
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(header.as_bytes())),
        ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(header.as_bytes())),
    }
}

pub struct TransactionalGroupManager {
    config: TransactionalConfig,
    groups: RwLock<HashMap<TransactionId, TransactionalGroup>>,
    sequence: AtomicU64,
}

impl TransactionalGroupManager {
    pub fn new(config: TransactionalConfig) -> Self {
        Self {
            config,
            groups: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn start(&self, transaction_id: TransactionId, source: SourceId, tenant_id: Option<TenantId>) -> Result<()> {
        let mut groups = self.groups.write();
        if groups.contains_key(&transaction_id) {
            return Err(CdcError::AlreadyExists(format!(
                "transaction '{transaction_id}' already started"
            )));
        }
        if groups.values().filter(|g| !g.status.is_terminal()).count() >= self.config.max_concurrent_transactions {
            return Err(CdcError::Capacity(
                "max concurrent transactions reached".to_string(),
            ));
        }
        let sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        groups.insert(
            transaction_id.clone(),
            TransactionalGroup {
                transaction_id,
                source,
                tenant_id,
                start_timestamp: SystemTime::now(),
                end_timestamp: None,
                sequence_number,
                status: GroupStatus::Active,
                events: Vec::new(),
                checksum: String::new(),
                retry_count: 0,
                timeout_seconds: self.config.default_timeout_seconds,
                priority: 0,
                last_error: None,
            },
        );
        Ok(())
    }

    pub fn add_event(&self, transaction_id: &str, event: ChangeEvent) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(transaction_id)
            .ok_or_else(|| CdcError::NotFound(format!("transaction '{transaction_id}' not found")))?;

        if group.status != GroupStatus::Active {
            return Err(CdcError::InvalidOperation(format!(
                "cannot add event to transaction '{transaction_id}' in status {:?}",
                group.status
            )));
        }
        if group.events.len() >= self.config.max_events_per_transaction {
            return Err(CdcError::Capacity(format!(
                "transaction '{transaction_id}' exceeded max events per transaction"
            )));
        }

        group.events.push(event);
        if self.config.enable_checksums {
            group.checksum = compute_checksum(
                &group.events,
                &group.transaction_id,
                &group.source,
                self.config.checksum_algorithm,
            );
        }
        Ok(())
    }

    pub fn commit(&self, transaction_id: &str) -> Result<TransactionalGroup> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(transaction_id)
            .ok_or_else(|| CdcError::NotFound(format!("transaction '{transaction_id}' not found")))?;

        if group.status != GroupStatus::Active {
            return Err(CdcError::InvalidOperation(format!(
                "cannot commit transaction '{transaction_id}' in status {:?}",
                group.status
            )));
        }

        if self.config.enable_checksums {
            let recomputed = compute_checksum(
                &group.events,
                &group.transaction_id,
                &group.source,
                self.config.checksum_algorithm,
            );
            if recomputed != group.checksum {
                group.status = GroupStatus::Failed;
                group.last_error = Some("checksum mismatch at commit".to_string());
                return Err(CdcError::Validation(format!(
                    "checksum mismatch for transaction '{transaction_id}'"
                )));
            }
        }

        group.status = GroupStatus::Committed;
        group.end_timestamp = Some(SystemTime::now());
        Ok(group.clone())
    }

    pub fn rollback(&self, transaction_id: &str, reason: &str) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(transaction_id)
            .ok_or_else(|| CdcError::NotFound(format!("transaction '{transaction_id}' not found")))?;
        group.status = GroupStatus::RolledBack;
        group.end_timestamp = Some(SystemTime::now());
        group.last_error = Some(reason.to_string());
        Ok(())
    }

    pub fn get(&self, transaction_id: &str) -> Option<TransactionalGroup> {
        self.groups.read().get(transaction_id).cloned()
    }

    pub fn get_by_status(&self, status: GroupStatus) -> Vec<TransactionalGroup> {
        self.groups
            .read()
            .values()
            .filter(|g| g.status == status)
            .cloned()
            .collect()
    }

    pub fn record_delivery_attempt(&self, transaction_id: &str, succeeded: bool, error: Option<String>) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(transaction_id)
            .ok_or_else(|| CdcError::NotFound(format!("transaction '{transaction_id}' not found")))?;
        group.retry_count += 1;
        if succeeded {
            group.status = GroupStatus::Delivering;
        } else {
            group.last_error = error;
            group.status = GroupStatus::Retrying;
        }
        Ok(())
    }

    pub fn cleanup_completed(&self) -> usize {
        let retention = Duration::from_secs(self.config.retention_days as u64 * 86_400);
        let now = SystemTime::now();
        let mut groups = self.groups.write();
        let before = groups.len();
        groups.retain(|_, group| {
            if !group.status.is_terminal() {
                return true;
            }
            match group.end_timestamp {
                Some(end) => now.duration_since(end).map(|age| age < retention).unwrap_or(true),
                None => true,
            }
        });
        before - groups.len()
    }

    pub fn process_timeouts(&self) -> usize {
        let now = SystemTime::now();
        let mut groups = self.groups.write();
        let mut timed_out = 0;
        for group in groups.values_mut() {
            if group.status == GroupStatus::Active && group.is_timed_out(now) {
                group.status = GroupStatus::Timeout;
                group.end_timestamp = Some(now);
                group.last_error = Some("transaction timeout".to_string());
                timed_out += 1;
                warn!(transaction_id = %group.transaction_id, "transaction timed out and was rolled back");
            }
        }
        timed_out
    }
}

/// Spawn the periodic timeout sweeper and cleanup sweeper as independent
/// background loops, following the reference crate's interval-task pattern.
pub fn spawn_sweepers(
    manager: Arc<TransactionalGroupManager>,
    cancel: CancellationToken,
) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let timeout_interval = Duration::from_secs(
        manager.config.timeout_processing_interval_minutes.max(1) * 60,
    );
    let cleanup_interval = Duration::from_secs(manager.config.cleanup_interval_minutes.max(1) * 60);

    let timeout_manager = manager.clone();
    let timeout_cancel = cancel.clone();
    let timeout_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timeout_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let count = timeout_manager.process_timeouts();
                    if count > 0 {
                        info!(count, "timed out transactional groups");
                    }
                }
                _ = timeout_cancel.cancelled() => break,
            }
        }
    });

    let cleanup_manager = manager;
    let cleanup_cancel = cancel;
    let cleanup_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cleanup_manager.cleanup_completed();
                    if removed > 0 {
                        info!(removed, "swept completed transactional groups past retention");
                    }
                }
                _ = cleanup_cancel.cancelled() => break,
            }
        }
    });

    (timeout_task, cleanup_task)
}

#[allow(dead_code)]
fn unix_seconds(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Operation;

    fn event(offset: &str) -> ChangeEvent {
        ChangeEvent::builder("src-A", Operation::Insert)
            .schema("public")
            .table("orders")
            .offset(offset)
            .build()
            .unwrap()
    }

    #[test]
    fn full_lifecycle_commits_with_matching_checksum() {
        let manager = TransactionalGroupManager::new(TransactionalConfig::default());
        manager.start("T1".to_string(), "src-A".to_string(), None).unwrap();
        manager.add_event("T1", event("1")).unwrap();
        manager.add_event("T1", event("2")).unwrap();

        let committed = manager.commit("T1").unwrap();
        assert_eq!(committed.status, GroupStatus::Committed);
        assert_eq!(committed.event_count(), 2);
    }

    #[test]
    fn add_event_rejected_once_not_active() {
        let manager = TransactionalGroupManager::new(TransactionalConfig::default());
        manager.start("T1".to_string(), "src-A".to_string(), None).unwrap();
        manager.commit("T1").unwrap();
        let err = manager.add_event("T1", event("1")).unwrap_err();
        assert!(matches!(err, CdcError::InvalidOperation(_)));
    }

    #[test]
    fn rollback_transitions_to_terminal_state() {
        let manager = TransactionalGroupManager::new(TransactionalConfig::default());
        manager.start("T1".to_string(), "src-A".to_string(), None).unwrap();
        manager.rollback("T1", "manual rollback").unwrap();
        let group = manager.get("T1").unwrap();
        assert_eq!(group.status, GroupStatus::RolledBack);
        assert!(group.status.is_terminal());
    }

    #[test]
    fn timeout_sweeper_marks_expired_active_groups() {
        let mut config = TransactionalConfig::default();
        config.default_timeout_seconds = 0;
        let manager = TransactionalGroupManager::new(config);
        manager.start("T1".to_string(), "src-A".to_string(), None).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let count = manager.process_timeouts();
        assert_eq!(count, 1);
        assert_eq!(manager.get("T1").unwrap().status, GroupStatus::Timeout);
    }

    #[test]
    fn max_events_per_transaction_is_enforced() {
        let mut config = TransactionalConfig::default();
        config.max_events_per_transaction = 1;
        let manager = TransactionalGroupManager::new(config);
        manager.start("T1".to_string(), "src-A".to_string(), None).unwrap();
        manager.add_event("T1", event("1")).unwrap();
        let err = manager.add_event("T1", event("2")).unwrap_err();
        assert!(matches!(err, CdcError::Capacity(_)));
    }
}
