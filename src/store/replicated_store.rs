use crate::peer::NodeAddr;
use crate::pool::{ConnectionPool, PoolError};
use crate::role::{Role, RoleSnapshot};
use crate::store::maps::{ForwardOutcome, KvMaps};
use crate::store::node_state::{NodeState, RoleListener};
use crate::store::service::{DataTransferError, DataTransferSummary, KeyValueService, RoleViolation};
use crate::store::transfer;
use std::sync::atomic::{AtomicU64, Ordering};

/// ReplicatedStore is a node's in-memory key/value data plus its replication duties. As primary it
/// forwards every write to the backup (while one is known), and sources bulk transfers. As backup
/// it applies forwarded writes by sequence number.
pub struct ReplicatedStore {
    logger: slog::Logger,
    maps: KvMaps,
    state: NodeState,
    // One global counter. Backups order writes per key by it.
    next_sequence: AtomicU64,
    backup_pool: ConnectionPool,
    transfer_batch_size: usize,
}

impl ReplicatedStore {
    pub(crate) fn new(logger: slog::Logger, backup_pool: ConnectionPool, transfer_batch_size: usize) -> Self {
        ReplicatedStore {
            logger,
            maps: KvMaps::default(),
            state: NodeState::new_spare(),
            next_sequence: AtomicU64::new(0),
            backup_pool,
            transfer_batch_size,
        }
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn is_alone(&self) -> bool {
        self.state.is_alone()
    }

    pub fn role_snapshot(&self) -> RoleSnapshot {
        self.state.snapshot()
    }

    pub fn role_listener(&self) -> RoleListener {
        self.state.listener()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub(crate) fn set_role(&self, role: Role) {
        let previous = self.state.set_role(role);
        if previous != role {
            slog::info!(self.logger, "Role changed: {} -> {}", previous, role);
        }
    }

    pub(crate) fn set_alone(&self, alone: bool) {
        let previous = self.state.set_alone(alone);
        if previous != alone {
            slog::info!(self.logger, "Alone flag changed: {} -> {}", previous, alone);
        }
    }

    fn check_serving(&self) -> Result<(), RoleViolation> {
        match self.state.role() {
            Role::Spare => Err(RoleViolation { role: Role::Spare }),
            Role::Primary | Role::Backup => Ok(()),
        }
    }

    async fn forward_to_backup(&self, key: String, value: String) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let target = self.backup_pool.destination();

        let mut connection = match self.backup_pool.pop_connection().await {
            Ok(c) => c,
            Err(e) => {
                self.on_backup_lost(target.as_ref(), &e);
                return;
            }
        };

        match connection.forward_request(key, value, sequence).await {
            Ok(()) => self.backup_pool.add_connection(connection),
            Err(e) => {
                let failed = connection.addr().clone();
                self.on_backup_lost(Some(&failed), &PoolError::Connect(e));
            }
        }
    }

    // No retry: forwarding resumes once a new backup completes a data transfer. A failure against
    // a backup the pool no longer targets says nothing about the current one.
    fn on_backup_lost(&self, failed: Option<&NodeAddr>, cause: &PoolError) {
        if !self.is_current_backup(failed) {
            slog::debug!(self.logger, "Ignoring failure against previous backup {:?}: {}", failed, cause);
            return;
        }
        slog::warn!(self.logger, "Forwarding to backup failed, assuming backup is gone: {}", cause);
        self.set_alone(true);
    }

    fn is_current_backup(&self, addr: Option<&NodeAddr>) -> bool {
        self.backup_pool.destination().as_ref() == addr
    }

    async fn send_batch(&self, keys: Vec<String>, values: Vec<String>) -> Result<(), PoolError> {
        let mut connection = self.backup_pool.pop_connection().await?;
        connection.set_map(keys, values).await?;
        self.backup_pool.add_connection(connection);
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueService for ReplicatedStore {
    async fn get(&self, key: String) -> Result<String, RoleViolation> {
        self.check_serving()?;
        Ok(self.maps.get(&key).unwrap_or_default())
    }

    async fn put(&self, key: String, value: String) -> Result<(), RoleViolation> {
        self.check_serving()?;

        self.maps.put(key.clone(), value.clone());
        if !self.state.is_alone() {
            self.forward_to_backup(key, value).await;
        }
        Ok(())
    }

    async fn forward_request(&self, key: String, value: String, sequence: u64) {
        if let ForwardOutcome::Stale { recorded } = self.maps.apply_forwarded(key, value, sequence) {
            slog::debug!(
                self.logger,
                "Dropped stale forwarded write: sequence {} < recorded {}",
                sequence,
                recorded
            );
        }
    }

    async fn ping(&self) -> bool {
        self.state.role() != Role::Spare
    }

    async fn complete_data_transfer(&self, target: NodeAddr) -> Result<DataTransferSummary, DataTransferError> {
        slog::info!(self.logger, "Starting full data transfer to new backup {}", target);

        self.backup_pool.initialize_connections(target.clone()).await;
        self.set_alone(false);

        let (mut keys, mut values) = self.maps.snapshot();
        let ranges = transfer::batch_ranges(keys.len(), self.transfer_batch_size);
        let total_batches = ranges.len();

        let mut summary = DataTransferSummary::default();
        // Walk the ranges back to front so each batch can be split off the tail without copying.
        let mut batches = Vec::with_capacity(total_batches);
        for range in ranges.iter().rev() {
            batches.push((keys.split_off(range.start), values.split_off(range.start)));
        }

        for (batch, (batch_keys, batch_values)) in batches.into_iter().rev().enumerate() {
            let batch_len = batch_keys.len() as u64;
            if let Err(source) = self.send_batch(batch_keys, batch_values).await {
                // A later transfer may have retargeted the pool in the meantime.
                if self.is_current_backup(Some(&target)) {
                    self.set_alone(true);
                }
                slog::warn!(
                    self.logger,
                    "Data transfer to {} aborted at batch {}/{}: {}",
                    target,
                    batch + 1,
                    total_batches,
                    source
                );
                return Err(DataTransferError::Batch {
                    target,
                    batch: batch + 1,
                    total_batches,
                    source,
                });
            }
            summary.entries_sent += batch_len;
            summary.batches_sent += 1;
        }

        slog::info!(
            self.logger,
            "Data transfer to {} complete: {} entries in {} batches",
            target,
            summary.entries_sent,
            summary.batches_sent
        );
        Ok(summary)
    }

    async fn set_map(&self, keys: Vec<String>, values: Vec<String>) {
        if keys.len() != values.len() {
            slog::warn!(
                self.logger,
                "SetMap with {} keys but {} values; extra entries ignored",
                keys.len(),
                values.len()
            );
        }
        let inserted = self.maps.insert_absent(keys.into_iter().zip(values.into_iter()));
        slog::debug!(self.logger, "SetMap inserted {} entries", inserted);
    }
}
