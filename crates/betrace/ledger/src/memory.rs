//! In-memory ledger implementation used for tests, local runs, and embedding.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};

use betrace_types::{AccountId, PartitionId, TenantId, TransferId};

use crate::error::LedgerError;
use crate::query::{TransferFilter, TransferPage};
use crate::record::{Account, Transfer};
use crate::traits::{LedgerReader, LedgerWriter};

/// Append-only in-memory ledger.
///
/// Each partition owns its own lock, so writers to different tenants never
/// contend and commit order is linearizable within a partition. Reads take
/// the same partition lock briefly to clone a consistent snapshot.
pub struct InMemoryLedger {
    partitions: RwLock<HashMap<PartitionId, Arc<Mutex<PartitionState>>>>,
    /// Failure injection for availability tests.
    unavailable: AtomicBool,
}

struct PartitionState {
    tenant: TenantId,
    accounts: HashMap<AccountId, Account>,
    /// Ordered by commit timestamp ascending by construction.
    transfers: Vec<Transfer>,
    transfer_ids: HashSet<TransferId>,
    last_timestamp_ns: u64,
}

impl PartitionState {
    fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            accounts: HashMap::new(),
            transfers: Vec::new(),
            transfer_ids: HashSet::new(),
            last_timestamp_ns: 0,
        }
    }

    /// Monotonic, unique-within-partition nanosecond timestamp. When the
    /// physical clock stalls or regresses, bump past the last commit.
    fn next_timestamp(&mut self) -> u64 {
        let now = now_ns();
        let assigned = if now > self.last_timestamp_ns {
            now
        } else {
            self.last_timestamp_ns + 1
        };
        self.last_timestamp_ns = assigned;
        assigned
    }

    fn validate_transfer(&self, transfer: &Transfer) -> Result<(), LedgerError> {
        if self.transfer_ids.contains(&transfer.id) {
            return Err(LedgerError::DuplicateTransferId(transfer.id));
        }
        if !self.accounts.contains_key(&transfer.debit_account) {
            return Err(LedgerError::AccountNotFound(transfer.debit_account));
        }
        if !self.accounts.contains_key(&transfer.credit_account) {
            return Err(LedgerError::AccountNotFound(transfer.credit_account));
        }
        Ok(())
    }

    fn commit(&mut self, mut transfer: Transfer) {
        transfer.timestamp_ns = self.next_timestamp();
        self.transfer_ids.insert(transfer.id);
        self.transfers.push(transfer);
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate ledger unavailability: while set, every write fails with
    /// [`LedgerError::Unavailable`]. Reads stay up.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn tenant_of(&self, partition: PartitionId) -> Option<TenantId> {
        let partitions = self.partitions.read();
        partitions.get(&partition).map(|p| p.lock().tenant)
    }

    fn partition(&self, id: PartitionId) -> Result<Arc<Mutex<PartitionState>>, LedgerError> {
        let partitions = self.partitions.read();
        partitions
            .get(&id)
            .cloned()
            .ok_or(LedgerError::InvalidLedgerPartition(id))
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger write rejected".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerWriter for InMemoryLedger {
    fn create_partition(
        &self,
        partition: PartitionId,
        tenant: TenantId,
    ) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut partitions = self.partitions.write();
        if partitions.contains_key(&partition) {
            return Err(LedgerError::DuplicatePartition(partition));
        }
        partitions.insert(partition, Arc::new(Mutex::new(PartitionState::new(tenant))));
        Ok(())
    }

    fn create_account(&self, account: Account) -> Result<(), LedgerError> {
        self.check_available()?;
        let partition = self.partition(account.partition)?;
        let mut state = partition.lock();
        if state.accounts.contains_key(&account.id) {
            return Err(LedgerError::DuplicateAccount(account.id));
        }
        state.accounts.insert(account.id, account);
        Ok(())
    }

    fn create_transfer(&self, transfer: Transfer) -> Result<(), LedgerError> {
        self.check_available()?;
        let partition = self.partition(transfer.partition)?;
        let mut state = partition.lock();
        state.validate_transfer(&transfer)?;
        state.commit(transfer);
        Ok(())
    }

    fn create_transfers_linked(&self, transfers: Vec<Transfer>) -> Result<(), LedgerError> {
        self.check_available()?;
        let Some(first) = transfers.first() else {
            return Ok(());
        };
        let partition_id = first.partition;
        if let Some(index) = transfers.iter().position(|t| t.partition != partition_id) {
            return Err(LedgerError::LinkedOperationFailed {
                failed_index: index,
                source: Box::new(LedgerError::InvalidLedgerPartition(
                    transfers[index].partition,
                )),
            });
        }

        let partition = self.partition(partition_id)?;
        let mut state = partition.lock();

        // Validate the whole batch before committing any member, including
        // id collisions inside the batch itself.
        let mut batch_ids = HashSet::new();
        for (index, transfer) in transfers.iter().enumerate() {
            let result = if !batch_ids.insert(transfer.id) {
                Err(LedgerError::DuplicateTransferId(transfer.id))
            } else {
                state.validate_transfer(transfer)
            };
            if let Err(source) = result {
                return Err(LedgerError::LinkedOperationFailed {
                    failed_index: index,
                    source: Box::new(source),
                });
            }
        }

        for transfer in transfers {
            state.commit(transfer);
        }
        Ok(())
    }
}

impl LedgerReader for InMemoryLedger {
    fn query_transfers(&self, filter: &TransferFilter) -> Result<TransferPage, LedgerError> {
        if filter.limit == 0 {
            return Err(LedgerError::QueryRejected("limit must be positive".into()));
        }
        let partition = self.partition(filter.partition)?;
        let state = partition.lock();

        let mut transfers = Vec::new();
        for transfer in &state.transfers {
            if filter.matches(transfer) {
                transfers.push(transfer.clone());
                if transfers.len() == filter.limit {
                    break;
                }
            }
        }

        let continuation = if transfers.len() == filter.limit {
            transfers.last().map(|t| t.timestamp_ns)
        } else {
            None
        };

        Ok(TransferPage {
            transfers,
            continuation,
        })
    }

    fn get_transfer(
        &self,
        partition: PartitionId,
        id: TransferId,
    ) -> Result<Option<Transfer>, LedgerError> {
        let partition = self.partition(partition)?;
        let state = partition.lock();
        Ok(state.transfers.iter().find(|t| t.id == id).cloned())
    }

    fn get_account(
        &self,
        partition: PartitionId,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError> {
        let partition = self.partition(partition)?;
        let state = partition.lock();
        Ok(state.accounts.get(&id).cloned())
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AccountKind, TransferKind, TransferMetadata};

    fn setup() -> (InMemoryLedger, PartitionId, TenantId, AccountId, AccountId) {
        let ledger = InMemoryLedger::new();
        let tenant = TenantId::generate();
        let partition = PartitionId::new(1);
        ledger.create_partition(partition, tenant).unwrap();

        let actor = Account::new(AccountKind::AuthEvent, tenant, partition);
        let context = Account::new(AccountKind::TenantContext, tenant, partition);
        let (actor_id, context_id) = (actor.id, context.id);
        ledger.create_account(actor).unwrap();
        ledger.create_account(context).unwrap();
        (ledger, partition, tenant, actor_id, context_id)
    }

    fn transfer(
        actor: AccountId,
        context: AccountId,
        tenant: TenantId,
        partition: PartitionId,
    ) -> Transfer {
        Transfer::new(
            actor,
            context,
            TransferKind::AuthDecision,
            TransferMetadata {
                tenant_id: tenant,
                trace_id: None,
                reference: None,
            },
            partition,
        )
    }

    #[test]
    fn transfer_requires_registered_partition() {
        let (ledger, _, tenant, actor, context) = setup();
        let orphan = transfer(actor, context, tenant, PartitionId::new(99));
        assert_eq!(
            ledger.create_transfer(orphan),
            Err(LedgerError::InvalidLedgerPartition(PartitionId::new(99)))
        );
    }

    #[test]
    fn transfer_requires_existing_accounts() {
        let (ledger, partition, tenant, actor, _) = setup();
        let missing = AccountId::generate();
        let t = transfer(actor, missing, tenant, partition);
        assert_eq!(
            ledger.create_transfer(t),
            Err(LedgerError::AccountNotFound(missing))
        );
    }

    #[test]
    fn duplicate_transfer_id_is_rejected_and_first_commit_survives() {
        let (ledger, partition, tenant, actor, context) = setup();
        let id = TransferId::generate();
        let first = transfer(actor, context, tenant, partition).with_id(id);
        let second = transfer(actor, context, tenant, partition).with_id(id);

        ledger.create_transfer(first).unwrap();
        assert_eq!(
            ledger.create_transfer(second),
            Err(LedgerError::DuplicateTransferId(id))
        );

        let page = ledger
            .query_transfers(&TransferFilter::for_partition(partition))
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.transfers[0].id, id);
    }

    #[test]
    fn commit_timestamps_are_monotonic_and_unique() {
        let (ledger, partition, tenant, actor, context) = setup();
        for _ in 0..200 {
            ledger
                .create_transfer(transfer(actor, context, tenant, partition))
                .unwrap();
        }
        let page = ledger
            .query_transfers(&TransferFilter::for_partition(partition).limit(500))
            .unwrap();
        assert_eq!(page.len(), 200);
        for pair in page.transfers.windows(2) {
            assert!(pair[0].timestamp_ns < pair[1].timestamp_ns);
        }
    }

    #[test]
    fn committed_transfers_are_returned_unchanged() {
        let (ledger, partition, tenant, actor, context) = setup();
        let t = transfer(actor, context, tenant, partition).with_amount(3);
        let id = t.id;
        ledger.create_transfer(t).unwrap();

        let first_read = ledger.get_transfer(partition, id).unwrap().unwrap();
        let second_read = ledger.get_transfer(partition, id).unwrap().unwrap();
        assert_eq!(first_read, second_read);
        assert_eq!(first_read.amount, 3);
        assert!(first_read.timestamp_ns > 0);
    }

    #[test]
    fn linked_batch_commits_atomically() {
        let (ledger, partition, tenant, actor, context) = setup();
        let good = transfer(actor, context, tenant, partition);
        let bad = transfer(actor, AccountId::generate(), tenant, partition);
        let also_good = transfer(actor, context, tenant, partition);

        let err = ledger
            .create_transfers_linked(vec![good, bad, also_good])
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::LinkedOperationFailed { failed_index: 1, .. }
        ));

        let page = ledger
            .query_transfers(&TransferFilter::for_partition(partition))
            .unwrap();
        assert!(page.is_empty());

        let batch = vec![
            transfer(actor, context, tenant, partition),
            transfer(actor, context, tenant, partition),
        ];
        ledger.create_transfers_linked(batch).unwrap();
        let page = ledger
            .query_transfers(&TransferFilter::for_partition(partition))
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn linked_batch_rejects_intra_batch_duplicate_ids() {
        let (ledger, partition, tenant, actor, context) = setup();
        let id = TransferId::generate();
        let batch = vec![
            transfer(actor, context, tenant, partition).with_id(id),
            transfer(actor, context, tenant, partition).with_id(id),
        ];
        let err = ledger.create_transfers_linked(batch).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::LinkedOperationFailed { failed_index: 1, .. }
        ));
    }

    #[test]
    fn partition_isolation_under_concurrent_writes() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tenant_a = TenantId::generate();
        let tenant_b = TenantId::generate();
        let partition_a = PartitionId::new(1);
        let partition_b = PartitionId::new(2);
        ledger.create_partition(partition_a, tenant_a).unwrap();
        ledger.create_partition(partition_b, tenant_b).unwrap();

        let make_accounts = |tenant, partition| {
            let actor = Account::new(AccountKind::AuthEvent, tenant, partition);
            let context = Account::new(AccountKind::TenantContext, tenant, partition);
            let ids = (actor.id, context.id);
            ledger.create_account(actor).unwrap();
            ledger.create_account(context).unwrap();
            ids
        };
        let (actor_a, context_a) = make_accounts(tenant_a, partition_a);
        let (actor_b, context_b) = make_accounts(tenant_b, partition_b);

        std::thread::scope(|scope| {
            let ledger_a = Arc::clone(&ledger);
            let ledger_b = Arc::clone(&ledger);
            scope.spawn(move || {
                for _ in 0..100 {
                    ledger_a
                        .create_transfer(transfer(actor_a, context_a, tenant_a, partition_a))
                        .unwrap();
                }
            });
            scope.spawn(move || {
                for _ in 0..100 {
                    ledger_b
                        .create_transfer(transfer(actor_b, context_b, tenant_b, partition_b))
                        .unwrap();
                }
            });
        });

        let page_a = ledger
            .query_transfers(&TransferFilter::for_partition(partition_a).limit(500))
            .unwrap();
        assert_eq!(page_a.len(), 100);
        for t in &page_a.transfers {
            assert_eq!(t.metadata.tenant_id, tenant_a);
            assert_eq!(t.partition, partition_a);
        }

        let page_b = ledger
            .query_transfers(&TransferFilter::for_partition(partition_b).limit(500))
            .unwrap();
        assert_eq!(page_b.len(), 100);
        for t in &page_b.transfers {
            assert_eq!(t.metadata.tenant_id, tenant_b);
        }
    }

    #[test]
    fn pagination_is_restartable() {
        let (ledger, partition, tenant, actor, context) = setup();
        for _ in 0..25 {
            ledger
                .create_transfer(transfer(actor, context, tenant, partition))
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut continuation = None;
        loop {
            let mut filter = TransferFilter::for_partition(partition).limit(10);
            if let Some(after) = continuation {
                filter = filter.after_timestamp_ns(after);
            }
            let page = ledger.query_transfers(&filter).unwrap();
            seen.extend(page.transfers.iter().map(|t| t.id));
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        assert_eq!(seen.len(), 25);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 25);
    }

    #[test]
    fn query_rejects_zero_limit() {
        let (ledger, partition, ..) = setup();
        let err = ledger
            .query_transfers(&TransferFilter::for_partition(partition).limit(0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::QueryRejected(_)));
    }

    #[test]
    fn unavailable_ledger_rejects_writes_with_retryable_error() {
        let (ledger, partition, tenant, actor, context) = setup();
        ledger.set_unavailable(true);
        let err = ledger
            .create_transfer(transfer(actor, context, tenant, partition))
            .unwrap_err();
        assert!(err.is_retryable());

        ledger.set_unavailable(false);
        ledger
            .create_transfer(transfer(actor, context, tenant, partition))
            .unwrap();
    }
}
