use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    error::RepositoryError,
    types::{ApprovalRecord, ApprovalTicket, TicketFilter},
};

/// Ticket persistence. Updates carry the version the caller read, so a lost
/// update is reported as [`RepositoryError::VersionConflict`].
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert(&self, ticket: &ApprovalTicket) -> Result<(), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<ApprovalTicket>, RepositoryError>;

    async fn update(
        &self,
        ticket: &ApprovalTicket,
        expected_version: u64,
    ) -> Result<(), RepositoryError>;

    /// Stores the updated ticket and its new record together.
    async fn commit_vote(
        &self,
        ticket: &ApprovalTicket,
        expected_version: u64,
        record: &ApprovalRecord,
    ) -> Result<(), RepositoryError>;

    async fn records(&self, ticket_id: Uuid) -> Result<Vec<ApprovalRecord>, RepositoryError>;

    async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<ApprovalTicket>, RepositoryError>;

    /// Matching tickets, oldest first.
    async fn list(&self, filter: &TicketFilter) -> Result<Vec<ApprovalTicket>, RepositoryError>;
}

#[derive(Default)]
struct Tables {
    tickets: HashMap<Uuid, ApprovalTicket>,
    records: HashMap<Uuid, Vec<ApprovalRecord>>,
}

impl Tables {
    fn check_version(&self, ticket: &ApprovalTicket, expected: u64) -> Result<(), RepositoryError> {
        let stored = self
            .tickets
            .get(&ticket.id)
            .ok_or(RepositoryError::NotFound(ticket.id))?;
        if stored.version != expected {
            return Err(RepositoryError::VersionConflict {
                id: ticket.id,
                expected,
                actual: stored.version,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTicketRepository {
    tables: RwLock<Tables>,
}

impl InMemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn insert(&self, ticket: &ApprovalTicket) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        if tables.tickets.contains_key(&ticket.id) {
            return Err(anyhow::anyhow!("ticket {} already exists", ticket.id).into());
        }
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApprovalTicket>, RepositoryError> {
        Ok(self.tables.read().tickets.get(&id).cloned())
    }

    async fn update(
        &self,
        ticket: &ApprovalTicket,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        tables.check_version(ticket, expected_version)?;
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn commit_vote(
        &self,
        ticket: &ApprovalTicket,
        expected_version: u64,
        record: &ApprovalRecord,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        tables.check_version(ticket, expected_version)?;
        tables.tickets.insert(ticket.id, ticket.clone());
        tables
            .records
            .entry(ticket.id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn records(&self, ticket_id: Uuid) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .records
            .get(&ticket_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<ApprovalTicket>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .tickets
            .values()
            .filter(|t| t.reference_type == reference_type && t.reference_id == reference_id)
            .min_by_key(|t| t.created_at)
            .cloned())
    }

    async fn list(&self, filter: &TicketFilter) -> Result<Vec<ApprovalTicket>, RepositoryError> {
        let tables = self.tables.read();
        let mut tickets: Vec<ApprovalTicket> = tables
            .tickets
            .values()
            .filter(|ticket| filter.matches(ticket))
            .cloned()
            .collect();
        tickets.sort_by_key(|ticket| (ticket.created_at, ticket.id));
        if let Some(limit) = filter.limit {
            tickets.truncate(limit);
        }
        Ok(tickets)
    }
}
