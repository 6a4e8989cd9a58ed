//! `PostgreSQL` storage for the ticket queue engine.
//!
//! [`PostgresTicketStore`] implements [`TicketStore`] over four tables:
//! `events`, `waiting_list`, `tickets` and `seller_accounts`. Each event row
//! carries a `version` column; [`TicketStore::save_ledger`] bumps it with a
//! conditional `UPDATE` inside the same transaction that writes the ledger's
//! entries and tickets, so a stale writer changes nothing.
//!
//! A partial unique index on `waiting_list (event_id, buyer_id)` restricted
//! to `waiting`/`offered` rows backs the one-live-claim rule at the database
//! level as well.
//!
//! # Example
//!
//! ```ignore
//! use ticket_queue_postgres::PostgresTicketStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::new("postgres://localhost/tickets").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use chrono::{DateTime, Utc};
use rows::{EventRow, db_err, entry_from_row, event_from_row, ticket_from_row, to_db_i32, to_db_i64};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Instant;
use ticket_queue_core::{
    Event, EventId, EventLedger, StoreError, StoreFuture, Ticket, TicketId, TicketStore, UserId,
    Version, WaitingListEntry,
};

const EVENT_COLUMNS: &str = "id, owner_id, name, description, location, event_date, price_minor, \
     total_tickets, is_cancelled, created_at, version";

const ENTRY_COLUMNS: &str =
    "id, event_id, buyer_id, status, offer_expires_at, created_at, sequence, closed_at";

const TICKET_COLUMNS: &str =
    "id, event_id, entry_id, buyer_id, status, amount_minor, payment_reference, purchased_at";

/// `PostgreSQL`-backed [`TicketStore`].
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Connect with a pool of up to 10 connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::connect(database_url, 10).await
    }

    /// Connect with an explicit pool size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or upgrade the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        tracing::info!("Ticket queue schema up to date");
        Ok(())
    }

    /// The underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn read_ledger(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
    ) -> Result<Option<EventLedger>, StoreError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let Some(row) = sqlx::query(&query)
            .bind(*event_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        let EventRow { event, version } = event_from_row(&row)?;

        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM waiting_list WHERE event_id = $1 ORDER BY created_at, sequence"
        );
        let entries = sqlx::query(&query)
            .bind(*event_id.as_uuid())
            .fetch_all(&mut **tx)
            .await
            .map_err(db_err)?
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let query = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE event_id = $1 ORDER BY purchased_at, id"
        );
        let tickets = sqlx::query(&query)
            .bind(*event_id.as_uuid())
            .fetch_all(&mut **tx)
            .await
            .map_err(db_err)?
            .iter()
            .map(ticket_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(EventLedger {
            event,
            entries,
            tickets,
            version,
        }))
    }

    async fn snapshot(&self, event_id: EventId) -> Result<Option<EventLedger>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let ledger = Self::read_ledger(&mut tx, event_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(ledger)
    }

    async fn write_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &WaitingListEntry,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO waiting_list (
                id, event_id, buyer_id, status, offer_expires_at, created_at, sequence, closed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                offer_expires_at = EXCLUDED.offer_expires_at,
                closed_at = EXCLUDED.closed_at
            WHERE waiting_list.status IS DISTINCT FROM EXCLUDED.status
               OR waiting_list.offer_expires_at IS DISTINCT FROM EXCLUDED.offer_expires_at
            ",
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.event_id.as_uuid())
        .bind(entry.buyer.as_str())
        .bind(entry.status.as_str())
        .bind(entry.offer_expires_at)
        .bind(entry.created_at)
        .bind(to_db_i64(entry.sequence, "sequence")?)
        .bind(entry.closed_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn write_ticket(
        tx: &mut Transaction<'_, Postgres>,
        ticket: &Ticket,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO tickets (
                id, event_id, entry_id, buyer_id, status, amount_minor, payment_reference, purchased_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status
            WHERE tickets.status IS DISTINCT FROM EXCLUDED.status
            ",
        )
        .bind(*ticket.id.as_uuid())
        .bind(*ticket.event_id.as_uuid())
        .bind(*ticket.entry_id.as_uuid())
        .bind(ticket.buyer.as_str())
        .bind(ticket.status.as_str())
        .bind(to_db_i64(ticket.amount.minor_units(), "amount")?)
        .bind(&ticket.payment_reference)
        .bind(ticket.purchased_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn compare_and_swap(&self, ledger: &EventLedger, expected: Version) -> Result<Version, StoreError> {
        let event = &ledger.event;
        let next = expected.next();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            r"
            UPDATE events
            SET name = $3, description = $4, location = $5, event_date = $6,
                price_minor = $7, total_tickets = $8, is_cancelled = $9, version = $10
            WHERE id = $1 AND version = $2
            ",
        )
        .bind(*event.id.as_uuid())
        .bind(to_db_i64(expected.value(), "version")?)
        .bind(&event.name)
        .bind(&event.description)
        .bind(&event.location)
        .bind(event.event_date)
        .bind(to_db_i64(event.price.minor_units(), "price")?)
        .bind(to_db_i32(event.total_tickets, "total_tickets")?)
        .bind(event.is_cancelled)
        .bind(to_db_i64(next.value(), "version")?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if updated == 0 {
            let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM events WHERE id = $1")
                .bind(*event.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.rollback().await.map_err(db_err)?;
            return match current {
                None => Err(StoreError::NotFound(event.id)),
                Some((actual,)) => Err(StoreError::ConcurrencyConflict {
                    event_id: event.id,
                    expected,
                    actual: Version::new(rows::from_db_u64(actual, "version")?),
                }),
            };
        }

        // Join order, so a closed claim is written before the buyer's next one.
        for entry in &ledger.entries {
            Self::write_entry(&mut tx, entry).await?;
        }
        for ticket in &ledger.tickets {
            Self::write_ticket(&mut tx, ticket).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(next)
    }
}

impl TicketStore for PostgresTicketStore {
    fn insert_event(&self, ledger: EventLedger) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let event = &ledger.event;
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query(
                r"
                INSERT INTO events (
                    id, owner_id, name, description, location, event_date,
                    price_minor, total_tickets, is_cancelled, created_at, version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(*event.id.as_uuid())
            .bind(event.owner.as_str())
            .bind(&event.name)
            .bind(&event.description)
            .bind(&event.location)
            .bind(event.event_date)
            .bind(to_db_i64(event.price.minor_units(), "price")?)
            .bind(to_db_i32(event.total_tickets, "total_tickets")?)
            .bind(event.is_cancelled)
            .bind(event.created_at)
            .bind(to_db_i64(ledger.version.value(), "version")?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            for entry in &ledger.entries {
                Self::write_entry(&mut tx, entry).await?;
            }
            for ticket in &ledger.tickets {
                Self::write_ticket(&mut tx, ticket).await?;
            }
            tx.commit().await.map_err(db_err)?;

            tracing::debug!(event_id = %event.id, "Event row inserted");
            Ok(())
        })
    }

    fn load_ledger(&self, event_id: EventId) -> StoreFuture<'_, Option<EventLedger>> {
        Box::pin(self.snapshot(event_id))
    }

    fn save_ledger<'a>(
        &'a self,
        ledger: &'a EventLedger,
        expected: Version,
    ) -> StoreFuture<'a, Version> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.compare_and_swap(ledger, expected).await;
            let outcome = match &result {
                Ok(_) => "committed",
                Err(StoreError::ConcurrencyConflict { .. }) => "conflict",
                Err(_) => "error",
            };
            metrics::histogram!("ticket_queue_store_save_seconds", "outcome" => outcome)
                .record(started.elapsed().as_secs_f64());
            if let Err(err) = &result {
                tracing::debug!(event_id = %ledger.event.id, %expected, error = %err, "Ledger save rejected");
            }
            result
        })
    }

    fn list_events(&self) -> StoreFuture<'_, Vec<Event>> {
        Box::pin(async move {
            let query = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY event_date");
            sqlx::query(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
                .iter()
                .map(|row| event_from_row(row).map(|r| r.event))
                .collect()
        })
    }

    fn events_by_owner(&self, owner: UserId) -> StoreFuture<'_, Vec<EventLedger>> {
        Box::pin(async move {
            let ids: Vec<(uuid::Uuid,)> =
                sqlx::query_as("SELECT id FROM events WHERE owner_id = $1 ORDER BY event_date")
                    .bind(owner.as_str())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?;

            let mut ledgers = Vec::with_capacity(ids.len());
            for (id,) in ids {
                if let Some(ledger) = self.snapshot(EventId::from_uuid(id)).await? {
                    ledgers.push(ledger);
                }
            }
            Ok(ledgers)
        })
    }

    fn events_with_offers_due(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            let ids: Vec<(uuid::Uuid,)> = sqlx::query_as(
                r"
                SELECT DISTINCT event_id
                FROM waiting_list
                WHERE status = 'offered' AND offer_expires_at <= $1
                ",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(ids.into_iter().map(|(id,)| EventId::from_uuid(id)).collect())
        })
    }

    fn tickets_for_buyer(&self, buyer: UserId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE buyer_id = $1 ORDER BY purchased_at DESC"
            );
            sqlx::query(&query)
                .bind(buyer.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
                .iter()
                .map(ticket_from_row)
                .collect()
        })
    }

    fn find_ticket(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let query = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
            sqlx::query(&query)
                .bind(*ticket_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .as_ref()
                .map(ticket_from_row)
                .transpose()
        })
    }

    fn payment_account(&self, owner: UserId) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let account: Option<(String,)> =
                sqlx::query_as("SELECT account_id FROM seller_accounts WHERE owner_id = $1")
                    .bind(owner.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
            Ok(account.map(|(id,)| id))
        })
    }

    fn set_payment_account(&self, owner: UserId, account_id: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO seller_accounts (owner_id, account_id, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (owner_id) DO UPDATE
                SET account_id = EXCLUDED.account_id, updated_at = now()
                ",
            )
            .bind(owner.as_str())
            .bind(&account_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            tracing::info!(owner = %owner, "Seller payment account registered");
            Ok(())
        })
    }
}
