//! Row decoding and integer conversions between domain and SQL types.

use sqlx::Row;
use sqlx::postgres::PgRow;
use ticket_queue_core::{
    EntryId, EntryStatus, Event, EventId, Money, StoreError, Ticket, TicketId, TicketStatus, UserId,
    Version, WaitingListEntry,
};
use uuid::Uuid;

/// An event row together with its ledger version
pub(crate) struct EventRow {
    pub event: Event,
    pub version: Version,
}

/// Map a driver error, keeping unique violations distinguishable.
pub(crate) fn db_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(db.message().to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

pub(crate) fn to_db_i64(value: u64, column: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{column} out of range: {value}")))
}

pub(crate) fn to_db_i32(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("{column} out of range: {value}")))
}

pub(crate) fn from_db_u64(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Serialization(format!("negative {column}: {value}")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("column {column}: {e}")))
}

pub(crate) fn event_from_row(row: &PgRow) -> Result<EventRow, StoreError> {
    let total: i32 = get(row, "total_tickets")?;
    let event = Event {
        id: EventId::from_uuid(get::<Uuid>(row, "id")?),
        owner: UserId::new(get::<String>(row, "owner_id")?),
        name: get(row, "name")?,
        description: get(row, "description")?,
        location: get(row, "location")?,
        event_date: get(row, "event_date")?,
        price: Money::from_minor(from_db_u64(get(row, "price_minor")?, "price_minor")?),
        total_tickets: u32::try_from(total)
            .map_err(|_| StoreError::Serialization(format!("negative total_tickets: {total}")))?,
        is_cancelled: get(row, "is_cancelled")?,
        created_at: get(row, "created_at")?,
    };
    let version = Version::new(from_db_u64(get(row, "version")?, "version")?);
    Ok(EventRow { event, version })
}

pub(crate) fn entry_from_row(row: &PgRow) -> Result<WaitingListEntry, StoreError> {
    let status: String = get(row, "status")?;
    Ok(WaitingListEntry {
        id: EntryId::from_uuid(get::<Uuid>(row, "id")?),
        event_id: EventId::from_uuid(get::<Uuid>(row, "event_id")?),
        buyer: UserId::new(get::<String>(row, "buyer_id")?),
        status: status.parse::<EntryStatus>().map_err(StoreError::Serialization)?,
        offer_expires_at: get(row, "offer_expires_at")?,
        created_at: get(row, "created_at")?,
        sequence: from_db_u64(get(row, "sequence")?, "sequence")?,
        closed_at: get(row, "closed_at")?,
    })
}

pub(crate) fn ticket_from_row(row: &PgRow) -> Result<Ticket, StoreError> {
    let status: String = get(row, "status")?;
    Ok(Ticket {
        id: TicketId::from_uuid(get::<Uuid>(row, "id")?),
        event_id: EventId::from_uuid(get::<Uuid>(row, "event_id")?),
        entry_id: EntryId::from_uuid(get::<Uuid>(row, "entry_id")?),
        buyer: UserId::new(get::<String>(row, "buyer_id")?),
        status: status.parse::<TicketStatus>().map_err(StoreError::Serialization)?,
        amount: Money::from_minor(from_db_u64(get(row, "amount_minor")?, "amount_minor")?),
        payment_reference: get(row, "payment_reference")?,
        purchased_at: get(row, "purchased_at")?,
    })
}
