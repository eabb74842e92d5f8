//! Path reservations.
//!
//! Every resource reserves its path, either alone (`single`) or together with
//! everything below it (`tree`). Administrative writes ask [`may_create`]
//! before touching the handler table; request handling never looks here.

use crate::content_type::OwnerRef;
use crate::naming::{ancestors, canonical_path, is_descendant};
use crate::store::StoreError;
use rusqlite::{Connection, params};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReservationError {
    #[error("There already exists a resource with the path of: {0}")]
    Taken(String),
    #[error("All paths starting with {0} are reserved.")]
    TreeReserved(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reservation {
    #[default]
    Single,
    Tree,
}

impl Reservation {
    pub fn as_str(self) -> &'static str {
        match self {
            Reservation::Single => "single",
            Reservation::Tree => "tree",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "single" => Ok(Reservation::Single),
            "tree" => Ok(Reservation::Tree),
            other => Err(StoreError::Invalid(format!("unknown reservation '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReservedPath {
    pub path: String,
    pub reservation: Reservation,
    pub owner: OwnerRef,
}

fn all_reservations(conn: &Connection) -> Result<Vec<ReservedPath>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT path, reservation, owner_type_id, owner_id FROM reserved_path ORDER BY path",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(path, reservation, type_id, id)| {
            Ok(ReservedPath {
                path,
                reservation: Reservation::parse(&reservation)?,
                owner: OwnerRef::new(type_id, id),
            })
        })
        .collect()
}

/// Every reservation, ordered by path.
pub fn reservations(conn: &Connection) -> Result<Vec<ReservedPath>, StoreError> {
    all_reservations(conn)
}

fn reservation_at(
    conn: &Connection,
    path: &str,
    except: Option<OwnerRef>,
) -> Result<Option<ReservedPath>, StoreError> {
    Ok(all_reservations(conn)?
        .into_iter()
        .find(|r| r.path == path && Some(r.owner) != except))
}

/// Check that `path` may be reserved as `reservation`.
///
/// `except` names the entity being saved, whose own reservation never
/// conflicts with itself.
pub fn may_create(
    conn: &Connection,
    path: &str,
    reservation: Reservation,
    except: Option<OwnerRef>,
) -> Result<(), ReservationError> {
    let path = canonical_path(path);
    if reservation_at(conn, &path, except)?.is_some() {
        return Err(ReservationError::Taken(path));
    }

    let others: Vec<ReservedPath> = all_reservations(conn)?
        .into_iter()
        .filter(|r| Some(r.owner) != except)
        .collect();

    let above = ancestors(&path);
    if let Some(tree) = others
        .iter()
        .find(|r| r.reservation == Reservation::Tree && above.contains(&r.path))
    {
        return Err(ReservationError::TreeReserved(tree.path.clone()));
    }

    if reservation == Reservation::Tree
        && let Some(below) = others.iter().find(|r| is_descendant(&r.path, &path))
    {
        return Err(ReservationError::Taken(below.path.clone()));
    }
    Ok(())
}

/// Record `owner`'s reservation, replacing whatever it held before.
pub fn reserve(
    conn: &Connection,
    path: &str,
    reservation: Reservation,
    owner: OwnerRef,
) -> Result<(), ReservationError> {
    release(conn, owner)?;
    let path = canonical_path(path);
    conn.execute(
        "INSERT INTO reserved_path (path, reservation, owner_type_id, owner_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![path, reservation.as_str(), owner.type_id, owner.id],
    )
    .map_err(|e| match StoreError::from(e) {
        StoreError::Conflict(_) => ReservationError::Taken(path.clone()),
        other => other.into(),
    })?;
    Ok(())
}

/// Drop every reservation held by `owner`.
pub fn release(conn: &Connection, owner: OwnerRef) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM reserved_path WHERE owner_type_id = ?1 AND owner_id = ?2",
        params![owner.type_id, owner.id],
    )?)
}

pub fn reservations_of(conn: &Connection, owner: OwnerRef) -> Result<Vec<ReservedPath>, StoreError> {
    Ok(all_reservations(conn)?
        .into_iter()
        .filter(|r| r.owner == owner)
        .collect())
}
