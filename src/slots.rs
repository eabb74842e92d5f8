//! Content slots: ordered, keyed, typed attachments from any owner to a payload.
//!
//! Slots reference owners polymorphically through [`OwnerRef`] and store
//! their payload as externally tagged JSON of [`Payload`]. Payloads that
//! point at another row (copy, menu, arrangement, page, file, image) also
//! record that row in `ref_id` so deleting the target can cascade.
//!
//! Ordering is `ord` ascending, ties broken by slot id. Keys are not unique
//! per owner; several slots under one key is how list cardinality is stored.
//! A slot saved with an empty key gets its own id as key.

use crate::content_type::{self, OwnerRef, class};
use crate::entities;
use crate::imaging::CropBox;
use crate::media::{MediaError, find_image_type};
use crate::menu;
use crate::resource_type::{self, ResourceTypeId};
use crate::site::Site;
use crate::store::StoreError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Every slot kind, one per [`Payload`] constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Copy,
    Menu,
    Arrangement,
    Page,
    File,
    Image,
    Date,
    DateTime,
    Time,
    Instant,
    Period,
    Integer,
    Enum,
}

impl SlotKind {
    pub const ALL: [SlotKind; 13] = [
        SlotKind::Copy,
        SlotKind::Menu,
        SlotKind::Arrangement,
        SlotKind::Page,
        SlotKind::File,
        SlotKind::Image,
        SlotKind::Date,
        SlotKind::DateTime,
        SlotKind::Time,
        SlotKind::Instant,
        SlotKind::Period,
        SlotKind::Integer,
        SlotKind::Enum,
    ];

    /// Stored name, also the default atom name.
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Copy => "copy",
            SlotKind::Menu => "menu",
            SlotKind::Arrangement => "arrangement",
            SlotKind::Page => "page",
            SlotKind::File => "file",
            SlotKind::Image => "image",
            SlotKind::Date => "date",
            SlotKind::DateTime => "datetime",
            SlotKind::Time => "time",
            SlotKind::Instant => "instant",
            SlotKind::Period => "period",
            SlotKind::Integer => "integer",
            SlotKind::Enum => "enum",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Class content type of the payload this kind carries.
    pub fn payload_class(self) -> &'static str {
        match self {
            SlotKind::Copy => class::COPY,
            SlotKind::Menu => class::MENU,
            SlotKind::Arrangement => class::ARRANGEMENT,
            SlotKind::Page => class::PAGE,
            SlotKind::File => class::FILE,
            SlotKind::Image => class::IMAGE,
            SlotKind::Date => class::DATE,
            SlotKind::DateTime => class::DATETIME,
            SlotKind::Time => class::TIME,
            SlotKind::Instant => class::INSTANT,
            SlotKind::Period => class::PERIOD,
            SlotKind::Integer => class::INTEGER,
            SlotKind::Enum => class::ENUM,
        }
    }
}

/// A slot's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Inline text; when empty, the referenced copy record supplies the body.
    Copy {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        copy_id: Option<i64>,
    },
    Menu(i64),
    Arrangement(i64),
    Page(i64),
    File(i64),
    Image {
        image_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_type_id: Option<i64>,
        /// Per variant key crop chosen by an editor for this slot only.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        user_variant_crop: BTreeMap<String, CropBox>,
    },
    Date(NaiveDate),
    #[serde(rename = "datetime")]
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Instant(DateTime<Utc>),
    Period {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Integer(i64),
    Enum {
        value: String,
        #[serde(default)]
        title: String,
    },
}

impl Payload {
    pub fn copy(text: &str) -> Self {
        Payload::Copy {
            text: text.to_string(),
            copy_id: None,
        }
    }

    pub fn image(image_id: i64, image_type_id: Option<i64>) -> Self {
        Payload::Image {
            image_id,
            image_type_id,
            user_variant_crop: BTreeMap::new(),
        }
    }

    pub fn enumeration(value: &str, title: &str) -> Self {
        Payload::Enum {
            value: value.to_string(),
            title: title.to_string(),
        }
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Payload::Copy { .. } => SlotKind::Copy,
            Payload::Menu(_) => SlotKind::Menu,
            Payload::Arrangement(_) => SlotKind::Arrangement,
            Payload::Page(_) => SlotKind::Page,
            Payload::File(_) => SlotKind::File,
            Payload::Image { .. } => SlotKind::Image,
            Payload::Date(_) => SlotKind::Date,
            Payload::DateTime(_) => SlotKind::DateTime,
            Payload::Time(_) => SlotKind::Time,
            Payload::Instant(_) => SlotKind::Instant,
            Payload::Period { .. } => SlotKind::Period,
            Payload::Integer(_) => SlotKind::Integer,
            Payload::Enum { .. } => SlotKind::Enum,
        }
    }

    /// Row this payload points at, if any.
    pub fn ref_id(&self) -> Option<i64> {
        match self {
            Payload::Copy { copy_id, .. } => *copy_id,
            Payload::Menu(id)
            | Payload::Arrangement(id)
            | Payload::Page(id)
            | Payload::File(id) => Some(*id),
            Payload::Image { image_id, .. } => Some(*image_id),
            _ => None,
        }
    }

    /// Whether the payload carries no content at all.
    pub fn is_blank(&self) -> bool {
        match self {
            Payload::Copy { text, copy_id } => text.trim().is_empty() && copy_id.is_none(),
            Payload::Enum { value, .. } => value.trim().is_empty(),
            _ => false,
        }
    }

    pub fn check(&self) -> Result<(), StoreError> {
        if let Payload::Period { start, end } = self
            && end < start
        {
            return Err(StoreError::Invalid(format!(
                "period ends ({end}) before it starts ({start})"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub id: i64,
    pub owner: OwnerRef,
    pub order: i64,
    pub key: String,
    pub payload: Payload,
}

impl Slot {
    pub fn kind(&self) -> SlotKind {
        self.payload.kind()
    }
}

const SLOT_COLUMNS: &str = "id, owner_type_id, owner_id, ord, key, payload FROM content_slot";

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<(i64, i64, i64, i64, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_slot(raw: (i64, i64, i64, i64, String, String)) -> Result<Slot, StoreError> {
    let (id, owner_type_id, owner_id, order, key, payload) = raw;
    Ok(Slot {
        id,
        owner: OwnerRef::new(owner_type_id, owner_id),
        order,
        key,
        payload: serde_json::from_str(&payload)?,
    })
}

fn query_slots(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Slot>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {SLOT_COLUMNS} WHERE {filter} ORDER BY ord, id"))?;
    let raws = stmt
        .query_map(args, row_to_raw)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(into_slot).collect()
}

/// Insert a slot. An empty key is replaced by the new slot's id.
pub fn add_slot(
    conn: &Connection,
    owner: OwnerRef,
    order: i64,
    key: &str,
    payload: &Payload,
) -> Result<Slot, StoreError> {
    payload.check()?;
    conn.execute(
        "INSERT INTO content_slot (kind, owner_type_id, owner_id, ord, key, ref_id, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            payload.kind().as_str(),
            owner.type_id,
            owner.id,
            order,
            key.trim(),
            payload.ref_id(),
            serde_json::to_string(payload)?,
        ],
    )?;
    let id = conn.last_insert_rowid();
    if key.trim().is_empty() {
        conn.execute(
            "UPDATE content_slot SET key = ?2 WHERE id = ?1",
            params![id, id.to_string()],
        )?;
    }
    load_slot(conn, id)
}

/// Rewrite order, key and payload of an existing slot. The kind may not change.
pub fn update_slot(
    conn: &Connection,
    id: i64,
    order: i64,
    key: &str,
    payload: &Payload,
) -> Result<Slot, StoreError> {
    payload.check()?;
    let existing = load_slot(conn, id)?;
    if existing.kind() != payload.kind() {
        return Err(StoreError::Invalid(format!(
            "slot {id} holds {} and cannot hold {}",
            existing.kind().as_str(),
            payload.kind().as_str()
        )));
    }
    let key = if key.trim().is_empty() {
        id.to_string()
    } else {
        key.trim().to_string()
    };
    conn.execute(
        "UPDATE content_slot SET ord = ?2, key = ?3, ref_id = ?4, payload = ?5 WHERE id = ?1",
        params![
            id,
            order,
            key,
            payload.ref_id(),
            serde_json::to_string(payload)?
        ],
    )?;
    load_slot(conn, id)
}

pub fn load_slot(conn: &Connection, id: i64) -> Result<Slot, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {SLOT_COLUMNS} WHERE id = ?1"),
            params![id],
            row_to_raw,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("slot", id))?;
    into_slot(raw)
}

/// Delete one slot, returning it so callers can clean up derived files.
pub fn delete_slot(conn: &Connection, id: i64) -> Result<Slot, StoreError> {
    let slot = load_slot(conn, id)?;
    conn.execute("DELETE FROM content_slot WHERE id = ?1", params![id])?;
    Ok(slot)
}

/// Slots of `owner` of one kind, optionally restricted to `key`, in slot order.
pub fn slots_for(
    conn: &Connection,
    owner: OwnerRef,
    kind: SlotKind,
    key: Option<&str>,
) -> Result<Vec<Slot>, StoreError> {
    match key {
        Some(key) => query_slots(
            conn,
            "owner_type_id = ?1 AND owner_id = ?2 AND kind = ?3 AND key = ?4",
            &[&owner.type_id, &owner.id, &kind.as_str(), &key],
        ),
        None => query_slots(
            conn,
            "owner_type_id = ?1 AND owner_id = ?2 AND kind = ?3",
            &[&owner.type_id, &owner.id, &kind.as_str()],
        ),
    }
}

/// Every slot of `owner`, all kinds.
pub fn slots_of_owner(conn: &Connection, owner: OwnerRef) -> Result<Vec<Slot>, StoreError> {
    query_slots(
        conn,
        "owner_type_id = ?1 AND owner_id = ?2",
        &[&owner.type_id, &owner.id],
    )
}

/// Every slot of a kind under `key`, across owners.
pub fn slots_with_key(
    conn: &Connection,
    kind: SlotKind,
    key: &str,
) -> Result<Vec<Slot>, StoreError> {
    query_slots(conn, "kind = ?1 AND key = ?2", &[&kind.as_str(), &key])
}

/// Delete every slot owned by `owner`; returns what was deleted.
pub fn delete_slots_for_owner(conn: &Connection, owner: OwnerRef) -> Result<Vec<Slot>, StoreError> {
    let slots = slots_of_owner(conn, owner)?;
    conn.execute(
        "DELETE FROM content_slot WHERE owner_type_id = ?1 AND owner_id = ?2",
        params![owner.type_id, owner.id],
    )?;
    Ok(slots)
}

/// Every slot of `kind` pointing at row `ref_id`.
pub fn slots_referencing(
    conn: &Connection,
    kind: SlotKind,
    ref_id: i64,
) -> Result<Vec<Slot>, StoreError> {
    query_slots(
        conn,
        "kind = ?1 AND ref_id = ?2",
        &[&kind.as_str(), &ref_id],
    )
}

/// Delete every slot of `kind` pointing at row `ref_id`; returns what was deleted.
pub fn delete_slots_referencing(
    conn: &Connection,
    kind: SlotKind,
    ref_id: i64,
) -> Result<Vec<Slot>, StoreError> {
    let slots = query_slots(
        conn,
        "kind = ?1 AND ref_id = ?2",
        &[&kind.as_str(), &ref_id],
    )?;
    conn.execute(
        "DELETE FROM content_slot WHERE kind = ?1 AND ref_id = ?2",
        params![kind.as_str(), ref_id],
    )?;
    Ok(slots)
}

// =============================================================================
// Validated slot writes
// =============================================================================

/// Resource or arrangement type whose schema governs slots of `owner`.
fn owner_type(conn: &Connection, owner: OwnerRef) -> Result<Option<ResourceTypeId>, StoreError> {
    let sql = match content_type::title_of(conn, owner.type_id)?.as_str() {
        class::ARRANGEMENT => "SELECT arrangement_type_id FROM arrangement WHERE id = ?1",
        class::SITE => "SELECT arrangement_type_id FROM site_content WHERE id = ?1",
        class::MENU | class::COPY | class::IMAGE | class::FILE | class::LINK => return Ok(None),
        _ => "SELECT resource_type_id FROM resource WHERE id = ?1",
    };
    let found: Option<Option<ResourceTypeId>> = conn
        .query_row(sql, params![owner.id], |row| row.get(0))
        .optional()?;
    found.ok_or_else(|| StoreError::not_found("slot owner", owner.id))
}

/// Whether a member declared with `payload_type` can hold a `kind` slot.
fn member_accepts(payload_type: &str, kind: SlotKind) -> bool {
    match payload_type.split_once(':') {
        Some(("image_type", _)) => kind == SlotKind::Image,
        Some(("arrangement_type", _)) => kind == SlotKind::Arrangement,
        Some(("resource_type", _)) => kind == SlotKind::Page,
        _ if payload_type == class::RESOURCE => kind == SlotKind::Page,
        _ => payload_type == kind.payload_class(),
    }
}

impl Site {
    /// Check `payload` against the owner's schema member `key` and run its
    /// validator. An image payload without an image type takes the one the
    /// member names.
    fn prepare_payload(
        &self,
        conn: &Connection,
        owner: OwnerRef,
        key: &str,
        payload: &mut Payload,
    ) -> Result<(), StoreError> {
        payload.check()?;
        let Some(type_id) = owner_type(conn, owner)? else {
            return Ok(());
        };
        let schema_id = resource_type::load_type(conn, type_id)?.schema_id;
        let snapshot = resource_type::build_snapshot(conn, schema_id)?;
        let Some(member) = snapshot.get(key.trim()) else {
            return Ok(());
        };
        if !member_accepts(&member.payload_type_title, payload.kind()) {
            return Err(StoreError::Invalid(format!(
                "{key}: expects {}, got {}",
                member.payload_type_title,
                payload.kind().as_str()
            )));
        }
        if let Some(title) = &member.validator {
            let validator = self
                .functions
                .validator(title)
                .ok_or_else(|| StoreError::Invalid(format!("{key}: unknown validator '{title}'")))?;
            validator(payload).map_err(|message| StoreError::Invalid(format!("{key}: {message}")))?;
        }
        if let Payload::Image { image_type_id, .. } = payload
            && image_type_id.is_none()
            && let Some(("image_type", type_key)) = member.payload_type_title.split_once(':')
        {
            *image_type_id = find_image_type(conn, type_key)?.map(|t| t.id);
        }
        Ok(())
    }

    /// Attach a payload to `owner`. Image slots get their eager variants
    /// rendered before this returns.
    pub fn add_slot(
        &self,
        owner: OwnerRef,
        order: i64,
        key: &str,
        mut payload: Payload,
    ) -> Result<Slot, MediaError> {
        let slot = self.store.write(|tx| {
            self.prepare_payload(tx, owner, key, &mut payload)?;
            add_slot(tx, owner, order, key, &payload)
        })?;
        debug!(slot = slot.id, kind = slot.kind().as_str(), key = %slot.key, "added slot");
        self.generate_slot_variants(&slot)?;
        Ok(slot)
    }

    pub fn update_slot(
        &self,
        id: i64,
        order: i64,
        key: &str,
        mut payload: Payload,
    ) -> Result<Slot, MediaError> {
        let (old, slot) = self.store.write(|tx| {
            let old = load_slot(tx, id)?;
            self.prepare_payload(tx, old.owner, key, &mut payload)?;
            let slot = update_slot(tx, id, order, key, &payload)?;
            Ok((old, slot))
        })?;
        if old.payload != slot.payload {
            self.discard_slot_files(std::slice::from_ref(&old));
        }
        self.generate_slot_variants(&slot)?;
        Ok(slot)
    }

    /// Delete a slot and any variant files it caused.
    pub fn delete_slot(&self, id: i64) -> Result<Slot, MediaError> {
        let slot = self.store.read(|conn| load_slot(conn, id))?;
        self.discard_slot_files(std::slice::from_ref(&slot));
        self.store.write(|tx| delete_slot(tx, id))?;
        debug!(slot = id, "deleted slot");
        Ok(slot)
    }

    /// Point an image slot at another image. Stored crops are dropped since
    /// their coordinates belonged to the old image.
    pub fn replace_slot_image(&self, slot_id: i64, image_id: i64) -> Result<Slot, MediaError> {
        let old = self.store.read(|conn| load_slot(conn, slot_id))?;
        let Payload::Image { image_type_id, .. } = &old.payload else {
            return Err(StoreError::Invalid(format!("slot {slot_id} holds no image")).into());
        };
        let payload = Payload::image(image_id, *image_type_id);
        self.discard_slot_files(std::slice::from_ref(&old));
        let slot = self
            .store
            .write(|tx| update_slot(tx, slot_id, old.order, &old.key, &payload))?;
        self.generate_slot_variants(&slot)?;
        Ok(slot)
    }

    /// Store or clear the editor's crop for variant `key` of an image slot.
    pub fn set_slot_crop(
        &self,
        slot_id: i64,
        key: &str,
        crop: Option<CropBox>,
    ) -> Result<Slot, MediaError> {
        let old = self.store.read(|conn| load_slot(conn, slot_id))?;
        let mut payload = old.payload.clone();
        let Payload::Image {
            user_variant_crop, ..
        } = &mut payload
        else {
            return Err(StoreError::Invalid(format!("slot {slot_id} holds no image")).into());
        };
        match crop {
            Some(crop) => user_variant_crop.insert(key.to_string(), crop),
            None => user_variant_crop.remove(key),
        };
        self.discard_slot_files(std::slice::from_ref(&old));
        let slot = self
            .store
            .write(|tx| update_slot(tx, slot_id, old.order, &old.key, &payload))?;
        self.generate_slot_variants(&slot)?;
        Ok(slot)
    }

    /// Delete an arrangement with its own slots and every slot embedding it.
    pub fn delete_arrangement(&self, id: i64) -> Result<(), MediaError> {
        let arrangement_class = self.classes.id(&self.store, class::ARRANGEMENT)?;
        let owner = OwnerRef::new(arrangement_class, id);
        let owned = self.store.read(|conn| slots_of_owner(conn, owner))?;
        self.discard_slot_files(&owned);
        self.store.write(|tx| {
            delete_slots_for_owner(tx, owner)?;
            delete_slots_referencing(tx, SlotKind::Arrangement, id)?;
            entities::delete_arrangement(tx, id)
        })?;
        info!(id, slots = owned.len(), "deleted arrangement");
        Ok(())
    }

    /// Delete a menu and every slot showing it. Its menu links cascade.
    pub fn delete_menu(&self, id: i64) -> Result<(), MediaError> {
        self.store.write(|tx| {
            delete_slots_referencing(tx, SlotKind::Menu, id)?;
            menu::delete_menu(tx, id)
        })?;
        info!(id, "deleted menu");
        Ok(())
    }

    /// Delete a copy record and every copy slot drawing on it.
    pub fn delete_copy(&self, id: i64) -> Result<(), MediaError> {
        self.store.write(|tx| {
            delete_slots_referencing(tx, SlotKind::Copy, id)?;
            entities::delete_copy(tx, id)
        })?;
        Ok(())
    }

    /// Delete a file record, its slots and the stored file.
    pub fn delete_file(&self, id: i64) -> Result<(), MediaError> {
        let file = self.store.write(|tx| {
            delete_slots_referencing(tx, SlotKind::File, id)?;
            entities::delete_file(tx, id)
        })?;
        let path = self.config.media.root.join(&file.path);
        if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        Ok(())
    }
}
