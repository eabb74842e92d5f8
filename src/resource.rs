//! Routable resources and their administrative lifecycle.
//!
//! Saving a resource keeps three things in step with its path: the handler
//! mapping for `(path, method)`, the path reservation, and the resource's own
//! link. All three are rewritten in the same transaction as the row.

use crate::content_type::{ContentTypeId, OwnerRef, class};
use crate::functions;
use crate::menu;
use crate::naming::canonical_path;
use crate::reservation::{self, Reservation, ReservationError, may_create, reserve};
use crate::resource_type::ResourceTypeId;
use crate::router::{self, put_mapping, remove_mappings};
use crate::site::Site;
use crate::slots::{Slot, SlotKind, delete_slots_for_owner, delete_slots_referencing};
use crate::store::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: i64,
    /// Class title (`page`, or a collaborator's class such as `blog`).
    pub class: String,
    pub content_type_id: ContentTypeId,
    pub key: Option<String>,
    pub title: String,
    pub path: String,
    pub method: String,
    pub resource_type_id: ResourceTypeId,
    pub handler: String,
    pub reservation: Reservation,
    pub link_id: Option<i64>,
    pub settings: serde_json::Value,
}

impl Resource {
    /// Reference used by this resource's slots, mapping and reservation.
    pub fn owner(&self) -> OwnerRef {
        OwnerRef::new(self.content_type_id, self.id)
    }

    pub fn setting_str(&self, name: &str) -> Option<&str> {
        self.settings.get(name).and_then(|v| v.as_str())
    }
}

/// Input for creating or updating a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub class: String,
    pub key: Option<String>,
    pub title: String,
    pub path: String,
    pub method: String,
    pub resource_type_id: ResourceTypeId,
    pub handler: String,
    pub reservation: Reservation,
    pub settings: serde_json::Value,
}

impl ResourceSpec {
    /// A `GET` page rendered through the template pipeline.
    pub fn page(title: &str, path: &str, resource_type_id: ResourceTypeId) -> Self {
        Self {
            class: class::PAGE.to_string(),
            key: None,
            title: title.to_string(),
            path: path.to_string(),
            method: "GET".to_string(),
            resource_type_id,
            handler: functions::RENDER.to_string(),
            reservation: Reservation::Single,
            settings: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = class.to_string();
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn with_handler(mut self, handler: &str) -> Self {
        self.handler = handler.to_string();
        self
    }

    pub fn with_reservation(mut self, reservation: Reservation) -> Self {
        self.reservation = reservation;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }
}

const RESOURCE_COLUMNS: &str = "r.id, r.class, ct.id, r.key, r.title, r.path, r.method,
    r.resource_type_id, r.handler, r.reservation, r.link_id, r.settings
    FROM resource r JOIN content_type ct ON ct.title = r.class";

type ResourceRow = (
    i64,
    String,
    i64,
    Option<String>,
    String,
    String,
    String,
    i64,
    String,
    String,
    Option<i64>,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResourceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn into_resource(raw: ResourceRow) -> Result<Resource, StoreError> {
    let (id, class, content_type_id, key, title, path, method, resource_type_id, handler, reservation, link_id, settings) =
        raw;
    Ok(Resource {
        id,
        class,
        content_type_id,
        key,
        title,
        path,
        method,
        resource_type_id,
        handler,
        reservation: Reservation::parse(&reservation)?,
        link_id,
        settings: serde_json::from_str(&settings)?,
    })
}

fn query_resources(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Resource>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESOURCE_COLUMNS} WHERE {filter} ORDER BY r.path, r.id"
    ))?;
    let raws = stmt
        .query_map(args, row_to_raw)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(into_resource).collect()
}

pub fn load_resource(conn: &Connection, id: i64) -> Result<Resource, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {RESOURCE_COLUMNS} WHERE r.id = ?1"),
            params![id],
            row_to_raw,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("resource", id))?;
    into_resource(raw)
}

/// Resource of `class` with sitewide `key` (`content.<class>.<key>`).
pub fn find_resource(conn: &Connection, class: &str, key: &str) -> Result<Option<Resource>, StoreError> {
    Ok(query_resources(conn, "r.class = ?1 AND r.key = ?2", &[&class, &key])?
        .into_iter()
        .next())
}

/// Resources stored at `path` (any method, any class).
pub fn resources_at(conn: &Connection, path: &str) -> Result<Vec<Resource>, StoreError> {
    query_resources(conn, "r.path = ?1", &[&canonical_path(path)])
}

pub fn all_resources(conn: &Connection) -> Result<Vec<Resource>, StoreError> {
    query_resources(conn, "1 = 1", &[])
}

/// Resources owning the given links, in the order of `link_ids`.
pub fn resources_by_link(conn: &Connection, link_ids: &[i64]) -> Result<Vec<Resource>, StoreError> {
    let mut out = Vec::new();
    for link_id in link_ids {
        out.extend(query_resources(conn, "r.link_id = ?1", &[link_id])?);
    }
    Ok(out)
}

fn path_taken(err: StoreError, path: &str) -> ReservationError {
    match err {
        StoreError::Conflict(_) => ReservationError::Taken(path.to_string()),
        other => other.into(),
    }
}

/// Insert a resource with its mapping, reservation and own link.
pub fn insert_resource(
    conn: &Connection,
    class_type_id: ContentTypeId,
    spec: &ResourceSpec,
) -> Result<Resource, ReservationError> {
    let path = canonical_path(&spec.path);
    let method = spec.method.to_ascii_uppercase();
    may_create(conn, &path, spec.reservation, None)?;

    let link = menu::create_link(conn, &spec.title, &path)?;
    conn.execute(
        "INSERT INTO resource (class, key, title, path, method, resource_type_id, handler,
                               reservation, link_id, settings)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            spec.class,
            spec.key,
            spec.title,
            path,
            method,
            spec.resource_type_id,
            spec.handler,
            spec.reservation.as_str(),
            link.id,
            spec.settings.to_string(),
        ],
    )
    .map_err(StoreError::from)?;
    let owner = OwnerRef::new(class_type_id, conn.last_insert_rowid());

    put_mapping(conn, &path, &method, &spec.handler, owner).map_err(|e| path_taken(e, &path))?;
    reserve(conn, &path, spec.reservation, owner)?;
    Ok(load_resource(conn, owner.id)?)
}

/// Rewrite a resource. A path or method change moves the mapping, the
/// reservation and the own link along with it.
pub fn rewrite_resource(conn: &Connection, id: i64, spec: &ResourceSpec) -> Result<Resource, ReservationError> {
    let existing = load_resource(conn, id)?;
    if existing.class != spec.class {
        return Err(StoreError::Invalid(format!(
            "resource {id} is a {} and cannot become a {}",
            existing.class, spec.class
        ))
        .into());
    }
    let owner = existing.owner();
    let path = canonical_path(&spec.path);
    let method = spec.method.to_ascii_uppercase();
    may_create(conn, &path, spec.reservation, Some(owner))?;

    conn.execute(
        "UPDATE resource SET key = ?2, title = ?3, path = ?4, method = ?5, resource_type_id = ?6,
                             handler = ?7, reservation = ?8, settings = ?9
         WHERE id = ?1",
        params![
            id,
            spec.key,
            spec.title,
            path,
            method,
            spec.resource_type_id,
            spec.handler,
            spec.reservation.as_str(),
            spec.settings.to_string(),
        ],
    )
    .map_err(StoreError::from)?;

    remove_mappings(conn, owner)?;
    put_mapping(conn, &path, &method, &spec.handler, owner).map_err(|e| path_taken(e, &path))?;
    reserve(conn, &path, spec.reservation, owner)?;

    match existing.link_id {
        Some(link_id) => menu::update_link(conn, link_id, &spec.title, &path)?,
        None => {
            let link = menu::create_link(conn, &spec.title, &path)?;
            conn.execute(
                "UPDATE resource SET link_id = ?2 WHERE id = ?1",
                params![id, link.id],
            )
            .map_err(StoreError::from)?;
        }
    }
    Ok(load_resource(conn, id)?)
}

/// Delete a resource and everything hanging off it. Returns the removed
/// slots (its own and page slots pointing at it) for file cleanup.
pub fn remove_resource(conn: &Connection, id: i64) -> Result<Vec<Slot>, StoreError> {
    let resource = load_resource(conn, id)?;
    let owner = resource.owner();
    remove_mappings(conn, owner)?;
    reservation::release(conn, owner)?;
    let mut slots = delete_slots_for_owner(conn, owner)?;
    slots.extend(delete_slots_referencing(conn, SlotKind::Page, id)?);
    conn.execute("DELETE FROM resource WHERE id = ?1", params![id])?;
    if let Some(link_id) = resource.link_id {
        menu::delete_link(conn, link_id)?;
    }
    Ok(slots)
}

impl Site {
    pub fn create_resource(&self, spec: &ResourceSpec) -> Result<Resource, ReservationError> {
        self.check_handler(&spec.handler)?;
        let class_type_id = self.classes.id(&self.store, &spec.class)?;
        let resource = self
            .store
            .transact(|tx| insert_resource(tx, class_type_id, spec))?;
        info!(id = resource.id, path = %resource.path, method = %resource.method, "created resource");
        Ok(resource)
    }

    pub fn update_resource(&self, id: i64, spec: &ResourceSpec) -> Result<Resource, ReservationError> {
        self.check_handler(&spec.handler)?;
        let resource = self.store.transact(|tx| rewrite_resource(tx, id, spec))?;
        info!(id, path = %resource.path, method = %resource.method, "updated resource");
        Ok(resource)
    }

    pub fn delete_resource(&self, id: i64) -> Result<(), ReservationError> {
        let slots = self.store.write(|tx| remove_resource(tx, id))?;
        self.discard_slot_files(&slots);
        info!(id, slots = slots.len(), "deleted resource");
        Ok(())
    }

    fn check_handler(&self, title: &str) -> Result<(), StoreError> {
        if self.functions.handler(title).is_none() {
            return Err(StoreError::Invalid(format!("no handler registered as '{title}'")));
        }
        Ok(())
    }
}

/// Number of handler mappings for `(path, method)`.
pub fn mapping_count(conn: &Connection, path: &str, method: &str) -> Result<usize, StoreError> {
    Ok(router::all_mappings(conn)?
        .iter()
        .filter(|m| m.path == canonical_path(path) && m.method.eq_ignore_ascii_case(method))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::get_or_create;
    use crate::reservation::reservations_of;
    use crate::resource_type::{TypeSpec, save_type};
    use crate::store::Store;

    fn setup() -> (Store, ContentTypeId, ResourceTypeId) {
        let store = Store::open_in_memory().unwrap();
        let (page, ty) = store
            .write(|tx| Ok((get_or_create(tx, class::PAGE, false)?, save_type(tx, &TypeSpec::resource("default"))?.id)))
            .unwrap();
        (store, page, ty)
    }

    fn create(store: &Store, class_id: ContentTypeId, spec: &ResourceSpec) -> Result<Resource, ReservationError> {
        store.transact(|tx| insert_resource(tx, class_id, spec))
    }

    #[test]
    fn create_writes_mapping_reservation_and_link() {
        let (store, page, ty) = setup();
        let r = create(&store, page, &ResourceSpec::page("Eagles", "/Eagles/", ty)).unwrap();
        assert_eq!(r.path, "/eagles");
        assert_eq!(store.read(|c| mapping_count(c, "/eagles", "GET")).unwrap(), 1);
        let held = store.read(|c| reservations_of(c, r.owner())).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].reservation, Reservation::Single);
        let link = store.read(|c| menu::load_link(c, r.link_id.unwrap())).unwrap();
        assert_eq!(link.url, "/eagles");
    }

    #[test]
    fn duplicate_path_reports_existing_resource() {
        let (store, page, ty) = setup();
        create(&store, page, &ResourceSpec::page("A", "/a", ty)).unwrap();
        let err = create(&store, page, &ResourceSpec::page("B", "/A", ty)).unwrap_err();
        assert_eq!(err.to_string(), "There already exists a resource with the path of: /a");
    }

    #[test]
    fn move_rewrites_everything() {
        let (store, page, ty) = setup();
        let r = create(&store, page, &ResourceSpec::page("P", "/p", ty)).unwrap();
        let moved = store
            .transact(|tx| rewrite_resource(tx, r.id, &ResourceSpec::page("Q", "/q", ty)))
            .unwrap();
        assert_eq!(store.read(|c| mapping_count(c, "/p", "GET")).unwrap(), 0);
        assert_eq!(store.read(|c| mapping_count(c, "/q", "GET")).unwrap(), 1);
        let held = store.read(|c| reservations_of(c, moved.owner())).unwrap();
        assert_eq!(held[0].path, "/q");
        let link = store.read(|c| menu::load_link(c, moved.link_id.unwrap())).unwrap();
        assert_eq!((link.title.as_str(), link.url.as_str()), ("Q", "/q"));
    }

    #[test]
    fn failed_move_rolls_back() {
        let (store, page, ty) = setup();
        create(&store, page, &ResourceSpec::page("T", "/taken", ty)).unwrap();
        let r = create(&store, page, &ResourceSpec::page("P", "/p", ty)).unwrap();
        assert!(
            store
                .transact(|tx| rewrite_resource(tx, r.id, &ResourceSpec::page("P", "/taken", ty)))
                .is_err()
        );
        assert_eq!(store.read(|c| load_resource(c, r.id)).unwrap().path, "/p");
        assert_eq!(store.read(|c| mapping_count(c, "/p", "GET")).unwrap(), 1);
    }

    #[test]
    fn remove_clears_mapping_reservation_and_link() {
        let (store, page, ty) = setup();
        let r = create(&store, page, &ResourceSpec::page("P", "/p", ty)).unwrap();
        store.write(|tx| remove_resource(tx, r.id)).unwrap();
        assert_eq!(store.read(|c| mapping_count(c, "/p", "GET")).unwrap(), 0);
        assert!(store.read(|c| reservations_of(c, r.owner())).unwrap().is_empty());
        assert!(store.read(|c| menu::load_link(c, r.link_id.unwrap())).is_err());
    }

    #[test]
    fn menu_resolves_to_resources() {
        let (store, page, ty) = setup();
        let a = create(&store, page, &ResourceSpec::page("A", "/a", ty)).unwrap();
        let b = create(&store, page, &ResourceSpec::page("B", "/b", ty)).unwrap();
        let found = store
            .write(|tx| {
                let m = menu::create_menu(tx, "main", "Main")?;
                menu::add_link(tx, m.id, b.link_id.unwrap(), 0)?;
                menu::add_link(tx, m.id, a.link_id.unwrap(), 1)?;
                menu::menu_resources(tx, m.id)
            })
            .unwrap();
        let paths: Vec<_> = found.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/b", "/a"]);
    }

    #[test]
    fn settings_are_read_back() {
        let (store, page, ty) = setup();
        let spec = ResourceSpec::page("Form", "/form", ty)
            .with_method("post")
            .with_settings(serde_json::json!({ "redirect": "/thanks" }));
        let r = create(&store, page, &spec).unwrap();
        assert_eq!(r.method, "POST");
        assert_eq!(r.setting_str("redirect"), Some("/thanks"));
        assert_eq!(r.setting_str("missing"), None);
    }
}
