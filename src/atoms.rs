//! Template-facing views of entities and their slots.
//!
//! `page.copy.lead` resolves in two steps: the entity hands out a
//! [`SlotAccessor`] for the atom name `copy`, and the accessor looks up the
//! slots under key `lead`, returning one payload or a list depending on the
//! cardinality the owner's schema declares for `lead`. Keys the schema does
//! not declare behave as lists.
//!
//! Atom names are the slot kind names plus the key of every image type; the
//! latter select only image slots of that type.

use crate::content_type::{OwnerRef, class, image_type_title};
use crate::entities::{self, Arrangement, CopyRecord, SiteContent};
use crate::media::{SlotImage, cached_image_type, load_image};
use crate::menu::{self, Menu};
use crate::resource::{self, Resource};
use crate::resource_type::{Cardinality, ResourceTypeId, cached_type, get_interface};
use crate::site::Env;
use crate::slots::{Payload, Slot, SlotKind, slots_for, slots_with_key};
use crate::store::StoreError;
use crate::templates::TemplateError;
use crate::templates::value::{Object, Value};
use crate::types::Request;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

/// What an atom name selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    Slot(SlotKind),
    /// Image slots whose image type has this id.
    ImageType(i64),
}

/// `Ok(None)` for rows that vanished since the slot was read.
fn found<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A slot owner: resource, arrangement or site content.
#[derive(Debug, Clone)]
pub struct Entity {
    pub owner: OwnerRef,
    pub class: String,
    pub type_id: Option<ResourceTypeId>,
    pub key: Option<String>,
    pub title: String,
    pub fields: BTreeMap<String, Value>,
    payload_types: Vec<String>,
}

impl Entity {
    pub fn resource(env: &Env<'_>, resource: &Resource) -> Result<Self, StoreError> {
        let ty = cached_type(&env.site.store, env.cache, resource.resource_type_id)?;
        let fields = BTreeMap::from([
            ("path".to_string(), Value::from(resource.path.as_str())),
            ("url".to_string(), Value::from(resource.path.as_str())),
            ("method".to_string(), Value::from(resource.method.as_str())),
            ("type".to_string(), Value::from(ty.key.as_str())),
        ]);
        Ok(Self {
            owner: resource.owner(),
            class: resource.class.clone(),
            type_id: Some(resource.resource_type_id),
            key: resource.key.clone(),
            title: resource.title.clone(),
            fields,
            payload_types: vec![
                ty.content_type_title(),
                resource.class.clone(),
                class::RESOURCE.to_string(),
            ],
        })
    }

    pub fn arrangement(env: &Env<'_>, arrangement: &Arrangement) -> Result<Self, StoreError> {
        let ty = cached_type(&env.site.store, env.cache, arrangement.arrangement_type_id)?;
        let class_id = env.site.classes.id(&env.site.store, class::ARRANGEMENT)?;
        Ok(Self {
            owner: OwnerRef::new(class_id, arrangement.id),
            class: class::ARRANGEMENT.to_string(),
            type_id: Some(arrangement.arrangement_type_id),
            key: arrangement.key.clone(),
            title: arrangement.title.clone(),
            fields: BTreeMap::from([("type".to_string(), Value::from(ty.key.as_str()))]),
            payload_types: vec![ty.content_type_title(), class::ARRANGEMENT.to_string()],
        })
    }

    pub fn site_content(env: &Env<'_>, content: &SiteContent) -> Result<Self, StoreError> {
        let class_id = env.site.classes.id(&env.site.store, class::SITE)?;
        Ok(Self {
            owner: OwnerRef::new(class_id, content.id),
            class: class::SITE.to_string(),
            type_id: content.arrangement_type_id,
            key: Some(content.key.clone()),
            title: content.title.clone(),
            fields: BTreeMap::new(),
            payload_types: vec![class::SITE.to_string()],
        })
    }

    pub fn into_value(self) -> Value {
        Value::object(EntityObject(self))
    }
}

/// Load the entity of `class` with row id `id` as a template value.
pub fn entity_value(env: &Env<'_>, class: &str, id: i64) -> Result<Value, StoreError> {
    let store = &env.site.store;
    let entity = match class {
        class::ARRANGEMENT => found(store.read(|c| entities::load_arrangement(c, id)))?
            .map(|a| Entity::arrangement(env, &a))
            .transpose()?,
        class::SITE => found(store.read(|c| entities::load_site_content(c, id)))?
            .map(|s| Entity::site_content(env, &s))
            .transpose()?,
        _ => found(store.read(|c| resource::load_resource(c, id)))?
            .map(|r| Entity::resource(env, &r))
            .transpose()?,
    };
    Ok(entity.map(Entity::into_value).unwrap_or_default())
}

#[derive(Debug)]
pub struct EntityObject(pub Entity);

impl Object for EntityObject {
    fn attr(&self, env: &Env<'_>, name: &str) -> Result<Value, TemplateError> {
        let entity = &self.0;
        if let Some(value) = entity.fields.get(name) {
            return Ok(value.clone());
        }
        Ok(match name {
            "id" => Value::Int(entity.owner.id),
            "title" => Value::from(entity.title.as_str()),
            "key" => Value::from(entity.key.clone()),
            "class" => Value::from(entity.class.as_str()),
            _ => match env.site.atom_kind(name) {
                Some(kind) => Value::object(SlotAccessor {
                    owner: entity.owner,
                    type_id: entity.type_id,
                    kind,
                }),
                None => Value::None,
            },
        })
    }

    fn display(&self, _env: &Env<'_>) -> Result<String, TemplateError> {
        Ok(self.0.title.clone())
    }

    fn payload_types(&self) -> Vec<String> {
        self.0.payload_types.clone()
    }

    fn to_json(&self, _env: &Env<'_>) -> Result<serde_json::Value, TemplateError> {
        let entity = &self.0;
        Ok(serde_json::json!({
            "id": entity.owner.id,
            "class": entity.class,
            "key": entity.key,
            "title": entity.title,
        }))
    }
}

// =============================================================================
// Slot access
// =============================================================================

/// `entity.<atom>`: slots of one kind on one owner.
#[derive(Debug)]
pub struct SlotAccessor {
    owner: OwnerRef,
    type_id: Option<ResourceTypeId>,
    kind: AtomKind,
}

impl SlotAccessor {
    fn slots(&self, env: &Env<'_>, key: Option<&str>) -> Result<Vec<Slot>, StoreError> {
        let slot_kind = match self.kind {
            AtomKind::Slot(kind) => kind,
            AtomKind::ImageType(_) => SlotKind::Image,
        };
        let mut slots = env
            .site
            .store
            .read(|c| slots_for(c, self.owner, slot_kind, key))?;
        if let AtomKind::ImageType(wanted) = self.kind {
            slots.retain(|s| {
                matches!(&s.payload, Payload::Image { image_type_id: Some(id), .. } if *id == wanted)
            });
        }
        Ok(slots)
    }

    fn values(&self, env: &Env<'_>, slots: &[Slot]) -> Result<Vec<Value>, TemplateError> {
        slots
            .iter()
            .map(|slot| payload_value(env, slot))
            .filter(|v| !matches!(v, Ok(Value::None)))
            .collect()
    }
}

impl Object for SlotAccessor {
    fn attr(&self, env: &Env<'_>, key: &str) -> Result<Value, TemplateError> {
        let cardinality = match self.type_id {
            Some(type_id) => get_interface(&env.site.store, env.cache, type_id, key)?
                .map(|member| member.cardinality),
            None => None,
        };
        let slots = self.slots(env, Some(key))?;
        match cardinality {
            Some(Cardinality::Single) => match slots.first() {
                Some(slot) => Ok(payload_value(env, slot)?),
                None => Ok(Value::None),
            },
            _ => Ok(Value::List(self.values(env, &slots)?)),
        }
    }

    fn index(&self, env: &Env<'_>, index: usize) -> Result<Value, TemplateError> {
        let slots = self.slots(env, None)?;
        match slots.get(index) {
            Some(slot) => payload_value(env, slot),
            None => Ok(Value::None),
        }
    }

    fn items(&self, env: &Env<'_>) -> Result<Option<Vec<Value>>, TemplateError> {
        let slots = self.slots(env, None)?;
        Ok(Some(self.values(env, &slots)?))
    }
}

/// The template value of one slot's payload.
pub fn payload_value(env: &Env<'_>, slot: &Slot) -> Result<Value, TemplateError> {
    let store = &env.site.store;
    Ok(match &slot.payload {
        Payload::Copy { text, copy_id } => {
            let record = match copy_id {
                Some(id) => found(store.read(|c| entities::load_copy(c, *id)))?,
                None => None,
            };
            Value::object(CopyObject {
                key: slot.key.clone(),
                text: text.clone(),
                record,
            })
        }
        Payload::Menu(id) => found(store.read(|c| menu::load_menu(c, *id)))?
            .map(|m| Value::object(MenuObject::new(m)))
            .unwrap_or_default(),
        Payload::Arrangement(id) => entity_value(env, class::ARRANGEMENT, *id)?,
        Payload::Page(id) => entity_value(env, class::PAGE, *id)?,
        Payload::File(id) => found(store.read(|c| entities::load_file(c, *id)))?
            .map(|file| {
                let url = env.site.config.media.url_for(std::path::Path::new(&file.path));
                Value::object(Record {
                    display: file.title.clone(),
                    fields: BTreeMap::from([
                        ("id".to_string(), Value::Int(file.id)),
                        ("title".to_string(), Value::from(file.title)),
                        ("path".to_string(), Value::from(file.path)),
                        ("url".to_string(), Value::from(url)),
                    ]),
                    payload_types: vec![class::FILE.to_string()],
                })
            })
            .unwrap_or_default(),
        Payload::Image {
            image_id,
            image_type_id,
            user_variant_crop,
        } => {
            let Some(image) = found(store.read(|c| load_image(c, *image_id)))? else {
                return Ok(Value::None);
            };
            let image_type = image_type_id
                .map(|id| cached_image_type(store, env.cache, id))
                .transpose()?;
            Value::object(ImageSlotObject(Rc::new(SlotImage {
                slot_id: slot.id,
                owner_class: env.site.classes.title_for(slot.owner.type_id),
                image,
                image_type,
                user_crop: user_variant_crop.clone(),
            })))
        }
        Payload::Date(d) => Value::Date(*d),
        Payload::DateTime(d) => Value::DateTime(*d),
        Payload::Time(t) => Value::Time(*t),
        Payload::Instant(t) => Value::Instant(*t),
        Payload::Period { start, end } => Value::object(Record {
            display: format!("{}/{}", start.to_rfc3339(), end.to_rfc3339()),
            fields: BTreeMap::from([
                ("start".to_string(), Value::Instant(*start)),
                ("end".to_string(), Value::Instant(*end)),
            ]),
            payload_types: vec![class::PERIOD.to_string()],
        }),
        Payload::Integer(n) => Value::Int(*n),
        Payload::Enum { value, title } => Value::object(Record {
            display: if title.is_empty() { value.clone() } else { title.clone() },
            fields: BTreeMap::from([
                ("value".to_string(), Value::from(value.as_str())),
                ("title".to_string(), Value::from(title.as_str())),
            ]),
            payload_types: vec![class::ENUM.to_string()],
        }),
    })
}

// =============================================================================
// Payload objects
// =============================================================================

#[derive(Debug)]
pub struct CopyObject {
    key: String,
    text: String,
    record: Option<CopyRecord>,
}

impl CopyObject {
    fn body(&self) -> &str {
        match &self.record {
            Some(record) if self.text.trim().is_empty() => &record.body,
            _ => &self.text,
        }
    }
}

impl Object for CopyObject {
    fn attr(&self, _env: &Env<'_>, name: &str) -> Result<Value, TemplateError> {
        Ok(match name {
            "body" => Value::from(self.body()),
            "text" => Value::from(self.text.as_str()),
            "key" => Value::from(self.key.as_str()),
            "title" => Value::from(self.record.as_ref().map(|r| r.title.clone())),
            _ => Value::None,
        })
    }

    fn display(&self, _env: &Env<'_>) -> Result<String, TemplateError> {
        Ok(self.body().to_string())
    }

    fn payload_types(&self) -> Vec<String> {
        vec![class::COPY.to_string()]
    }
}

/// A menu; links and resources load on first access.
#[derive(Debug)]
pub struct MenuObject {
    menu: Menu,
}

impl MenuObject {
    pub fn new(menu: Menu) -> Self {
        Self { menu }
    }
}

impl Object for MenuObject {
    fn attr(&self, env: &Env<'_>, name: &str) -> Result<Value, TemplateError> {
        let store = &env.site.store;
        Ok(match name {
            "id" => Value::Int(self.menu.id),
            "key" => Value::from(self.menu.key.as_str()),
            "title" => Value::from(self.menu.title.as_str()),
            "links" => Value::List(
                store
                    .read(|c| menu::menu_links(c, self.menu.id))?
                    .into_iter()
                    .map(|link| {
                        Value::map([
                            ("id", Value::Int(link.id)),
                            ("title", Value::from(link.title)),
                            ("url", Value::from(link.url)),
                        ])
                    })
                    .collect(),
            ),
            "resources" => Value::List(
                store
                    .read(|c| menu::menu_resources(c, self.menu.id))?
                    .iter()
                    .map(|r| Entity::resource(env, r).map(Entity::into_value))
                    .collect::<Result<_, _>>()?,
            ),
            _ => Value::None,
        })
    }

    fn display(&self, _env: &Env<'_>) -> Result<String, TemplateError> {
        Ok(self.menu.title.clone())
    }

    fn payload_types(&self) -> Vec<String> {
        vec![class::MENU.to_string()]
    }
}

/// Plain fields with a fixed display text (files, enums, periods).
#[derive(Debug)]
struct Record {
    display: String,
    fields: BTreeMap<String, Value>,
    payload_types: Vec<String>,
}

impl Object for Record {
    fn attr(&self, _env: &Env<'_>, name: &str) -> Result<Value, TemplateError> {
        Ok(self.fields.get(name).cloned().unwrap_or_default())
    }

    fn display(&self, _env: &Env<'_>) -> Result<String, TemplateError> {
        Ok(self.display.clone())
    }

    fn payload_types(&self) -> Vec<String> {
        self.payload_types.clone()
    }

    fn to_json(&self, env: &Env<'_>) -> Result<serde_json::Value, TemplateError> {
        Value::Map(self.fields.clone()).to_json(env)
    }
}

/// An image seen through its slot.
#[derive(Debug)]
pub struct ImageSlotObject(Rc<SlotImage>);

impl Object for ImageSlotObject {
    fn attr(&self, env: &Env<'_>, name: &str) -> Result<Value, TemplateError> {
        let image = &self.0.image;
        Ok(match name {
            "id" => Value::Int(image.id),
            "slot_id" => Value::Int(self.0.slot_id),
            "url" => Value::from(
                env.site
                    .config
                    .media
                    .url_for(std::path::Path::new(&image.path)),
            ),
            "alt" => Value::from(image.alt.as_str()),
            "caption" => Value::from(image.caption.as_str()),
            "link_url" => Value::from(image.link_url.as_str()),
            "folder" => Value::from(image.folder.as_str()),
            "width" => Value::Int(i64::from(image.width)),
            "height" => Value::Int(i64::from(image.height)),
            "variant" => Value::object(VariantAccessor(Rc::clone(&self.0))),
            _ => Value::None,
        })
    }

    fn display(&self, env: &Env<'_>) -> Result<String, TemplateError> {
        Ok(env
            .site
            .config
            .media
            .url_for(std::path::Path::new(&self.0.image.path)))
    }

    fn payload_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        if let Some(image_type) = &self.0.image_type {
            types.push(image_type_title(&image_type.key));
        }
        types.push(class::IMAGE.to_string());
        types
    }
}

/// `slot.variant.<key>`: URL of the variant, generated on first access.
#[derive(Debug)]
pub struct VariantAccessor(Rc<SlotImage>);

impl Object for VariantAccessor {
    fn attr(&self, env: &Env<'_>, key: &str) -> Result<Value, TemplateError> {
        Ok(Value::from(env.site.slot_variant_url(&self.0, key)))
    }
}

// =============================================================================
// Sitewide roots
// =============================================================================

/// `content.<class>.<key>`.
#[derive(Debug)]
pub struct ContentRoot;

impl Object for ContentRoot {
    fn attr(&self, _env: &Env<'_>, class: &str) -> Result<Value, TemplateError> {
        Ok(Value::object(ClassLookup(class.to_string())))
    }
}

#[derive(Debug)]
struct ClassLookup(String);

impl Object for ClassLookup {
    fn attr(&self, env: &Env<'_>, key: &str) -> Result<Value, TemplateError> {
        let store = &env.site.store;
        Ok(match self.0.as_str() {
            class::MENU => store
                .read(|c| menu::find_menu(c, key))?
                .map(|m| Value::object(MenuObject::new(m)))
                .unwrap_or_default(),
            class::COPY => store
                .read(|c| entities::find_copy(c, key))?
                .map(|record| {
                    Value::object(CopyObject {
                        key: key.to_string(),
                        text: String::new(),
                        record: Some(record),
                    })
                })
                .unwrap_or_default(),
            class::ARRANGEMENT => match store.read(|c| entities::find_arrangement(c, key))? {
                Some(a) => Entity::arrangement(env, &a)?.into_value(),
                None => Value::None,
            },
            class::SITE => site_content_value(env, key)?,
            class_title => match store.read(|c| resource::find_resource(c, class_title, key))? {
                Some(r) => Entity::resource(env, &r)?.into_value(),
                None => Value::None,
            },
        })
    }
}

fn site_content_value(env: &Env<'_>, key: &str) -> Result<Value, TemplateError> {
    Ok(match env.site.store.read(|c| entities::find_site_content(c, key))? {
        Some(content) => Entity::site_content(env, &content)?.into_value(),
        None => Value::None,
    })
}

/// `site.<key>`: sitewide content.
#[derive(Debug)]
pub struct SiteRoot;

impl Object for SiteRoot {
    fn attr(&self, env: &Env<'_>, key: &str) -> Result<Value, TemplateError> {
        site_content_value(env, key)
    }
}

/// The request as templates see it.
pub fn request_value(request: &Request) -> Value {
    let query = request
        .query_params()
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)));
    Value::map([
        ("method", Value::from(request.method.as_str())),
        ("path", Value::from(request.path.as_str())),
        ("host", Value::from(request.host())),
        ("accept", Value::from(request.accept())),
        ("query", Value::map(query)),
    ])
}

/// Entities of `class` owning an enum slot under `key` whose value or
/// title equals `value`, in slot order, each once.
pub fn get_entities_by_enum(
    env: &Env<'_>,
    class: &str,
    key: &str,
    value: &str,
) -> Result<Vec<Value>, TemplateError> {
    let class_id = env.site.classes.id(&env.site.store, class)?;
    let slots = env
        .site
        .store
        .read(|c| slots_with_key(c, SlotKind::Enum, key))?;
    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    for slot in slots {
        let matches = matches!(
            &slot.payload,
            Payload::Enum { value: v, title } if v == value || title == value
        );
        if slot.owner.type_id != class_id || !matches || !seen.insert(slot.owner.id) {
            continue;
        }
        let entity = entity_value(env, class, slot.owner.id)?;
        if !entity.is_none() {
            entities.push(entity);
        }
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_type::{MemberSpec, TypeSpec, add_member, create_schema, save_type, set_schema};
    use crate::templates::render_source;
    use crate::templates::value::Context;
    use crate::test_helpers::TestSite;

    fn render(site: &TestSite, resource: &Resource, source: &str) -> String {
        let request = Request::get(&resource.path);
        site.with_env(&request, |env| {
            let mut ctx = Context::new();
            ctx.insert_root("resource", Entity::resource(env, resource).unwrap().into_value());
            ctx.insert_root("content", Value::object(ContentRoot));
            ctx.insert_root("site", Value::object(SiteRoot));
            render_source(env, resource.resource_type_id, "t", "text/plain", source, &mut ctx).unwrap()
        })
    }

    fn typed_site() -> (TestSite, ResourceTypeId) {
        let site = TestSite::new();
        let ty = site
            .store
            .write(|tx| {
                let ty = save_type(tx, &TypeSpec::resource("article"))?;
                let schema = create_schema(tx, "article")?;
                add_member(tx, schema, &MemberSpec::single("lead", class::COPY))?;
                add_member(tx, schema, &MemberSpec::list("green", class::COPY).with_order(1))?;
                set_schema(tx, ty.id, Some(schema))?;
                Ok(ty.id)
            })
            .unwrap();
        (site, ty)
    }

    #[test]
    fn single_member_yields_first_payload() {
        let (site, ty) = typed_site();
        let page = site.page_of_type("A", "/a", ty);
        site.add_slot(page.owner(), 1, "lead", Payload::copy("second")).unwrap();
        site.add_slot(page.owner(), 0, "lead", Payload::copy("first")).unwrap();
        assert_eq!(render(&site, &page, "{{ resource.copy.lead.body }}"), "first");
    }

    #[test]
    fn list_member_iterates_in_order() {
        let (site, ty) = typed_site();
        let page = site.page_of_type("A", "/a", ty);
        for (order, text) in [(2, "C"), (0, "A"), (1, "B")] {
            site.add_slot(page.owner(), order, "green", Payload::copy(text)).unwrap();
        }
        let out = render(&site, &page, "{% for c in resource.copy.green %}{{ c.body }}{% endfor %}");
        assert_eq!(out, "ABC");
        assert_eq!(render(&site, &page, "{% render resource.copy.green %}"), "ABC");
    }

    #[test]
    fn missing_single_degrades_to_nothing() {
        let (site, ty) = typed_site();
        let page = site.page_of_type("A", "/a", ty);
        assert_eq!(render(&site, &page, "[{{ resource.copy.lead.body.anything }}]"), "[]");
        assert_eq!(render(&site, &page, "[{% render resource.copy.green %}]"), "[]");
    }

    #[test]
    fn undeclared_key_behaves_as_list() {
        let site = TestSite::new();
        let page = site.page("P", "/p");
        site.add_slot(page.owner(), 0, "extra", Payload::Integer(4)).unwrap();
        assert_eq!(render(&site, &page, "{{ resource.integer.extra.length }}"), "1");
        assert_eq!(render(&site, &page, "{{ resource.integer[0] }}"), "4");
    }

    #[test]
    fn arrangements_chain() {
        let site = TestSite::new();
        let page = site.page("Home", "/home");
        let arrangement = site
            .store
            .write(|tx| {
                let ty = save_type(tx, &TypeSpec::arrangement("body"))?;
                entities::create_arrangement(tx, Some("homebody"), "Body", ty.id)
            })
            .unwrap();
        let arrangement_class = site.classes.id(&site.store, class::ARRANGEMENT).unwrap();
        site.add_slot(page.owner(), 0, "body", Payload::Arrangement(arrangement.id))
            .unwrap();
        site.add_slot(
            OwnerRef::new(arrangement_class, arrangement.id),
            0,
            "lead",
            Payload::copy("Welcome"),
        )
        .unwrap();
        let out = render(&site, &page, "{% for a in resource.arrangement.body %}{{ a.copy.lead.first.body }}{% endfor %}");
        assert_eq!(out, "Welcome");
        assert_eq!(
            render(&site, &page, "[{{ resource.arrangement.body.copy.lead }}]"),
            "[Welcome]"
        );
        assert_eq!(render(&site, &page, "[{{ resource.arrangement.body.copy.missing }}]"), "[]");
        assert_eq!(render(&site, &page, "{{ content.arrangement.homebody.title }}"), "Body");
    }

    #[test]
    fn content_root_finds_keyed_entities() {
        let site = TestSite::new();
        site.store
            .write(|tx| {
                let m = menu::create_menu(tx, "footer", "Footer")?;
                let l = menu::create_link(tx, "Home", "/")?;
                menu::add_link(tx, m.id, l.id, 0)?;
                entities::save_copy(tx, Some("tagline"), "Tagline", "Fly high")?;
                Ok(())
            })
            .unwrap();
        let page = site.page("Home", "/");
        assert_eq!(render(&site, &page, "{{ content.menu.footer.title }}"), "Footer");
        assert_eq!(
            render(&site, &page, "{% for l in content.menu.footer.links %}{{ l.url }}{% endfor %}"),
            "/"
        );
        assert_eq!(render(&site, &page, "{{ content.copy.tagline }}"), "Fly high");
        assert_eq!(render(&site, &page, "{{ content.nothing.here }}"), "");
    }

    #[test]
    fn site_content_slots() {
        let site = TestSite::new();
        let footer = site
            .store
            .write(|tx| entities::save_site_content(tx, "footer", "Footer", None))
            .unwrap();
        let site_class = site.classes.id(&site.store, class::SITE).unwrap();
        site.add_slot(OwnerRef::new(site_class, footer.id), 0, "note", Payload::copy("(c) 2024"))
            .unwrap();
        let page = site.page("Home", "/");
        assert_eq!(
            render(&site, &page, "{% for n in site.footer.copy.note %}{{ n }}{% endfor %}"),
            "(c) 2024"
        );
    }

    #[test]
    fn entities_by_enum_match_value_or_title() {
        let site = TestSite::new();
        let a = site.page("A", "/a");
        let b = site.page("B", "/b");
        let c = site.page("C", "/c");
        site.add_slot(a.owner(), 0, "colour", Payload::enumeration("red", "Red")).unwrap();
        site.add_slot(a.owner(), 1, "colour", Payload::enumeration("red", "Red")).unwrap();
        site.add_slot(b.owner(), 0, "colour", Payload::enumeration("blue", "Red")).unwrap();
        site.add_slot(c.owner(), 0, "colour", Payload::enumeration("green", "Green")).unwrap();
        let out = render(
            &site,
            &a,
            "{% for e in get_entities_by_enum(\"page\", \"colour\", \"Red\") %}{{ e.title }}{% endfor %}",
        );
        assert_eq!(out, "AB");
    }

    #[test]
    fn interface_lookups_hit_the_store_once() {
        let (site, ty) = typed_site();
        let page = site.page_of_type("A", "/a", ty);
        let request = Request::get("/a");
        site.with_env(&request, |env| {
            get_interface(&env.site.store, env.cache, ty, "lead").unwrap();
            let before = env.site.store.query_count();
            for _ in 0..5 {
                get_interface(&env.site.store, env.cache, ty, "lead").unwrap();
                get_interface(&env.site.store, env.cache, ty, "green").unwrap();
            }
            assert_eq!(env.site.store.query_count(), before);
        });
        let _ = page;
    }
}
