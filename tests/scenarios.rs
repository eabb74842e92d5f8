//! End-to-end request scenarios through the public API.

mod common;

use common::{
    get, get_accepting, get_from_host, jpeg_bytes, page, resource_type, site, site_with, template,
};
use std::path::Path;
use swim::functions::REDIRECT;
use swim::imaging::{Algorithm, VariantDecl};
use swim::media::ImageMeta;
use swim::naming::variant_file;
use swim::pipeline::handle;
use swim::reservation::Reservation;
use swim::resource::{ResourceSpec, mapping_count};
use swim::resource_type::{MemberSpec, TypeSpec, add_member, create_schema, save_type};
use swim::slots::Payload;
use swim::templates::TemplateSpec;
use swim::types::Request;

#[test]
fn negotiation_picks_by_accept() {
    let site = site();
    let eagles = resource_type(&site, "eagles");
    template(&site, eagles, 0, TemplateSpec::new("t1", "text/html", "HTML"));
    template(&site, eagles, 1, TemplateSpec::new("t2", "application/json", r#"["JSON"]"#));
    page(&site, "Eagles", "/eagles", eagles);

    let plain = get(&site, "/eagles");
    assert_eq!((plain.status, plain.body_text().as_str()), (200, "HTML"));
    assert_eq!(plain.header("content-type"), Some("text/html"));

    let json = get_accepting(&site, "/eagles", "application/json");
    assert_eq!((json.status, json.body_text().as_str()), (200, r#"["JSON"]"#));

    let refused = get_accepting(&site, "/eagles", "app/doesnt_exist");
    assert_eq!(refused.status, 406);
    assert!(
        refused.body_text().ends_with("text/html, application/json."),
        "{}",
        refused.body_text()
    );
}

#[test]
fn wildcard_accept_takes_first_mapping() {
    let site = site();
    let ty = resource_type(&site, "eagles");
    template(&site, ty, 0, TemplateSpec::new("t2", "application/json", "[]"));
    template(&site, ty, 1, TemplateSpec::new("t1", "text/html", "HTML"));
    page(&site, "Eagles", "/eagles", ty);
    assert_eq!(get_accepting(&site, "/eagles", "*/*").body_text(), "[]");
}

#[test]
fn missing_accept_takes_first_mapping_or_prefers_html() {
    let setup = |site: &common::Fixture| {
        let ty = resource_type(site, "eagles");
        template(site, ty, 0, TemplateSpec::new("t2", "application/json", "[]"));
        template(site, ty, 1, TemplateSpec::new("t1", "text/html", "HTML"));
        page(site, "Eagles", "/eagles", ty);
    };

    let first = site();
    setup(&first);
    assert_eq!(get(&first, "/eagles").body_text(), "[]");

    let html = site_with(|c| c.templates.accept_fallback_first = false);
    setup(&html);
    let response = get(&html, "/eagles");
    assert_eq!(response.body_text(), "HTML");
    assert_eq!(response.header("content-type"), Some("text/html"));
}

#[test]
fn host_templates_win_for_their_host_only() {
    let site = site();
    let ty = resource_type(&site, "page");
    template(&site, ty, 0, TemplateSpec::new("generic.txt", "text/plain", "generic"));
    template(
        &site,
        ty,
        1,
        TemplateSpec::new("branded.txt", "text/plain", "branded").on_host("blog.example.com"),
    );
    page(&site, "P", "/p", ty);

    assert_eq!(get_from_host(&site, "/p", "Blog.Example.com:8080").body_text(), "branded");
    assert_eq!(get_from_host(&site, "/p", "other.example.com").body_text(), "generic");
    assert_eq!(get(&site, "/p").body_text(), "generic");
}

#[test]
fn host_templates_are_ignored_when_per_host_is_off() {
    let site = site_with(|c| c.templates.per_host = false);
    let ty = resource_type(&site, "page");
    template(&site, ty, 0, TemplateSpec::new("generic.txt", "text/plain", "generic"));
    template(
        &site,
        ty,
        1,
        TemplateSpec::new("branded.txt", "text/plain", "branded").on_host("blog.example.com"),
    );
    page(&site, "P", "/p", ty);

    assert_eq!(get_from_host(&site, "/p", "blog.example.com").body_text(), "generic");
}

#[test]
fn case_variants_redirect_to_canonical_path() {
    let site = site();
    let ty = resource_type(&site, "eagles");
    template(&site, ty, 0, TemplateSpec::new("t1", "text/html", "HTML"));
    page(&site, "Eagles", "/eagles", ty);

    let response = get(&site, "/Eagles");
    assert_eq!(response.status, 301);
    assert_eq!(response.header("location"), Some("/eagles"));
}

#[test]
fn post_only_form_refuses_get_and_redirects_on_post() {
    let site = site();
    let ty = resource_type(&site, "form");
    let spec = ResourceSpec::page("Form", "/test/get/405", ty)
        .with_method("POST")
        .with_handler(REDIRECT)
        .with_settings(serde_json::json!({ "redirect": "/thanks", "required": ["name"] }));
    site.create_resource(&spec).unwrap();

    let refused = get(&site, "/test/get/405");
    assert_eq!(refused.status, 405);
    assert_eq!(refused.header("allow"), Some("POST"));

    let posted = handle(
        &site,
        &Request::new("POST", "/test/get/405").with_body("name=Ada"),
    );
    assert_eq!(posted.status, 302);
    assert_eq!(posted.header("location"), Some("/thanks"));
}

#[test]
fn list_slots_render_in_loop_and_single_form_alike() {
    let site = site();
    let looped = resource_type(&site, "looped");
    let single = resource_type(&site, "single");
    template(
        &site,
        looped,
        0,
        TemplateSpec::new("loop.txt", "text/plain", "{% for c in resource.copy.green %}{{ c.body }}{% endfor %}"),
    );
    template(
        &site,
        single,
        0,
        TemplateSpec::new("single.txt", "text/plain", "{% render resource.copy.green %}"),
    );
    let x = page(&site, "X", "/x", looped);
    let y = page(&site, "Y", "/y", single);
    for owner in [x.owner(), y.owner()] {
        for (order, body) in ["A", "B", "C"].into_iter().enumerate() {
            site.add_slot(owner, order as i64, "green", Payload::copy(body))
                .unwrap();
        }
    }

    assert_eq!(get(&site, "/x").body_text(), "ABC");
    assert_eq!(get(&site, "/y").body_text(), "ABC");
}

#[test]
fn empty_list_in_single_form_renders_nothing() {
    let site = site();
    let ty = resource_type(&site, "single");
    template(
        &site,
        ty,
        0,
        TemplateSpec::new("single.txt", "text/plain", "[{% render resource.copy.green %}]"),
    );
    page(&site, "Y", "/y", ty);
    assert_eq!(get(&site, "/y").body_text(), "[]");
}

#[test]
fn tree_reservation_blocks_descendants() {
    let site = site();
    let blog = resource_type(&site, "blog");
    let plain = resource_type(&site, "page");
    site.create_resource(
        &ResourceSpec::page("News", "/news", blog).with_reservation(Reservation::Tree),
    )
    .unwrap();

    let err = site
        .create_resource(&ResourceSpec::page("Today", "/news/today", plain))
        .unwrap_err();
    assert_eq!(err.to_string(), "All paths starting with /news are reserved.");
    let count = site
        .store
        .read(|c| mapping_count(c, "/news/today", "GET"))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn jit_variants_appear_on_first_access_and_leave_with_the_slot() {
    let site = site();
    let decl = |key: &str, size: u32, jit: bool| VariantDecl {
        key: key.to_string(),
        algorithm: Algorithm::Thumbnail,
        arguments: vec![size, size],
        jit_generation: jit,
    };
    let thumbs = site
        .save_image_type(
            "basic_thumbs",
            "Basic thumbs",
            &[decl("large_thumb", 64, true), decl("small_thumb", 16, false)],
        )
        .unwrap();

    let ty = site
        .store
        .write(|tx| {
            let schema = create_schema(tx, "gallery")?;
            add_member(tx, schema, &MemberSpec::single("photo", "image_type:basic_thumbs"))?;
            save_type(tx, &TypeSpec::resource("gallery").with_schema(schema))
        })
        .unwrap();
    template(
        &site,
        ty.id,
        0,
        TemplateSpec::new(
            "gallery.txt",
            "text/plain",
            "{{ resource.basic_thumbs.photo.variant.large_thumb }}",
        ),
    );
    let gallery = page(&site, "Gallery", "/gallery", ty.id);

    let image = site
        .save_image("bird.jpg", &jpeg_bytes(120, 80), &ImageMeta::default())
        .unwrap();
    let slot = site
        .add_slot(gallery.owner(), 0, "photo", Payload::image(image.id, None))
        .unwrap();
    assert!(matches!(
        slot.payload,
        Payload::Image { image_type_id: Some(id), .. } if id == thumbs.id
    ));

    let file = |key: &str| site.media.path().join(variant_file(Path::new(&image.path), key));
    assert!(file("small_thumb").exists());
    assert!(!file("large_thumb").exists());

    let response = get(&site, "/gallery");
    assert_eq!(response.status, 200);
    assert!(response.body_text().ends_with("/large_thumb/bird.jpg"), "{}", response.body_text());
    assert!(file("small_thumb").exists());
    assert!(file("large_thumb").exists());

    site.delete_slot(slot.id).unwrap();
    assert!(!file("small_thumb").exists());
    assert!(!file("large_thumb").exists());
}
