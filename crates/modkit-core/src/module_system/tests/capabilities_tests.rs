use crate::kernel::error::Error;
use crate::module_system::capabilities::{
    apply_contributor, CapabilityRegistry, CapabilitySet, ModuleContributor, NavigationItem, Permission,
    RouteDefinition, SlotContribution, StaticContributor,
};
use crate::module_system::error::ModuleSystemError;

fn nav(key: &str, label: &str, group: Option<&str>, sort: i32, permission: Option<&str>) -> NavigationItem {
    NavigationItem {
        key: key.to_string(),
        label: label.to_string(),
        url: format!("/{}", key),
        icon: None,
        group: group.map(str::to_string),
        sort,
        permission: permission.map(str::to_string),
    }
}

fn permission(key: &str) -> Permission {
    Permission {
        key: key.to_string(),
        label: key.replace('.', " "),
        group: None,
    }
}

fn route(name: &str, path: &str) -> RouteDefinition {
    RouteDefinition {
        name: name.to_string(),
        method: "GET".to_string(),
        path: path.to_string(),
        action: format!("{}Controller@index", name),
    }
}

fn slot(slot: &str, key: &str, sort: i32) -> SlotContribution {
    SlotContribution {
        slot: slot.to_string(),
        key: key.to_string(),
        content: format!("<{}/>", key),
        sort,
    }
}

fn blog_capabilities() -> CapabilitySet {
    CapabilitySet {
        navigation: vec![nav("blog.posts", "Posts", Some("content"), 10, Some("blog.view"))],
        permissions: vec![permission("blog.view"), permission("blog.edit")],
        routes: vec![route("blog.index", "/blog")],
        slots: vec![slot("dashboard.widgets", "blog.latest", 5)],
    }
}

fn assert_conflict(err: Error, expected_kind: &str, expected_owner: &str) {
    match err.as_module_error() {
        Some(ModuleSystemError::CapabilityConflict { kind, owner, .. }) => {
            assert_eq!(*kind, expected_kind);
            assert_eq!(owner, expected_owner);
        }
        other => panic!("expected a capability conflict, got {other:?}"),
    }
}

#[test]
fn test_register_and_query() {
    let mut registry = CapabilityRegistry::new();
    blog_capabilities().register_into("blog", &mut registry).unwrap();

    assert_eq!(registry.len(), 5);
    assert_eq!(registry.route("blog.index").unwrap().path, "/blog");
    assert_eq!(registry.route_owner("blog.index"), Some("blog"));
    assert!(registry.permission("blog.edit").is_some());
    assert_eq!(registry.slot("dashboard.widgets").len(), 1);
    assert!(registry.slot("sidebar").is_empty());

    let counts = registry.contributions_of("blog");
    assert_eq!((counts.navigation, counts.permissions, counts.routes, counts.slots), (1, 2, 1, 1));
    assert_eq!(counts.total(), 5);
    assert_eq!(registry.contributions_of("shop").total(), 0);
}

#[test]
fn test_conflicting_keys_are_rejected() {
    let mut registry = CapabilityRegistry::new();
    blog_capabilities().register_into("blog", &mut registry).unwrap();

    let err = registry.register_route("shop", route("blog.index", "/shop")).unwrap_err();
    assert_conflict(err, "route", "blog");
    let err = registry.register_permission("shop", permission("blog.view")).unwrap_err();
    assert_conflict(err, "permission", "blog");
    let err = registry
        .register_slot("shop", slot("dashboard.widgets", "blog.latest", 0))
        .unwrap_err();
    assert!(err.to_string().contains("dashboard.widgets/blog.latest"));

    // same key in another slot is a different entry
    registry.register_slot("shop", slot("sidebar", "blog.latest", 0)).unwrap();
    assert_eq!(registry.route("blog.index").unwrap().path, "/blog");
}

#[test]
fn test_owner_may_replace_its_entries() {
    let mut registry = CapabilityRegistry::new();
    registry.register_route("blog", route("blog.index", "/blog")).unwrap();
    registry.register_route("blog", route("blog.index", "/articles")).unwrap();

    assert_eq!(registry.routes().len(), 1);
    assert_eq!(registry.route("blog.index").unwrap().path, "/articles");
}

#[test]
fn test_unregister_module_withdraws_only_its_entries() {
    let mut registry = CapabilityRegistry::new();
    blog_capabilities().register_into("blog", &mut registry).unwrap();
    registry.register_route("shop", route("shop.index", "/shop")).unwrap();

    assert_eq!(registry.unregister_module("blog"), 5);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.route_owner("shop.index"), Some("shop"));
    assert_eq!(registry.unregister_module("blog"), 0);

    registry.clear();
    assert!(registry.is_empty());
}

#[test]
fn test_navigation_ordering_and_visibility() {
    let mut registry = CapabilityRegistry::new();
    registry.register_navigation("blog", nav("posts", "Posts", Some("content"), 20, None)).unwrap();
    registry.register_navigation("blog", nav("drafts", "Drafts", Some("content"), 20, Some("blog.edit"))).unwrap();
    registry.register_navigation("shop", nav("orders", "Orders", Some("content"), 5, None)).unwrap();
    registry.register_navigation("core", nav("home", "Home", None, 99, None)).unwrap();

    let keys: Vec<&str> = registry.navigation().iter().map(|i| i.key.as_str()).collect();
    assert_eq!(keys, vec!["home", "orders", "drafts", "posts"]);

    let visible: Vec<&str> = registry.navigation_for(&[]).iter().map(|i| i.key.as_str()).collect();
    assert_eq!(visible, vec!["home", "orders", "posts"]);
    assert_eq!(registry.navigation_for(&["blog.edit"]).len(), 4);
}

#[test]
fn test_slot_ordering() {
    let mut registry = CapabilityRegistry::new();
    registry.register_slot("blog", slot("dashboard", "b", 10)).unwrap();
    registry.register_slot("shop", slot("dashboard", "a", 10)).unwrap();
    registry.register_slot("core", slot("dashboard", "z", 1)).unwrap();

    let keys: Vec<&str> = registry.slot("dashboard").iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["z", "a", "b"]);
}

#[test]
fn test_apply_contributor_is_all_or_nothing() {
    let mut registry = CapabilityRegistry::new();
    registry.register_route("core", route("shop.checkout", "/checkout")).unwrap();

    let shop = StaticContributor::new(
        "shop",
        CapabilitySet {
            permissions: vec![permission("shop.manage")],
            routes: vec![route("shop.index", "/shop"), route("shop.checkout", "/shop/checkout")],
            ..CapabilitySet::default()
        },
    );
    assert_eq!(shop.module(), "shop");
    let err = apply_contributor(&shop, &mut registry).unwrap_err();
    assert_conflict(err, "route", "core");

    assert_eq!(registry.contributions_of("shop").total(), 0);
    assert_eq!(registry.len(), 1);

    let blog = StaticContributor::new("blog", blog_capabilities());
    apply_contributor(&blog, &mut registry).unwrap();
    assert_eq!(registry.contributions_of("blog").total(), 5);
}

#[test]
fn test_capability_set_from_json() {
    let set: CapabilitySet = serde_json::from_str(
        r#"{
            "routes": [{"name": "blog.index", "path": "/blog", "action": "PostController@index"}],
            "permissions": [{"key": "blog.view", "label": "View posts"}]
        }"#,
    )
    .unwrap();

    assert!(!set.is_empty());
    assert_eq!(set.routes[0].method, "GET");
    assert!(set.navigation.is_empty());
    assert!(CapabilitySet::default().is_empty());
}
