use crate::event::{Event, ModuleEvent};

#[test]
fn test_event_names() {
    let cases = [
        (ModuleEvent::Discovered { name: "a".into(), version: "1.0.0".into() }, "module.discovered"),
        (ModuleEvent::Enabled { name: "a".into() }, "module.enabled"),
        (ModuleEvent::Disabled { name: "a".into() }, "module.disabled"),
        (ModuleEvent::Uninstalled { name: "a".into() }, "module.uninstalled"),
        (ModuleEvent::UpdateFailed { name: "a".into(), error: "boom".into() }, "module.update_failed"),
    ];
    for (event, expected) in cases {
        assert_eq!(event.name(), expected);
        assert_eq!(event.module_name(), "a");
    }
}

#[test]
fn test_clone_event_preserves_payload() {
    let event = ModuleEvent::UpdateCompleted {
        name: "blog".into(),
        from_version: "1.0.0".into(),
        to_version: "1.1.0".into(),
    };
    let boxed = event.clone_event();
    let back = boxed.as_any().downcast_ref::<ModuleEvent>().unwrap();
    assert_eq!(back, &event);
}
