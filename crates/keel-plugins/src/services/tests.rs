//! Unit tests for the service registry.

use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;

#[derive(Debug, PartialEq, Eq)]
struct Clock {
    ticks: u64,
}

#[fixture]
fn registry() -> ServiceRegistry {
    let registry = ServiceRegistry::new();
    registry.publish_value("host.name", "keel");
    registry.publish_service("clock", Arc::new(Clock { ticks: 7 }));
    registry
}

#[rstest]
fn values_and_services_are_kept_apart(registry: ServiceRegistry) {
    assert_eq!(registry.value("host.name").as_deref(), Some("keel"));
    assert_eq!(registry.value("clock"), None);
    assert!(registry.service::<Clock>("host.name").is_none());
    assert_eq!(
        registry.service::<Clock>("clock").as_deref(),
        Some(&Clock { ticks: 7 })
    );
    assert_eq!(registry.len(), 2);
}

#[rstest]
fn service_lookup_checks_type(registry: ServiceRegistry) {
    assert!(registry.service::<String>("clock").is_none());
}

#[rstest]
fn withdraw_removes_entry(registry: ServiceRegistry) {
    assert!(registry.withdraw("clock"));
    assert!(!registry.withdraw("clock"));
    assert!(!registry.contains("clock"));
}

#[rstest]
fn host_services_table_reaches_registry(registry: ServiceRegistry) {
    registry.with_host_services(|services| {
        assert!(services.publish("demo.state", "active"));
        assert_eq!(services.lookup("host.name").as_deref(), Some("keel"));
        assert_eq!(services.lookup("clock"), None);
        assert_eq!(services.lookup("unknown"), None);
    });
    assert_eq!(registry.value("demo.state").as_deref(), Some("active"));
}

#[test]
fn lookup_reports_full_length_when_truncating() {
    let registry = ServiceRegistry::new();
    registry.publish_value("long", "abcdefgh");
    let key = std::ffi::CString::new("long").expect("key");
    let mut buffer = [0_u8; 4];
    registry.with_host_services(|services| {
        // SAFETY: the buffer is writable for its full length.
        let status = unsafe {
            (services.lookup)(
                services.context,
                key.as_ptr(),
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };
        assert_eq!(status, 8);
    });
    assert_eq!(&buffer, b"abc\0");
}

#[test]
fn debug_lists_entry_names() {
    let registry = ServiceRegistry::new();
    registry.publish_value("b", "2");
    registry.publish_value("a", "1");
    assert_eq!(format!("{registry:?}"), r#"ServiceRegistry { entries: ["a", "b"] }"#);
}
