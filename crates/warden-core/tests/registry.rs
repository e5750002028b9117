//! Tests for the multi-session registry

use std::sync::Arc;

use warden_core::registry::{self, SessionRegistry};
use warden_core::types::{Address, TargetDescriptor};
use warden_core::SessionController;

fn controller(name: &str) -> SessionController
{
    SessionController::local(TargetDescriptor::new(name, Address::new(0x0040_0000), 0x4000))
}

#[test]
fn test_ids_are_assigned_in_registration_order()
{
    let mut registry = SessionRegistry::new();
    assert!(registry.is_empty());

    let (first, _) = registry.register(controller("one"));
    let (second, _) = registry.register(controller("two"));

    assert_ne!(first, second);
    assert_eq!(registry.ids(), vec![first, second]);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_target_id_display()
{
    let mut registry = SessionRegistry::new();
    let (id, _) = registry.register(controller("one"));
    assert_eq!(format!("{}", id), "target#1");
}

#[test]
fn test_get_returns_the_same_handle()
{
    let mut registry = SessionRegistry::new();
    let (id, handle) = registry.register(controller("one"));

    let fetched = registry.get(id).unwrap();
    assert!(Arc::ptr_eq(&handle, &fetched));
    assert_eq!(fetched.lock().unwrap().target().module, "one");
}

#[test]
fn test_get_with_stale_id_is_none()
{
    let mut registry = SessionRegistry::new();
    let (id, _) = registry.register(controller("one"));
    assert!(registry.remove(id).is_some());
    assert!(registry.get(id).is_none());
}

#[test]
fn test_remove_forgets_the_session()
{
    let mut registry = SessionRegistry::new();
    let (first, _) = registry.register(controller("one"));
    let (second, _) = registry.register(controller("two"));

    let removed = registry.remove(first).unwrap();
    assert_eq!(removed.lock().unwrap().target().module, "one");
    assert!(registry.get(first).is_none());
    assert_eq!(registry.ids(), vec![second]);

    assert!(registry.remove(first).is_none());
}

#[test]
fn test_ids_are_never_reused()
{
    let mut registry = SessionRegistry::new();
    let (first, _) = registry.register(controller("one"));
    assert!(registry.remove(first).is_some());

    let (second, _) = registry.register(controller("two"));
    assert_ne!(first, second);
}

#[test]
fn test_global_registry_round_trip()
{
    let (id, handle) = registry::register_global(controller("global"));

    let fetched = registry::get_global(id).unwrap();
    assert!(Arc::ptr_eq(&handle, &fetched));

    let removed = registry::remove_global(id).unwrap();
    assert!(Arc::ptr_eq(&handle, &removed));
    assert!(registry::get_global(id).is_none());
}
