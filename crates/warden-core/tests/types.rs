//! Tests for platform-agnostic types

use warden_core::types::{
    Address, Architecture, ModuleInfo, ModuleMap, ModuleOffset, ProcessId, ProcessInfo,
    RegisterFile, RegisterId, StackSlot, StopReason, TargetDescriptor, ThreadId, ThreadInfo,
};

#[test]
fn test_process_id_from_u32()
{
    let pid = ProcessId::from(12345);
    assert_eq!(pid.0, 12345);
    assert_eq!(pid.value(), 12345);
}

#[test]
fn test_thread_id_from_u64()
{
    let tid = ThreadId::from(7u64);
    assert_eq!(tid.value(), 7);
}

#[test]
fn test_address_round_trips_through_u64()
{
    let address = Address::from(0x400100u64);
    assert_eq!(address.value(), 0x400100);
    assert_eq!(u64::from(address), 0x400100);
    assert_eq!(Address::new(0x400100), address);
}

#[test]
fn test_address_zero_sentinel()
{
    assert_eq!(Address::ZERO.value(), 0);
    assert_eq!(Address::ZERO, Address::new(0));
}

#[test]
fn test_address_checked_add_detects_overflow()
{
    let address = Address::new(u64::MAX - 1);
    assert_eq!(address.checked_add(1), Some(Address::new(u64::MAX)));
    assert_eq!(address.checked_add(2), None);
}

#[test]
fn test_address_display_is_fixed_width_hex()
{
    assert_eq!(format!("{}", Address::new(0x400100)), "0x0000000000400100");
}

#[test]
fn test_module_offset_display()
{
    let site = ModuleOffset::new("app", 0x1f0);
    assert_eq!(format!("{}", site), "app+0x1f0");
}

#[test]
fn test_module_offset_equality_includes_the_module()
{
    assert_eq!(ModuleOffset::new("app", 0x100), ModuleOffset::new("app", 0x100));
    assert_ne!(
        ModuleOffset::new("app", 0x100),
        ModuleOffset::new("libshim.so", 0x100),
    );
}

#[test]
fn test_module_info_range()
{
    let info = ModuleInfo::new("app", Address::new(0x1000), 0x200);
    assert_eq!(info.end(), Address::new(0x1200));
    assert!(info.contains(Address::new(0x1000)));
    assert!(info.contains(Address::new(0x11ff)));
    assert!(!info.contains(Address::new(0x1200)));
    assert!(!info.contains(Address::new(0xfff)));
}

#[test]
fn test_module_map_lookup()
{
    let mut map = ModuleMap::new();
    assert!(map.is_empty());

    map.rebuild(vec![
        ModuleInfo::new("app", Address::new(0x1000), 0x200),
        ModuleInfo::new("libshim.so", Address::new(0x8000), 0x100),
    ]);
    assert_eq!(map.len(), 2);
    assert_eq!(map.get("app").map(|m| m.base), Some(Address::new(0x1000)));
    assert!(map.get("libother.so").is_none());
    assert_eq!(
        map.containing(Address::new(0x8010)).map(|m| m.name.as_str()),
        Some("libshim.so"),
    );

    map.clear();
    assert!(map.is_empty());
}

#[test]
fn test_process_info_display()
{
    let info = ProcessInfo::new(ProcessId(321), "spin_target");
    assert_eq!(format!("{}", info), "spin_target (321)");
}

#[test]
fn test_thread_info_fields()
{
    let thread = ThreadInfo::new(ThreadId(2), Address::new(0x4000));
    assert_eq!(thread.id, ThreadId(2));
    assert_eq!(thread.ip, Address::new(0x4000));
}

#[test]
fn test_stop_reason_display()
{
    assert_eq!(format!("{}", StopReason::InitialBreakpoint), "initial breakpoint");
    assert_eq!(format!("{}", StopReason::Breakpoint), "breakpoint");
    assert_eq!(format!("{}", StopReason::SingleStep), "single step");
    assert_eq!(format!("{}", StopReason::Pause), "paused");
    assert_eq!(format!("{}", StopReason::Signal(11)), "signal 11");
}

#[test]
fn test_architecture_host_is_concrete()
{
    let host = Architecture::host();
    let message = format!("{}", host);
    assert!(!message.is_empty());
}

#[test]
fn test_register_file_get_set()
{
    let mut regs = RegisterFile::new();
    assert_eq!(regs.get(RegisterId::Pc), Some(0));

    assert_eq!(regs.set(RegisterId::Pc, 0x4000), Some(()));
    assert_eq!(regs.set(RegisterId::Sp, 0x7000), Some(()));
    assert_eq!(regs.pc, Address::new(0x4000));
    assert_eq!(regs.get(RegisterId::Sp), Some(0x7000));
}

#[test]
fn test_register_file_general_registers()
{
    let mut regs = RegisterFile::new();
    assert_eq!(regs.get(RegisterId::General(0)), None);
    assert_eq!(regs.set(RegisterId::General(0), 1), None);

    regs.general.push(0xaa);
    regs.general.push(0xbb);
    assert_eq!(regs.get(RegisterId::General(1)), Some(0xbb));
    assert_eq!(regs.set(RegisterId::General(1), 0xcc), Some(()));
    assert_eq!(regs.get(RegisterId::General(1)), Some(0xcc));
    assert_eq!(regs.get(RegisterId::General(7)), None);
}

#[test]
fn test_stack_slot_unreadable_sentinel()
{
    let readable = StackSlot::new(Address::new(0x7000), Some(42));
    let unreadable = StackSlot::new(Address::new(0x7008), None);

    assert!(!readable.is_unreadable());
    assert!(unreadable.is_unreadable());
}

#[test]
fn test_target_descriptor_entry_site()
{
    let target = TargetDescriptor::new("app", Address::new(0x0040_0000), 0x4000)
        .with_entry(Address::new(0x0040_1000))
        .with_path("/tmp/app");

    assert_eq!(target.entry_offset(), 0x1000);
    assert_eq!(target.entry_site(), ModuleOffset::new("app", 0x1000));
    assert_eq!(target.path, std::path::PathBuf::from("/tmp/app"));
}

#[test]
fn test_target_descriptor_entry_defaults_to_base()
{
    let target = TargetDescriptor::new("app", Address::new(0x0040_0000), 0x4000);
    assert_eq!(target.entry_offset(), 0);
    assert_eq!(target.entry_site(), ModuleOffset::new("app", 0));
}
