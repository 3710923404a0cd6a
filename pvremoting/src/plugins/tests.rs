// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use super::*;

fn plugin(name: &str, loaded: bool) -> PluginRecord {
    let mut record = PluginRecord::new(name, &format!("/opt/plugins/lib{name}.so"));
    record.loaded = loaded;
    record.version = "1.0".to_string();
    record
}

fn collection(records: Vec<PluginRecord>) -> PluginsInformation {
    let mut info = PluginsInformation::new();
    for record in records {
        info.push(record);
    }
    info
}

#[test]
fn test_merge_unions_by_name() {
    let a = collection(vec![plugin("A", true), plugin("B", false)]);
    let b = collection(vec![plugin("B", true), plugin("C", false)]);

    let merged = PluginsInformation::merge(&a, &b);
    let names = merged.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
    assert_eq!(vec!["A", "B", "C"], names);
    assert!(merged.find("B").map(|p| p.loaded).unwrap_or(false));
    assert!(!merged.find("C").map(|p| p.loaded).unwrap_or(true));
}

#[test]
fn test_merge_loaded_is_commutative() {
    let a = collection(vec![plugin("A", true), plugin("B", false), plugin("C", false)]);
    let b = collection(vec![plugin("A", false), plugin("B", true), plugin("D", true)]);

    let ab = PluginsInformation::merge(&a, &b);
    let ba = PluginsInformation::merge(&b, &a);
    assert_eq!(ab.len(), ba.len());
    for record in ab.iter() {
        let other = ba.find(&record.name).expect("Plugin missing from one merge");
        assert_eq!(record.loaded, other.loaded, "plugin {}", record.name);
    }
}

#[test]
fn test_forced_auto_load_wins_in_either_order() {
    let mut forced = collection(vec![plugin("A", true)]);
    forced.set_auto_load_and_force(0, true);
    let mut plain = collection(vec![plugin("A", true)]);
    plain.set_auto_load(0, false);

    let forced_first = PluginsInformation::merge(&forced, &plain);
    let plain_first = PluginsInformation::merge(&plain, &forced);
    for merged in [forced_first, plain_first] {
        let record = merged.find("A").expect("Missing plugin");
        assert!(record.auto_load);
        assert!(record.is_auto_load_forced());
    }
}

#[test]
fn test_unforced_auto_load_keeps_receiving_side() {
    let mut a = collection(vec![plugin("A", false)]);
    a.set_auto_load(0, true);
    let b = collection(vec![plugin("A", true)]);

    let merged = PluginsInformation::merge(&a, &b);
    let record = merged.find("A").expect("Missing plugin");
    // the loaded side's metadata with the receiving side's auto-load
    assert!(record.loaded);
    assert!(record.auto_load);
}

#[test]
fn test_update_keeps_auto_load() {
    let mut local = collection(vec![plugin("A", false)]);
    local.set_auto_load(0, true);

    let mut remote = PluginsInformation::with_search_paths("/srv/plugins");
    let mut a = plugin("A", true);
    a.version = "2.0".to_string();
    remote.push(a);
    remote.push(plugin("B", true));

    local.update(&remote);
    let a = local.find("A").expect("Missing plugin");
    assert!(a.loaded);
    assert!(a.auto_load);
    assert_eq!("2.0", a.version);
    assert!(local.find("B").is_some());
    assert_eq!("/srv/plugins", local.search_paths());
}

#[test]
fn test_index_setters() {
    let mut info = collection(vec![plugin("A", true)]);
    assert!(info.set_status_message(0, "custom"));
    assert_eq!(Some("custom"), info.get(0).map(|p| p.status_message.as_str()));
    assert!(!info.set_status_message(1, "nobody"));
    assert!(!info.set_auto_load(3, true));
    assert!(!info.set_auto_load_and_force(3, true));
}

#[test]
fn test_stream_roundtrip_drops_force_flag() {
    let mut info = PluginsInformation::with_search_paths("/a:/b");
    let mut record = plugin("A", true);
    record.required_plugins = vec!["B".to_string()];
    record.description = "Computes thickness".to_string();
    info.push(record);
    info.set_auto_load_and_force(0, true);

    let decoded = PluginsInformation::copy_from_stream(&info.copy_to_stream())
        .expect("Failed to decode plugins information");
    assert_eq!("/a:/b", decoded.search_paths());
    let record = decoded.get(0).expect("Missing plugin");
    assert!(record.auto_load);
    assert!(!record.is_auto_load_forced());
    assert_eq!(vec!["B".to_string()], record.required_plugins);
}

#[test]
fn test_validate_cross_process_requirements() {
    let mut server_side = plugin("ServerThing", true);
    server_side.required_on_client = true;
    let mut client_side = plugin("ClientThing", true);
    client_side.required_on_server = true;
    let mut both = plugin("Both", true);
    both.required_on_client = true;

    let mut server = collection(vec![server_side, both.clone()]);
    let mut client = collection(vec![client_side, both]);

    assert!(!PluginsInformation::validate_requirements(&mut client, &mut server));
    assert_eq!(
        "Must be loaded on Client as well",
        server.find("ServerThing").map(|p| p.status_message.as_str()).unwrap_or_default()
    );
    assert_eq!(
        "Must be loaded on Server as well",
        client.find("ClientThing").map(|p| p.status_message.as_str()).unwrap_or_default()
    );
    assert_eq!(
        Some(""),
        server.find("Both").map(|p| p.status_message.as_str())
    );
}

#[test]
fn test_validate_required_plugins() {
    let mut dependent = plugin("Dependent", true);
    dependent.required_plugins = vec!["Base".to_string(), "Missing".to_string()];
    let mut server = collection(vec![dependent, plugin("Base", true)]);
    let mut client = PluginsInformation::new();

    assert!(!PluginsInformation::validate_requirements(&mut client, &mut server));
    assert_eq!(
        Some("Required plugin 'Missing' is not loaded on Server"),
        server.find("Dependent").map(|p| p.status_message.as_str())
    );

    server.push(plugin("Missing", true));
    assert!(PluginsInformation::validate_requirements(&mut client, &mut server));
    assert!(server.iter().all(|p| p.status_message.is_empty()));
}

#[test]
fn test_unloaded_plugins_are_not_checked() {
    let mut idle = plugin("Idle", false);
    idle.required_on_client = true;
    idle.required_plugins = vec!["Nothing".to_string()];
    let mut server = collection(vec![idle]);
    let mut client = PluginsInformation::new();
    assert!(PluginsInformation::validate_requirements(&mut client, &mut server));
}
