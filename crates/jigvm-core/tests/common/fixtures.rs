//! Fixture loading utilities for tests.

use std::collections::BTreeMap;
use std::path::Path;

/// Directory holding the `<stem>.wat` / `<stem>.abi.json` fixture pairs.
pub const FIXTURE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Read a fixture file.
///
/// # Panics
///
/// Panics if the file does not exist.
pub fn read_fixture(name: &str) -> String {
    let path = Path::new(FIXTURE_DIR).join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("fixture {} should load: {}", path.display(), e))
}

/// Deploy entries and sources for fixture package `stem`.
///
/// Each `(from, to)` pair is substituted into the ABI, which is how package
/// ids of dependencies get filled in.
pub fn package_sources(
    stem: &str,
    replacements: &[(&str, String)],
) -> (Vec<String>, BTreeMap<String, String>) {
    let entry = format!("{}.wat", stem);
    let abi_name = format!("{}.abi.json", stem);
    let mut abi = read_fixture(&abi_name);
    for (from, to) in replacements {
        abi = abi.replace(from, to);
    }
    let mut sources = BTreeMap::new();
    sources.insert(entry.clone(), read_fixture(&entry));
    sources.insert(abi_name, abi);
    (vec![entry], sources)
}
