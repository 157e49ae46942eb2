use std::collections::BTreeSet;

use tably_common::protocol::jsonrpc::SUPPORTED_PROTOCOL_VERSIONS;
use tably_common::protocol::rpc_methods::{HOST_METHODS, IMPLEMENTED_METHODS};

fn load_contract() -> serde_json::Value {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts/jsonrpc-methods.json");
    let content = std::fs::read_to_string(path).expect("contract file should be readable");
    serde_json::from_str(&content).expect("contract file should be valid JSON")
}

fn contract_set<'a>(contract: &'a serde_json::Value, key: &str) -> BTreeSet<&'a str> {
    contract[key]
        .as_array()
        .unwrap_or_else(|| panic!("{key} should be an array"))
        .iter()
        .map(|v| v.as_str().expect("method should be a string"))
        .collect()
}

#[test]
fn implemented_methods_match_contract() {
    let contract = load_contract();
    let expected = contract_set(&contract, "implemented_methods");
    let actual: BTreeSet<&str> = IMPLEMENTED_METHODS.iter().copied().collect();
    assert_eq!(actual, expected, "IMPLEMENTED_METHODS diverged from contract");
}

#[test]
fn host_methods_match_contract() {
    let contract = load_contract();
    let expected = contract_set(&contract, "host_methods");
    let actual: BTreeSet<&str> = HOST_METHODS.iter().copied().collect();
    assert_eq!(actual, expected, "HOST_METHODS diverged from contract");
}

#[test]
fn rpc_protocol_versions_match_contract() {
    let contract = load_contract();
    let expected: Vec<&str> = contract["rpc_protocol_versions"]
        .as_array()
        .expect("rpc_protocol_versions should be an array")
        .iter()
        .map(|v| v.as_str().expect("version should be a string"))
        .collect();

    assert_eq!(
        SUPPORTED_PROTOCOL_VERSIONS,
        &expected[..],
        "SUPPORTED_PROTOCOL_VERSIONS diverged from contract"
    );
}

#[test]
fn method_names_are_namespaced() {
    for method in IMPLEMENTED_METHODS.iter().chain(HOST_METHODS) {
        let (namespace, name) = method.split_once('.').expect("method should contain a dot");
        assert!(!namespace.is_empty() && !name.is_empty(), "malformed method `{method}`");
    }
}
