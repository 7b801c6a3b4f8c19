//! Integration tests for the fact exporter: formats, determinism, and the
//! on-disk layout the Datalog analyser consumes.

use destack::builder::CfgBuilder;
use destack::config::Config;
use destack::export::FactExporter;
use destack::parser::{parse_hex, partition};
use std::collections::{BTreeMap, BTreeSet};

fn facts(hex_src: &str, config: &Config) -> BTreeMap<&'static str, BTreeSet<String>> {
    let cfg = CfgBuilder::new(config).build(partition(parse_hex(hex_src, true).unwrap()));
    FactExporter::new(&cfg).relations()
}

#[test]
fn test_all_relations_present() {
    let rel = facts("00", &Config::default());
    for name in [
        "block.facts",
        "op.facts",
        "edge.facts",
        "entry.facts",
        "exit.facts",
        "def.facts",
        "use.facts",
        "value.facts",
        "dom.facts",
        "imdom.facts",
        "pdom.facts",
        "impdom.facts",
        "unresolved.facts",
    ] {
        assert!(rel.contains_key(name), "missing relation {name}");
    }
}

#[test]
fn test_value_facts_hex_format() {
    // PUSH1 0; PUSH1 255; ADD; POP; STOP
    let rel = facts("600060ff015000", &Config::default());
    // Lowercase minimal hex with 0x prefix; zero prints as 0x0.
    assert!(rel["value.facts"].contains("V0_0\t0x0"));
    assert!(rel["value.facts"].contains("V2_0\t0xff"));
    assert!(rel["value.facts"].contains("V4_0\t0xff"));
}

#[test]
fn test_value_facts_only_singletons() {
    // CALLDATALOAD defines an unconstrained variable: no value row.
    let rel = facts("60003500", &Config::default());
    assert!(!rel["value.facts"].iter().any(|row| row.starts_with("V2_0\t")));
}

#[test]
fn test_block_ids_carry_clone_suffix() {
    let rel = facts("60086006 56 00 5b56 5b600e600656 5b00", &Config::default());
    assert!(rel["block.facts"].contains("B0x6"));
    assert!(rel["block.facts"].contains("B0x6_1"));
    // Each context's single outgoing edge is visible.
    assert!(
        rel["edge.facts"].contains("B0x6\tB0x8")
            || rel["edge.facts"].contains("B0x6\tB0xe")
    );
}

#[test]
fn test_use_facts_are_indexed() {
    // PUSH1 2; PUSH1 8; EXP; POP; STOP — EXP uses (base, exponent).
    let rel = facts("600260080a5000", &Config::default());
    assert!(rel["use.facts"].contains("4\t0\tV2_0"));
    assert!(rel["use.facts"].contains("4\t1\tV0_0"));
}

#[test]
fn test_unresolved_relation_names_block_and_pc() {
    let rel = facts("600160025601", &Config::default());
    assert!(rel["unresolved.facts"].contains("B0x0\t4"));
}

#[test]
fn test_files_are_tab_separated_lf_terminated() {
    let config = Config::default();
    let cfg = CfgBuilder::new(&config).build(partition(parse_hex("6003565b00", true).unwrap()));
    let dir = tempfile::tempdir().unwrap();
    FactExporter::new(&cfg).write_dir(dir.path()).unwrap();

    let edges = std::fs::read_to_string(dir.path().join("edge.facts")).unwrap();
    assert_eq!(edges, "B0x0\tB0x3\n");
    let ops = std::fs::read_to_string(dir.path().join("op.facts")).unwrap();
    for line in ops.lines() {
        assert_eq!(line.split('\t').count(), 2);
    }
    assert!(ops.ends_with('\n'));
}

#[test]
fn test_export_creates_missing_directory() {
    let config = Config::default();
    let cfg = CfgBuilder::new(&config).build(partition(parse_hex("00", true).unwrap()));
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    FactExporter::new(&cfg).write_dir(&nested).unwrap();
    assert!(nested.join("block.facts").exists());
}

#[test]
fn test_byte_identical_across_runs() {
    let config = Config::default();
    let source = "6000356007 57 00 5b600b565b00";
    let render = || {
        let cfg =
            CfgBuilder::new(&config).build(partition(parse_hex(source, true).unwrap()));
        let dir = tempfile::tempdir().unwrap();
        FactExporter::new(&cfg).write_dir(dir.path()).unwrap();
        let mut all = String::new();
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        names.sort();
        for path in names {
            all.push_str(&std::fs::read_to_string(path).unwrap());
        }
        all
    };
    assert_eq!(render(), render());
}
