//! Integration tests for labshim-config
//!
//! These tests go through the real process environment and invocation name.

use labshim_config::path::invocation_name;
use labshim_config::{
    Activation, InactiveReason, MatcherKind, PreloadEnv, ProcessConfig, Variant, HWSF_DEV,
    HWSF_PRG_NAME,
};
use std::ffi::OsString;

/// The only test in this binary that touches the process environment.
#[test]
fn test_from_env_reads_process_environment() {
    std::env::set_var(HWSF_DEV, "path:3-2");
    std::env::set_var(HWSF_PRG_NAME, invocation_name());

    let config = ProcessConfig::from_env(Variant::HardwareSpoof);
    assert!(config.is_active());
    assert_eq!(config.program_name(), invocation_name());
    match config.activation() {
        Activation::Exception(rule) => {
            assert_eq!(rule.kind(), MatcherKind::ByPathSegment);
            assert_eq!(rule.value(), b"3-2");
        }
        other => panic!("unexpected activation: {:?}", other),
    }

    std::env::set_var(HWSF_PRG_NAME, "some_other_tool");
    let config = ProcessConfig::from_env(Variant::HardwareSpoof);
    assert!(matches!(
        config.activation(),
        Activation::Inactive(InactiveReason::ProgramMismatch { .. })
    ));

    std::env::remove_var(HWSF_DEV);
    std::env::remove_var(HWSF_PRG_NAME);
}

/// A launcher-built environment is understood by the library side.
#[test]
fn test_preload_env_round_trip_through_config() {
    let temp = tempfile::tempdir().unwrap();
    let lib = temp.path().join("libfilsel.so");
    std::fs::write(&lib, b"").unwrap();
    let dest = temp.path().join("jtag.conf");

    let vars = PreloadEnv::new(Variant::FileSelect, &lib)
        .program("jtagd")
        .debug(true)
        .rewrite("/home/lab/.jtag.conf", &dest)
        .build(None)
        .unwrap();

    let lookup = |name: &str| {
        vars.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| OsString::from(v))
    };

    let config = ProcessConfig::from_lookup(Variant::FileSelect, "jtagd", lookup);
    assert!(config.debug());
    match config.activation() {
        Activation::Rewrite(rule) => {
            assert_eq!(rule.source(), b"/home/lab/.jtag.conf");
            assert_eq!(rule.dest().to_str().unwrap(), dest.to_str().unwrap());
        }
        other => panic!("unexpected activation: {:?}", other),
    }

    // Same variables, different program: passthrough
    let config = ProcessConfig::from_lookup(Variant::FileSelect, "quartus_pgm", lookup);
    assert!(!config.is_active());
}

/// Variables of one variant never activate the other.
#[test]
fn test_variants_use_disjoint_variables() {
    let vars = [("FILSEL_ORG_PATH", "/a"), ("FILSEL_DEST_PATH", "/b")];
    let lookup = |name: &str| {
        vars.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| OsString::from(v))
    };

    assert!(ProcessConfig::from_lookup(Variant::FileSelect, "x", lookup).is_active());
    assert!(!ProcessConfig::from_lookup(Variant::HardwareSpoof, "x", lookup).is_active());
}
