// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;
use tempfile::tempdir;

#[test]
fn round_trip() {
    let dir = tempdir().unwrap();
    let seal = Seal::load_or_create(dir.path()).unwrap();

    let sealed = seal.seal(&Secret::new("ghs_supersecret")).unwrap();
    assert!(sealed.expose().starts_with("enc1:"));
    assert!(!sealed.expose().contains("supersecret"));

    let opened = seal.open(&sealed).unwrap();
    assert_eq!(opened.expose(), "ghs_supersecret");
}

#[test]
fn fresh_nonce_per_seal() {
    let dir = tempdir().unwrap();
    let seal = Seal::load_or_create(dir.path()).unwrap();
    let a = seal.seal(&Secret::new("same")).unwrap();
    let b = seal.seal(&Secret::new("same")).unwrap();
    assert_ne!(a.expose(), b.expose());
}

#[test]
fn key_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let sealed = {
        let seal = Seal::load_or_create(dir.path()).unwrap();
        seal.seal(&Secret::new("tok")).unwrap()
    };
    let seal = Seal::load_or_create(dir.path()).unwrap();
    assert_eq!(seal.open(&sealed).unwrap().expose(), "tok");
}

#[test]
fn unsealed_legacy_values_pass_through() {
    let dir = tempdir().unwrap();
    let seal = Seal::load_or_create(dir.path()).unwrap();
    assert_eq!(seal.open(&Secret::new("plain-tok")).unwrap().expose(), "plain-tok");
}

#[test]
fn wrong_key_fails_closed() {
    let a_dir = tempdir().unwrap();
    let b_dir = tempdir().unwrap();
    let sealed = Seal::load_or_create(a_dir.path()).unwrap().seal(&Secret::new("tok")).unwrap();
    let other = Seal::load_or_create(b_dir.path()).unwrap();
    assert!(matches!(other.open(&sealed), Err(StoreError::Crypto(_))));
}

#[cfg(unix)]
#[test]
fn key_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempdir().unwrap();
    let _seal = Seal::load_or_create(dir.path()).unwrap();
    let mode =
        std::fs::metadata(dir.path().join("master.key")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
