// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use super::*;
use crate::test_support::identity;

fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        vars.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect();
    move |name: &str| map.get(name).cloned()
}

#[test]
fn memory_store_starts_empty() -> anyhow::Result<()> {
    let store = MemoryTokenStore::new();
    assert!(store.get().is_none());
    assert!(store.cached_identity().is_none());
    Ok(())
}

#[test]
fn memory_store_clear_removes_everything() -> anyhow::Result<()> {
    let store = MemoryTokenStore::with_credential(Credential::new("a1", "r1"));
    store.set_cached_identity(identity("u1"));
    store.clear();
    assert!(store.get().is_none());
    assert!(store.cached_identity().is_none());
    Ok(())
}

#[test]
fn identity_clears_independently() -> anyhow::Result<()> {
    let store = MemoryTokenStore::with_credential(Credential::new("a1", "r1"));
    store.set_cached_identity(identity("u1"));
    store.clear_cached_identity();
    assert!(store.cached_identity().is_none());
    assert_eq!(store.get(), Some(Credential::new("a1", "r1")));
    Ok(())
}

#[test]
fn readers_never_see_a_mixed_pair() -> anyhow::Result<()> {
    let store = Arc::new(MemoryTokenStore::with_credential(Credential::new("a0", "r0")));

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for g in 1..=2000u32 {
                store.set(Credential::new(format!("a{g}"), format!("r{g}")));
            }
        })
    };

    for _ in 0..2000 {
        if let Some(cred) = store.get() {
            assert_eq!(cred.access_token[1..], cred.refresh_token[1..], "torn pair observed");
        }
    }
    writer.join().map_err(|_| anyhow::anyhow!("writer panicked"))?;
    Ok(())
}

#[test]
fn state_dir_prefers_explicit_override() -> anyhow::Result<()> {
    let dir = state_dir_with(env_from(&[
        ("DASHAUTH_STATE_DIR", "/srv/dash"),
        ("XDG_STATE_HOME", "/xdg"),
        ("HOME", "/home/u"),
    ]));
    assert_eq!(dir, PathBuf::from("/srv/dash"));
    Ok(())
}

#[test]
fn state_dir_falls_back_to_xdg_then_home() -> anyhow::Result<()> {
    let xdg = state_dir_with(env_from(&[("XDG_STATE_HOME", "/xdg"), ("HOME", "/home/u")]));
    assert_eq!(xdg, PathBuf::from("/xdg/dashauth"));

    let home = state_dir_with(env_from(&[("HOME", "/home/u")]));
    assert_eq!(home, PathBuf::from("/home/u/.local/state/dashauth"));

    let none = state_dir_with(env_from(&[]));
    assert_eq!(none, PathBuf::from(".dashauth"));
    Ok(())
}
