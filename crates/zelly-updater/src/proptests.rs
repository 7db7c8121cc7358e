//! Property-based tests for snapshots and the session state machine.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use proptest::prelude::*;
use tempfile::TempDir;

use crate::backup::BackupManager;
use crate::session::{Stage, UpdateState};
use crate::tree;

/// Relative file path → content. Directories never end in `.bin`, files
/// always do, so no path is both.
fn arb_tree() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    let path = (prop::collection::vec("[a-z]{1,6}", 0..3), "[a-z]{1,6}")
        .prop_map(|(dirs, file)| {
            let mut parts = dirs;
            parts.push(format!("{file}.bin"));
            parts.join("/")
        });
    prop::collection::btree_map(path, prop::collection::vec(any::<u8>(), 0..256), 1..12)
}

fn write_tree(root: &Path, files: &BTreeMap<String, Vec<u8>>) {
    for (relative, content) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    tree::digest_tree(root)
        .unwrap()
        .into_iter()
        .filter(|(_, entry)| entry.is_file())
        .map(|(relative, _)| {
            let content = fs::read(root.join(&relative)).unwrap();
            (relative, content)
        })
        .collect()
}

/// Extra entries laid over a file tree: empty directories and links.
#[cfg(unix)]
#[derive(Debug, Clone)]
enum Extra {
    EmptyDir(String),
    Link { name: String, target: String },
}

#[cfg(unix)]
fn arb_extras() -> impl Strategy<Value = Vec<Extra>> {
    // `.dir` and `.lnk` never collide with each other or with `.bin` files.
    let empty_dir = prop::collection::vec("[a-z]{1,6}", 1..5)
        .prop_map(|parts| Extra::EmptyDir(format!("{}.dir", parts.join("/"))));
    let link = ("[a-z]{1,6}", "(\\.\\./)?[a-z]{1,6}(/[a-z]{1,6})?").prop_map(|(name, target)| {
        Extra::Link {
            name: format!("{name}.lnk"),
            target,
        }
    });
    prop::collection::vec(prop_oneof![empty_dir, link], 0..6)
}

#[cfg(unix)]
fn write_extras(root: &Path, extras: &[Extra]) {
    for extra in extras {
        match extra {
            Extra::EmptyDir(relative) => fs::create_dir_all(root.join(relative)).unwrap(),
            Extra::Link { name, target } => {
                let path = root.join(name);
                if fs::symlink_metadata(&path).is_err() {
                    std::os::unix::fs::symlink(target, path).unwrap();
                }
            }
        }
    }
}

fn arb_state() -> impl Strategy<Value = UpdateState> {
    let stage = prop_oneof![
        Just(Stage::Preparing),
        Just(Stage::Downloading),
        Just(Stage::AwaitingAppExit),
        Just(Stage::BackingUp),
        Just(Stage::Installing),
        Just(Stage::Launching),
    ];
    prop_oneof![
        Just(UpdateState::Idle),
        Just(UpdateState::Preparing),
        Just(UpdateState::Downloading),
        Just(UpdateState::AwaitingAppExit),
        Just(UpdateState::BackingUp),
        Just(UpdateState::Installing),
        Just(UpdateState::Launching),
        Just(UpdateState::Completed),
        stage.prop_map(UpdateState::Failed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever the installer does to the tree, restore brings back the
    /// snapshot byte for byte.
    #[test]
    fn prop_restore_reproduces_snapshot(
        original in arb_tree(),
        replacement in arb_tree(),
    ) {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        write_tree(&app, &original);

        let manager = BackupManager::new(temp.path().join("backups"));
        let snapshot = manager.snapshot(&app).unwrap();

        fs::remove_dir_all(&app).unwrap();
        write_tree(&app, &replacement);

        manager.restore(&snapshot).unwrap();
        prop_assert_eq!(read_tree(&app), original);
    }

    /// The manifest lists exactly the files of the source tree.
    #[test]
    fn prop_manifest_covers_every_file(files in arb_tree()) {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        write_tree(&app, &files);

        let snapshot = BackupManager::new(temp.path().join("backups"))
            .snapshot(&app)
            .unwrap();
        let listed: Vec<_> = snapshot
            .manifest
            .iter()
            .filter(|(_, entry)| entry.is_file())
            .map(|(relative, _)| relative.clone())
            .collect();
        let expected: Vec<_> = files.keys().cloned().collect();
        prop_assert_eq!(listed, expected);
    }
}

#[cfg(unix)]
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Restore reproduces links (to directories, files or nothing) and
    /// empty directories at any depth, not only regular files.
    #[test]
    fn prop_restore_reproduces_links_and_empty_dirs(
        original in arb_tree(),
        extras in arb_extras(),
        replacement in arb_tree(),
    ) {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        write_tree(&app, &original);
        write_extras(&app, &extras);
        let before = tree::digest_tree(&app).unwrap();

        let manager = BackupManager::new(temp.path().join("backups"));
        let snapshot = manager.snapshot(&app).unwrap();
        prop_assert_eq!(&snapshot.manifest, &before);

        fs::remove_dir_all(&app).unwrap();
        write_tree(&app, &replacement);

        manager.restore(&snapshot).unwrap();
        prop_assert_eq!(tree::digest_tree(&app).unwrap(), before);
        prop_assert_eq!(read_tree(&app), original);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Terminal states have no successors.
    #[test]
    fn prop_terminal_states_are_final(from in arb_state(), to in arb_state()) {
        if from.is_terminal() {
            prop_assert!(!from.can_advance_to(to));
        }
    }

    /// A state can only fail in its own stage.
    #[test]
    fn prop_failure_matches_stage(from in arb_state(), to in arb_state()) {
        if let (true, UpdateState::Failed(stage)) = (from.can_advance_to(to), to) {
            let expected = match from {
                UpdateState::Idle | UpdateState::Preparing => Stage::Preparing,
                UpdateState::Downloading => Stage::Downloading,
                UpdateState::AwaitingAppExit => Stage::AwaitingAppExit,
                UpdateState::BackingUp => Stage::BackingUp,
                UpdateState::Installing => Stage::Installing,
                UpdateState::Launching => Stage::Launching,
                UpdateState::Completed | UpdateState::Failed(_) => unreachable!(),
            };
            prop_assert_eq!(stage, expected);
        }
    }
}
