//! End-to-end index operation scenarios over real working trees.

mod common;

use common::{all_entries, row_key, Tree};
use geodex::{
    add_to_index, entry_exists, get_entry, get_matching_entries, list_entries, move_entry,
    remove_from_index, sync_index, sync_local_mtimes, Entry, EntryType, GeodexError,
};
use std::collections::HashSet;

fn add_all(tree: &Tree, db: &mut geodex::Database) {
    add_to_index(db, &[tree.root().to_path_buf()], None).unwrap();
}

#[test]
fn init_and_add_creates_ancestor_directories() {
    let (tree, mut db) = Tree::new();
    let img = tree.root().join("a/b/img.png");
    std::fs::create_dir_all(tree.root().join("a/b")).unwrap();
    image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([x as u8, y as u8, 0]))
        .save(&img)
        .unwrap();

    add_to_index(&mut db, &[img], None).unwrap();

    let entries = all_entries(&db);
    let summary: Vec<(&str, EntryType, i64)> = entries
        .iter()
        .map(|e| (e.path.as_str(), e.entry_type, e.depth))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a", EntryType::Directory, 0),
            ("a/b", EntryType::Directory, 1),
            ("a/b/img.png", EntryType::Image, 2),
        ]
    );

    let image_entry = get_entry(&db, "a/b/img.png").unwrap().unwrap();
    assert_eq!(image_entry.hash.len(), 64);
    assert!(image_entry.size > 0);
    assert_eq!(image_entry.meta.as_ref().unwrap()["width"], 8);

    assert!(db.last_update().unwrap().is_some());
}

#[test]
fn committed_states_hold_the_invariants() {
    let (tree, mut db) = Tree::new();
    tree.write("a/b/c/deep.txt", b"deep");
    tree.write("a/x.txt", b"x");
    tree.write("top.txt", b"top");
    add_all(&tree, &mut db);

    let entries = all_entries(&db);
    let paths: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();

    for e in &entries {
        // depth == count('/')
        assert_eq!(e.depth, e.path.matches('/').count() as i64, "{}", e.path);

        // every proper prefix is a Directory entry
        let mut prefix = e.path.as_str();
        while let Some(idx) = prefix.rfind('/') {
            prefix = &prefix[..idx];
            assert!(paths.contains(prefix), "missing prefix {prefix}");
        }

        if e.entry_type == EntryType::Directory {
            assert!(e.hash.is_empty());
            assert_eq!(e.size, 0);
            assert!(e.meta.is_none());
            assert!(e.point_geom.is_none() && e.polygon_geom.is_none());
        }
    }

    // path uniqueness
    assert_eq!(paths.len(), entries.len());
}

#[test]
fn add_twice_is_idempotent() {
    let (tree, mut db) = Tree::new();
    tree.write("a/one.txt", b"one");
    tree.write("two.txt", b"two");
    add_all(&tree, &mut db);

    let before: Vec<_> = all_entries(&db).iter().map(row_key).collect();

    let mut touched = 0;
    add_to_index(
        &mut db,
        &[tree.root().to_path_buf()],
        Some(&mut |_: &Entry, _| {
            touched += 1;
            true
        }),
    )
    .unwrap();

    assert_eq!(touched, 0);
    let after: Vec<_> = all_entries(&db).iter().map(row_key).collect();
    assert_eq!(before, after);
}

#[test]
fn add_then_sync_is_a_noop() {
    let (tree, mut db) = Tree::new();
    tree.write("a/one.txt", b"one");
    add_all(&tree, &mut db);

    let last_update = db.last_update().unwrap();
    let mut out = Vec::new();
    sync_index(&mut db, &mut out).unwrap();

    assert!(out.is_empty());
    assert_eq!(db.last_update().unwrap(), last_update);
}

#[test]
fn mtime_only_touch_updates_nothing() {
    let (tree, mut db) = Tree::new();
    let file = tree.write("img.bin", b"same content");
    add_all(&tree, &mut db);
    let stored = get_entry(&db, "img.bin").unwrap().unwrap();

    // touch: new mtime, same bytes -> hash comparison says NotModified
    geodex::paths::set_modified_time(&file, stored.mtime + 100).unwrap();
    let mut touched = 0;
    add_to_index(
        &mut db,
        &[file.clone()],
        Some(&mut |_: &Entry, _| {
            touched += 1;
            true
        }),
    )
    .unwrap();
    assert_eq!(touched, 0);
    assert_eq!(
        get_entry(&db, "img.bin").unwrap().unwrap().hash,
        stored.hash
    );

    // rewrite: content change with a new mtime is picked up
    std::fs::write(&file, b"other content").unwrap();
    geodex::paths::set_modified_time(&file, stored.mtime + 200).unwrap();
    let mut updates = Vec::new();
    add_to_index(
        &mut db,
        &[file],
        Some(&mut |e: &Entry, was_update| {
            updates.push((e.path.clone(), was_update));
            true
        }),
    )
    .unwrap();
    assert_eq!(updates, vec![("img.bin".to_string(), true)]);
    assert_ne!(
        get_entry(&db, "img.bin").unwrap().unwrap().hash,
        stored.hash
    );
}

#[test]
fn content_rewrite_without_mtime_change_goes_undetected() {
    let (tree, mut db) = Tree::new();
    let file = tree.write("quiet.txt", b"before");
    add_all(&tree, &mut db);
    let stored = get_entry(&db, "quiet.txt").unwrap().unwrap();

    std::fs::write(&file, b"after!").unwrap();
    geodex::paths::set_modified_time(&file, stored.mtime).unwrap();

    let mut out = Vec::new();
    sync_index(&mut db, &mut out).unwrap();
    assert!(out.is_empty());
    assert_eq!(
        get_entry(&db, "quiet.txt").unwrap().unwrap().hash,
        stored.hash
    );
}

#[test]
fn move_file_over_existing_file_replaces_it() {
    let (tree, mut db) = Tree::new();
    tree.write("a/b/img.png", b"img-bytes");
    tree.write("a/b/pic.png", b"pic-bytes");
    add_all(&tree, &mut db);

    let img_hash = get_entry(&db, "a/b/img.png").unwrap().unwrap().hash;
    move_entry(&mut db, "a/b/img.png", "a/b/pic.png").unwrap();

    assert!(!entry_exists(&db, "a/b/img.png").unwrap());
    let pic = get_entry(&db, "a/b/pic.png").unwrap().unwrap();
    assert_eq!(pic.hash, img_hash);
}

#[test]
fn directory_move_rewrites_the_subtree() {
    let (tree, mut db) = Tree::new();
    tree.write("a/b/one.txt", b"1");
    tree.write("a/b/c/two.txt", b"2");
    add_all(&tree, &mut db);

    move_entry(&mut db, "a/b", "a/c").unwrap();

    let paths: Vec<String> = all_entries(&db).iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec!["a", "a/c", "a/c/c", "a/c/c/two.txt", "a/c/one.txt"]);

    let moved_dir = get_entry(&db, "a/c").unwrap().unwrap();
    assert_eq!(moved_dir.entry_type, EntryType::Directory);
    assert_eq!(moved_dir.depth, 1);
}

#[test]
fn move_round_trip_restores_rows() {
    let (tree, mut db) = Tree::new();
    tree.write("a/b/one.txt", b"1");
    tree.write("a/b/c/two.txt", b"2");
    add_all(&tree, &mut db);

    let before: Vec<_> = all_entries(&db).iter().map(row_key).collect();
    move_entry(&mut db, "a/b", "a/z").unwrap();
    move_entry(&mut db, "a/z", "a/b").unwrap();
    let after: Vec<_> = all_entries(&db).iter().map(row_key).collect();

    assert_eq!(before, after);
}

#[test]
fn move_validations() {
    let (tree, mut db) = Tree::new();
    tree.write("a/file.txt", b"f");
    tree.write("b/other.txt", b"o");
    add_all(&tree, &mut db);

    for (source, dest) in [
        ("a/file.txt/", "a/dest.txt"),
        ("a/file.txt", "a/dest.txt/"),
        ("a/../file.txt", "a/dest.txt"),
        ("a/file.txt", "./dest.txt"),
    ] {
        assert!(matches!(
            move_entry(&mut db, source, dest),
            Err(GeodexError::InvalidArgument(_))
        ));
    }

    // missing source
    assert!(move_entry(&mut db, "nope.txt", "a/dest.txt").is_err());
    // file onto a directory
    assert!(move_entry(&mut db, "a/file.txt", "b").is_err());
    // directory onto an existing file
    assert!(move_entry(&mut db, "a", "b/other.txt").is_err());
    // directory onto an existing directory
    assert!(move_entry(&mut db, "a", "b").is_err());
    // no-op
    move_entry(&mut db, "a/file.txt", "a/file.txt").unwrap();
}

#[test]
fn sync_detects_deletion_and_invalidates_builds() {
    let (tree, mut db) = Tree::new();
    let file = tree.write("a/b/pic.png", b"to vanish");
    add_all(&tree, &mut db);

    let entry_hash = get_entry(&db, "a/b/pic.png").unwrap().unwrap().hash;
    let build_dir = tree.root().join(".ddb/build").join(&entry_hash);
    std::fs::create_dir_all(&build_dir).unwrap();
    std::fs::write(build_dir.join("thumb.jpg"), b"derived").unwrap();

    std::fs::remove_file(&file).unwrap();
    let mut out = Vec::new();
    sync_index(&mut db, &mut out).unwrap();

    let output = String::from_utf8(out).unwrap();
    assert!(output.contains("D\ta/b/pic.png"));
    assert!(!entry_exists(&db, "a/b/pic.png").unwrap());
    assert!(!build_dir.exists());
}

#[test]
fn like_patterns_are_sanitized() {
    let (tree, mut db) = Tree::new();
    tree.write("weird%name_1.txt", b"match me");
    tree.write("weirdXname_1.txt", b"do not match");
    tree.write("weird%nameX1.txt", b"do not match either");
    add_all(&tree, &mut db);

    let mut removed = Vec::new();
    remove_from_index(
        &mut db,
        &["weird%name_*"],
        Some(&mut |path: &str| {
            removed.push(path.to_string());
            true
        }),
    )
    .unwrap();

    assert_eq!(removed, vec!["weird%name_1.txt".to_string()]);
    assert!(entry_exists(&db, "weirdXname_1.txt").unwrap());
    assert!(entry_exists(&db, "weird%nameX1.txt").unwrap());
}

#[test]
fn removing_a_directory_cascades() {
    let (tree, mut db) = Tree::new();
    tree.write("a/b/one.txt", b"1");
    tree.write("a/two.txt", b"2");
    tree.write("keep.txt", b"k");
    add_all(&tree, &mut db);

    remove_from_index(&mut db, &["a"], None).unwrap();

    let paths: Vec<String> = all_entries(&db).iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec!["keep.txt"]);
}

#[test]
fn remove_without_matches_fails() {
    let (tree, mut db) = Tree::new();
    tree.write("real.txt", b"r");
    add_all(&tree, &mut db);

    assert!(remove_from_index(&mut db, &["missing.txt"], None).is_err());
    assert!(entry_exists(&db, "real.txt").unwrap());
}

#[test]
fn cancelled_add_rolls_back() {
    let (tree, mut db) = Tree::new();
    tree.write("a/one.txt", b"1");
    tree.write("a/two.txt", b"2");

    add_to_index(
        &mut db,
        &[tree.root().to_path_buf()],
        Some(&mut |_: &Entry, _| false),
    )
    .unwrap();

    assert!(all_entries(&db).is_empty());
}

#[test]
fn cancelled_remove_rolls_back() {
    let (tree, mut db) = Tree::new();
    tree.write("a/one.txt", b"1");
    tree.write("a/two.txt", b"2");
    add_all(&tree, &mut db);
    let before = all_entries(&db).len();

    remove_from_index(&mut db, &["a"], Some(&mut |_: &str| false)).unwrap();

    assert_eq!(all_entries(&db).len(), before);
}

#[test]
fn ddb_subtree_is_never_indexed() {
    let (tree, mut db) = Tree::new();
    tree.write("file.txt", b"f");
    add_all(&tree, &mut db);

    assert!(all_entries(&db)
        .iter()
        .all(|e| e.path != ".ddb" && !e.path.starts_with(".ddb/")));

    // adding .ddb explicitly indexes nothing
    add_to_index(&mut db, &[tree.root().join(".ddb")], None).unwrap();
    assert!(!entry_exists(&db, ".ddb").unwrap());
}

#[test]
fn backslash_names_are_skipped_silently() {
    let (tree, mut db) = Tree::new();
    tree.write("clean.txt", b"ok");
    // a name carrying a literal backslash, as left behind by foreign-OS
    // archives
    tree.write(r"dir\file.txt", b"corrupt");
    add_all(&tree, &mut db);

    let paths: Vec<String> = all_entries(&db).iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec!["clean.txt"]);
}

#[test]
fn list_and_match_scope_to_prefixes() {
    let (tree, mut db) = Tree::new();
    tree.write("a/b/one.txt", b"1");
    tree.write("a/b/two.txt", b"2");
    tree.write("a/other/three.txt", b"3");
    add_all(&tree, &mut db);

    let listed: Vec<String> = list_entries(&db, "a/b")
        .unwrap()
        .iter()
        .map(|e| e.path.clone())
        .collect();
    assert_eq!(listed, vec!["a/b", "a/b/one.txt", "a/b/two.txt"]);

    // folder match with depth cap: depth <= max_depth - 1
    let shallow = get_matching_entries(&db, "a", 2, true).unwrap();
    assert!(shallow.iter().all(|e| e.depth <= 1));
    assert!(shallow.iter().any(|e| e.path == "a/b"));
    assert!(!shallow.iter().any(|e| e.path == "a/b/one.txt"));

    assert!(matches!(
        get_matching_entries(&db, "a", -1, false),
        Err(GeodexError::InvalidArgument(_))
    ));
}

#[test]
fn glob_match_expands_to_like() {
    let (tree, mut db) = Tree::new();
    tree.write("shots/IMG_001.txt", b"1");
    tree.write("shots/IMG_002.txt", b"2");
    tree.write("shots/DSC_001.txt", b"3");
    add_all(&tree, &mut db);

    let matches = get_matching_entries(&db, "shots/IMG_*", 0, false).unwrap();
    let paths: Vec<&str> = matches.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["shots/IMG_001.txt", "shots/IMG_002.txt"]);
}

#[test]
fn sync_local_mtimes_pushes_stored_times() {
    let (tree, mut db) = Tree::new();
    let file = tree.write("stamped.txt", b"s");
    add_all(&tree, &mut db);
    let stored = get_entry(&db, "stamped.txt").unwrap().unwrap();

    geodex::paths::set_modified_time(&file, stored.mtime + 5000).unwrap();
    sync_local_mtimes(&db, &[]).unwrap();
    assert_eq!(geodex::paths::modified_time(&file).unwrap(), stored.mtime);

    geodex::paths::set_modified_time(&file, stored.mtime + 5000).unwrap();
    sync_local_mtimes(&db, &["other.txt".to_string()]).unwrap();
    assert_ne!(geodex::paths::modified_time(&file).unwrap(), stored.mtime);
}
