// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tests for directory creation, deletion, copy, move and path resolution

use crate::{FaultOp, FaultPolicy, FsConfig, FsCore, FsError, FsLimits, NodeKind};

fn names(fs: &FsCore, path: &str) -> Vec<String> {
    fs.list_dir(path, false).unwrap().into_iter().map(|e| e.name).collect()
}

#[test]
fn test_create_directory_requires_existing_parent() {
    let mut fs = FsCore::initialize().unwrap();
    assert_eq!(fs.create_directory("/a/b"), Err(FsError::NotFound));
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    assert_eq!(fs.create_directory("/a/b"), Err(FsError::AlreadyExists));
    assert_eq!(fs.create_directory("/"), Err(FsError::AlreadyExists));
    assert_eq!(fs.create_directory("/a/."), Err(FsError::AlreadyExists));
    assert_eq!(fs.create_file("/a/.."), Err(FsError::AlreadyExists));
    assert_eq!(fs.create_symlink("..", "/a"), Err(FsError::AlreadyExists));
    assert_eq!(fs.kind(fs.resolve("/a/b").unwrap()), Ok(NodeKind::Directory));
    fs.verify().unwrap();
}

#[test]
fn test_create_under_file_is_not_a_directory() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_file("/f").unwrap();
    assert_eq!(fs.create_file("/f/g"), Err(FsError::NotADirectory));
    assert_eq!(fs.create_directory("/f/d"), Err(FsError::NotADirectory));
    assert_eq!(fs.resolve("/f/x"), Err(FsError::NotADirectory));
}

#[test]
fn test_name_length_cap() {
    let mut fs = FsCore::new(FsConfig {
        limits: FsLimits { max_name_len: 4 },
        ..FsConfig::default()
    })
    .unwrap();
    fs.create_file("/abcd").unwrap();
    assert_eq!(fs.create_file("/abcde"), Err(FsError::InvalidName));
}

#[test]
fn test_entries_are_listed_in_name_order() {
    let mut fs = FsCore::initialize().unwrap();
    for name in ["zeta", "alpha", "mu", "beta"] {
        fs.create_file(&format!("/{name}")).unwrap();
    }
    assert_eq!(names(&fs, "/"), vec!["alpha", "beta", "mu", "zeta"]);

    let with_reserved = fs.list_dir("/", true).unwrap();
    assert_eq!(with_reserved[0].name, ".");
    assert_eq!(with_reserved[1].name, "..");
    assert_eq!(with_reserved[1].kind, NodeKind::Directory);
    assert_eq!(with_reserved.len(), 6);
}

#[test]
fn test_path_syntax() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    let b = fs.resolve("/a/b").unwrap();
    assert_eq!(fs.resolve("//a///b/"), Ok(b));
    assert_eq!(fs.resolve("/a/b/./."), Ok(b));
    assert_eq!(fs.resolve("/a/b/../b"), Ok(b));
    assert_eq!(fs.resolve("/.."), Ok(fs.root()));
    assert_eq!(fs.resolve("/../../a/.."), Ok(fs.root()));
    assert_eq!(fs.resolve(""), Ok(fs.root()));
    assert_eq!(fs.resolve("/a/missing"), Err(FsError::NotFound));
}

#[test]
fn test_relative_paths_follow_current_directory() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/home").unwrap();
    fs.create_directory("/home/user").unwrap();
    fs.set_current_dir("/home/user").unwrap();
    assert_eq!(fs.current_dir_path().unwrap(), "/home/user");

    fs.create_file("notes").unwrap();
    fs.write("notes", b"relative").unwrap();
    assert_eq!(fs.read("/home/user/notes").unwrap(), b"relative");
    assert_eq!(fs.resolve("../user/notes"), fs.resolve("/home/user/notes"));
    assert_eq!(fs.resolve(""), Ok(fs.current_dir()));

    fs.set_current_dir("..").unwrap();
    assert_eq!(fs.current_dir_path().unwrap(), "/home");
    assert_eq!(fs.set_current_dir("user/notes"), Err(FsError::NotADirectory));
}

#[test]
fn test_deleting_current_directory_falls_back_to_root() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    fs.set_current_dir("/a/b").unwrap();
    fs.delete("/a").unwrap();
    assert_eq!(fs.current_dir(), fs.root());
    assert_eq!(fs.current_dir_path().unwrap(), "/");
}

#[test]
fn test_delete_rejects_root_and_reserved_names() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    assert_eq!(fs.delete("/"), Err(FsError::InvalidOperation));
    assert_eq!(fs.delete("/a/."), Err(FsError::InvalidOperation));
    assert_eq!(fs.delete("/a/.."), Err(FsError::InvalidOperation));
    assert!(fs.exists("/a"));
}

#[test]
fn test_delete_absent_path_fails() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_file("/f").unwrap();
    fs.delete("/f").unwrap();
    assert_eq!(fs.delete("/f"), Err(FsError::NotFound));
    assert_eq!(fs.delete("/nope/f"), Err(FsError::NotFound));
}

#[test]
fn test_recursive_delete_frees_every_node() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    fs.create_directory("/a/b/c").unwrap();
    fs.create_file("/a/b/c/f").unwrap();
    fs.create_file("/a/g").unwrap();
    fs.create_symlink("/a/b/s", "../g").unwrap();
    assert_eq!(fs.stats().nodes, 7);

    fs.delete("/a").unwrap();
    for path in ["/a", "/a/b", "/a/b/c", "/a/b/c/f", "/a/g", "/a/b/s"] {
        assert_eq!(fs.resolve(path), Err(FsError::NotFound), "{path}");
    }
    assert_eq!(fs.stats().nodes, 1);
    fs.verify().unwrap();
}

#[test]
fn test_copy_directory_is_deep() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/src").unwrap();
    fs.create_directory("/src/sub").unwrap();
    fs.create_file("/src/sub/f").unwrap();
    fs.write("/src/sub/f", b"deep").unwrap();
    fs.create_symlink("/src/link", "sub/f").unwrap();

    fs.copy("/src", "/dst").unwrap();
    assert_eq!(fs.read("/dst/sub/f").unwrap(), b"deep");
    assert_eq!(fs.read_link("/dst/link").unwrap(), "sub/f");
    assert_ne!(fs.resolve("/dst/sub/f"), fs.resolve("/src/sub/f"));

    fs.write("/dst/sub/f", b"changed").unwrap();
    assert_eq!(fs.read("/src/sub/f").unwrap(), b"deep");
    let dst_sub = fs.resolve("/dst/sub").unwrap();
    assert_eq!(fs.resolve("/dst/sub/.."), fs.resolve("/dst"));
    assert_eq!(fs.link_count(dst_sub), Ok(1));
    fs.verify().unwrap();
}

#[test]
fn test_copy_directory_into_itself_is_rejected() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    assert_eq!(fs.copy("/a", "/a/b/c"), Err(FsError::InvalidOperation));
    assert_eq!(fs.copy("/a", "/a/copy"), Err(FsError::InvalidOperation));
    assert_eq!(fs.copy("/a", "/a"), Err(FsError::AlreadyExists));
    fs.verify().unwrap();
}

#[test]
fn test_copy_file_replaces_existing_destination() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_file("/a").unwrap();
    fs.write("/a", b"new").unwrap();
    fs.create_file("/b").unwrap();
    fs.write("/b", b"old").unwrap();
    fs.create_hardlink("/b2", "/b").unwrap();

    fs.copy("/a", "/b").unwrap();
    assert_eq!(fs.read("/b").unwrap(), b"new");
    // The other name of the replaced file still sees its old content.
    assert_eq!(fs.read("/b2").unwrap(), b"old");
    assert_eq!(fs.stat("/b2").unwrap().link_count, 1);

    fs.create_directory("/d").unwrap();
    assert_eq!(fs.copy("/a", "/d"), Err(FsError::IsADirectory));
    assert_eq!(fs.copy("/a", "/a"), Err(FsError::InvalidOperation));
    assert_eq!(fs.copy("/a", "/d/."), Err(FsError::AlreadyExists));
    assert_eq!(fs.copy("/a", "/.."), Err(FsError::AlreadyExists));
    fs.verify().unwrap();
}

#[test]
fn test_copy_partial_failure_surfaces_error() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/src").unwrap();
    for name in ["a", "b", "c"] {
        let path = format!("/src/{name}");
        fs.create_file(&path).unwrap();
        fs.write(&path, name.as_bytes()).unwrap();
    }
    // Allows the destination directory and the first file, then fails.
    fs.set_fault_policy(FaultPolicy::fail_after(FaultOp::AllocateNode, 2));

    assert_eq!(fs.copy("/src", "/dst"), Err(FsError::OutOfMemory));
    assert_eq!(names(&fs, "/dst"), vec!["a"]);
    assert_eq!(fs.read("/dst/a").unwrap(), b"a");
    assert_eq!(fs.faults_injected(), 1);
    fs.verify().unwrap();
}

#[test]
fn test_failed_write_keeps_previous_content() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_file("/f").unwrap();
    fs.write("/f", b"kept").unwrap();
    fs.set_fault_policy(FaultPolicy::fail_after(FaultOp::AllocateContent, 0));
    assert_eq!(fs.write("/f", b"lost"), Err(FsError::OutOfMemory));
    assert_eq!(fs.append("/f", b"lost"), Err(FsError::OutOfMemory));
    assert_eq!(fs.read("/f").unwrap(), b"kept");
}

#[test]
fn test_move_directory_updates_parent_entry() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/sub").unwrap();
    fs.create_file("/a/sub/f").unwrap();
    fs.create_directory("/b").unwrap();
    let sub = fs.resolve("/a/sub").unwrap();

    fs.rename("/a/sub", "/b/moved").unwrap();
    assert_eq!(fs.resolve("/b/moved"), Ok(sub));
    assert_eq!(fs.resolve("/b/moved/.."), fs.resolve("/b"));
    assert!(fs.exists("/b/moved/f"));
    assert_eq!(fs.resolve("/a/sub"), Err(FsError::NotFound));
    fs.verify().unwrap();
}

#[test]
fn test_move_fails_first_when_destination_exists() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_file("/a").unwrap();
    fs.create_file("/b").unwrap();
    assert_eq!(fs.rename("/a", "/b"), Err(FsError::AlreadyExists));
    assert_eq!(fs.rename("/a", "/a"), Err(FsError::AlreadyExists));
    assert_eq!(fs.rename("/missing", "/c"), Err(FsError::NotFound));
    assert!(fs.exists("/a"));
    assert!(fs.exists("/b"));
}

#[test]
fn test_move_into_own_subtree_is_rejected() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    fs.create_directory("/a/b").unwrap();
    assert_eq!(fs.rename("/a", "/a/b/a"), Err(FsError::InvalidOperation));
    assert_eq!(fs.rename("/", "/x"), Err(FsError::InvalidOperation));
    assert_eq!(fs.rename("/a/..", "/x"), Err(FsError::InvalidOperation));
    fs.verify().unwrap();
}

#[test]
fn test_walk_is_depth_first_in_name_order() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/b").unwrap();
    fs.create_file("/b/z").unwrap();
    fs.create_directory("/b/a").unwrap();
    fs.create_file("/b/a/x").unwrap();
    fs.create_file("/a").unwrap();

    let paths: Vec<_> = fs.walk("/").unwrap().into_iter().map(|(p, _)| p).collect();
    assert_eq!(paths, vec!["/", "/a", "/b", "/b/a", "/b/a/x", "/b/z"]);
}

#[test]
fn test_shutdown_frees_whole_tree() {
    let mut fs = FsCore::initialize().unwrap();
    fs.create_directory("/a").unwrap();
    fs.create_file("/a/f").unwrap();
    fs.create_hardlink("/g", "/a/f").unwrap();
    fs.create_symlink("/s", "/a").unwrap();
    assert_eq!(fs.shutdown(), 4);
}
