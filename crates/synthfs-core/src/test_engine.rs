// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::sync::Arc;

use crate::testing::init_tracing;
use crate::{
    can_access, Access, CreateKind, FsConfig, FsError, NodeType, OpenMode, Owner, SeekFrom,
    SessionId, Subject, Vfs,
};

const SESSION: SessionId = SessionId(1);

fn new_vfs() -> Vfs {
    init_tracing();
    Vfs::new(FsConfig::default()).unwrap()
}

fn root_subject() -> Subject {
    Subject::new(0, 0)
}

/// `/d` owned by uid 1 with rwx------, holding `/d/f` = "hello"
fn private_dir_fixture(vfs: &Vfs) -> Subject {
    let owner = Subject::new(1, 1);
    vfs.create_as_host("/", "d", CreateKind::Directory, Owner::new(1, 1), 0o700)
        .unwrap();
    vfs.create(&owner, "/d", "f", CreateKind::DataFile, 0o600)
        .unwrap();
    let h = vfs.open(SESSION, &owner, "/d/f", OpenMode::Write).unwrap();
    assert_eq!(vfs.write(h, b"hello").unwrap(), 5);
    vfs.close(h).unwrap();
    owner
}

fn read_all(vfs: &Vfs, subject: &Subject, path: &str) -> Vec<u8> {
    let h = vfs.open(SESSION, subject, path, OpenMode::Read).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 4];
    loop {
        let n = vfs.read(h, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    vfs.close(h).unwrap();
    out
}

#[test]
fn test_owner_reads_then_appends_through_one_handle() {
    let vfs = new_vfs();
    let owner = private_dir_fixture(&vfs);

    let h = vfs.open(SESSION, &owner, "/d/f", OpenMode::ReadWrite).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(vfs.write(h, b"!!").unwrap(), 2);
    vfs.close(h).unwrap();

    let h = vfs.open(SESSION, &owner, "/d/f", OpenMode::Read).unwrap();
    let mut buf = [0u8; 7];
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 7);
    assert_eq!(&buf, b"hello!!");
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 0);
    vfs.close(h).unwrap();
}

#[test]
fn test_stranger_is_denied_at_traverse_of_private_dir() {
    let vfs = new_vfs();
    private_dir_fixture(&vfs);
    let stranger = Subject::new(2, 2);

    assert!(matches!(
        vfs.lookup(&stranger, "/d/f"),
        Err(FsError::PermissionDenied)
    ));
    assert!(matches!(
        vfs.open(SESSION, &stranger, "/d/f", OpenMode::Read),
        Err(FsError::PermissionDenied)
    ));

    // The walk got as far as `d` before the traverse check refused it.
    let d = vfs.lookup(&root_subject(), "/d");
    let mut seen = Vec::new();
    let result = vfs.walk_with(vfs.root(), &["d", "f"], &stranger, |name, node| {
        seen.push((name.to_string(), node))
    });
    assert!(matches!(result, Err(FsError::PermissionDenied)));
    assert_eq!(seen, vec![("d".to_string(), d.unwrap())]);
}

#[test]
fn test_failed_walk_changes_nothing() {
    let vfs = new_vfs();
    private_dir_fixture(&vfs);
    let before = vfs.stats();
    let stranger = Subject::new(2, 2);

    assert!(vfs
        .create(&stranger, "/d", "x", CreateKind::DataFile, 0o644)
        .is_err());
    assert!(vfs.remove(&stranger, "/d/f", false).is_err());
    assert!(vfs.lookup(&stranger, "/nope/deeper").is_err());
    assert_eq!(vfs.stats(), before);
}

#[test]
fn test_create_lookup_remove_roundtrip() {
    let vfs = new_vfs();
    let root = root_subject();

    let a = vfs
        .create(&root, "/", "a", CreateKind::Directory, 0o755)
        .unwrap();
    let f = vfs
        .create(&root, "/a", "f", CreateKind::DataFile, 0o644)
        .unwrap();
    assert_eq!(vfs.lookup(&root, "/a").unwrap(), a);
    assert_eq!(vfs.lookup(&root, "a//f/").unwrap(), f);

    vfs.remove(&root, "/a/f", false).unwrap();
    assert!(matches!(vfs.lookup(&root, "/a/f"), Err(FsError::NotFound)));
    assert!(matches!(vfs.stat_node(f), Err(FsError::NotFound)));
}

#[test]
fn test_create_errors() {
    let vfs = new_vfs();
    let root = root_subject();
    vfs.create(&root, "/", "f", CreateKind::DataFile, 0o644)
        .unwrap();

    assert!(matches!(
        vfs.create(&root, "/", "f", CreateKind::DataFile, 0o644),
        Err(FsError::AlreadyExists)
    ));
    assert!(matches!(
        vfs.create(&root, "/f", "g", CreateKind::DataFile, 0o644),
        Err(FsError::NotADirectory)
    ));
    assert!(matches!(
        vfs.create(&root, "/missing", "g", CreateKind::DataFile, 0o644),
        Err(FsError::NotFound)
    ));
    assert!(matches!(
        vfs.create(&root, "/", "..", CreateKind::Directory, 0o755),
        Err(FsError::InvalidName)
    ));
    assert!(matches!(
        vfs.create(&root, "/", "g", CreateKind::DataFile, 0o10644),
        Err(FsError::InvalidArgument)
    ));
}

#[test]
fn test_create_needs_write_on_parent() {
    let vfs = new_vfs();
    let user = Subject::new(1, 1);
    assert!(matches!(
        vfs.create(&user, "/", "mine", CreateKind::DataFile, 0o644),
        Err(FsError::PermissionDenied)
    ));

    vfs.create_as_host("/", "home", CreateKind::Directory, Owner::new(1, 1), 0o755)
        .unwrap();
    let id = vfs
        .create(&user, "/home", "mine", CreateKind::DataFile, 0o644)
        .unwrap();
    let stat = vfs.stat_node(id).unwrap();
    assert_eq!((stat.uid, stat.gid), (1, 1));
}

#[test]
fn test_new_nodes_inherit_parent_permission_mask() {
    let vfs = new_vfs();
    let user = Subject::new(1, 1);
    vfs.create_as_host("/", "p", CreateKind::Directory, Owner::new(1, 1), 0o750)
        .unwrap();

    vfs.create(&user, "/p", "f", CreateKind::DataFile, 0o666)
        .unwrap();
    vfs.create(&user, "/p", "d", CreateKind::Directory, 0o777)
        .unwrap();
    assert_eq!(vfs.stat(&user, "/p/f").unwrap().mode, 0o640);
    assert_eq!(vfs.stat(&user, "/p/d").unwrap().mode, 0o750);

    let mut config = FsConfig::default();
    config.inherit_permissions = false;
    let vfs = Vfs::new(config).unwrap();
    vfs.create_as_host("/", "p", CreateKind::Directory, Owner::new(1, 1), 0o750)
        .unwrap();
    vfs.create(&user, "/p", "f", CreateKind::DataFile, 0o666)
        .unwrap();
    assert_eq!(vfs.stat(&user, "/p/f").unwrap().mode, 0o666);
}

#[test]
fn test_group_members_use_group_bits() {
    let vfs = new_vfs();
    vfs.create_as_host("/", "shared", CreateKind::Directory, Owner::new(1, 50), 0o750)
        .unwrap();
    vfs.create_as_host("/shared", "notes", CreateKind::DataFile, Owner::new(1, 50), 0o640)
        .unwrap();

    let member = Subject::new(2, 9).with_groups([50]);
    assert!(vfs.open(SESSION, &member, "/shared/notes", OpenMode::Read).is_ok());
    assert!(matches!(
        vfs.open(SESSION, &member, "/shared/notes", OpenMode::Write),
        Err(FsError::PermissionDenied)
    ));
}

#[test]
fn test_security_policy_switches() {
    let stranger = Subject::new(2, 2);

    let mut config = FsConfig::default();
    config.security.enforce_permissions = false;
    let vfs = Vfs::new(config).unwrap();
    private_dir_fixture(&vfs);
    assert_eq!(read_all(&vfs, &stranger, "/d/f"), b"hello");

    // uid 0 is an ordinary subject unless bypass is enabled.
    let vfs = new_vfs();
    private_dir_fixture(&vfs);
    assert!(matches!(
        vfs.lookup(&root_subject(), "/d/f"),
        Err(FsError::PermissionDenied)
    ));

    let mut config = FsConfig::default();
    config.security.root_bypass_permissions = true;
    let vfs = Vfs::new(config).unwrap();
    private_dir_fixture(&vfs);
    assert_eq!(read_all(&vfs, &root_subject(), "/d/f"), b"hello");
}

#[test]
fn test_handle_is_dead_after_close() {
    let vfs = new_vfs();
    let owner = private_dir_fixture(&vfs);
    let h = vfs.open(SESSION, &owner, "/d/f", OpenMode::ReadWrite).unwrap();
    vfs.close(h).unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(vfs.read(h, &mut buf), Err(FsError::InvalidHandle)));
    assert!(matches!(vfs.write(h, b"x"), Err(FsError::InvalidHandle)));
    assert!(matches!(vfs.seek(h, SeekFrom::Start(0)), Err(FsError::InvalidHandle)));
    assert!(matches!(vfs.fstat(h), Err(FsError::InvalidHandle)));
    assert!(matches!(vfs.close(h), Err(FsError::InvalidHandle)));

    // A fresh open never reuses the closed id.
    let h2 = vfs.open(SESSION, &owner, "/d/f", OpenMode::Read).unwrap();
    assert_ne!(h, h2);
}

#[test]
fn test_access_mode_is_fixed_at_open() {
    let vfs = new_vfs();
    let owner = private_dir_fixture(&vfs);

    let reader = vfs.open(SESSION, &owner, "/d/f", OpenMode::Read).unwrap();
    assert!(matches!(vfs.write(reader, b"x"), Err(FsError::PermissionDenied)));
    assert!(matches!(vfs.truncate(reader, 0), Err(FsError::PermissionDenied)));

    let writer = vfs.open(SESSION, &owner, "/d/f", OpenMode::Write).unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(vfs.read(writer, &mut buf), Err(FsError::PermissionDenied)));
}

#[test]
fn test_directory_enumeration_in_insertion_order() {
    let vfs = new_vfs();
    let root = root_subject();
    for name in ["zeta", "alpha", "mid"] {
        vfs.create(&root, "/", name, CreateKind::DataFile, 0o644)
            .unwrap();
    }
    vfs.create(&root, "/", "sub", CreateKind::Directory, 0o755)
        .unwrap();

    let h = vfs.open(SESSION, &root, "/", OpenMode::Read).unwrap();
    let mut names = Vec::new();
    while let Some(entry) = vfs.read_dir(h).unwrap() {
        names.push((entry.name, entry.kind));
    }
    assert_eq!(
        names,
        vec![
            ("zeta".to_string(), NodeType::DataFile),
            ("alpha".to_string(), NodeType::DataFile),
            ("mid".to_string(), NodeType::DataFile),
            ("sub".to_string(), NodeType::Directory),
        ]
    );
    assert!(vfs.read_dir(h).unwrap().is_none());

    // Byte-level reads share the cursor and yield one line per call.
    assert_eq!(vfs.seek(h, SeekFrom::Start(0)).unwrap(), 0);
    let mut tiny = [0u8; 3];
    assert!(matches!(vfs.read(h, &mut tiny), Err(FsError::InvalidArgument)));
    let mut buf = [0u8; 64];
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"zeta\n");
    assert_eq!(vfs.read_dir(h).unwrap().unwrap().name, "alpha");
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"mid\n");
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 4);
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 0);

    assert!(matches!(
        vfs.seek(h, SeekFrom::Current(1)),
        Err(FsError::InvalidArgument)
    ));
    assert!(matches!(
        vfs.open(SESSION, &root, "/", OpenMode::ReadWrite),
        Err(FsError::IsADirectory)
    ));
}

#[test]
fn test_read_dir_on_file_handle_is_rejected() {
    let vfs = new_vfs();
    let owner = private_dir_fixture(&vfs);
    let h = vfs.open(SESSION, &owner, "/d/f", OpenMode::Read).unwrap();
    assert!(matches!(vfs.read_dir(h), Err(FsError::NotADirectory)));
}

#[test]
fn test_removing_open_file_makes_handles_stale() {
    let vfs = new_vfs();
    let owner = private_dir_fixture(&vfs);
    let h = vfs.open(SESSION, &owner, "/d/f", OpenMode::ReadWrite).unwrap();

    vfs.remove(&owner, "/d/f", false).unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(vfs.read(h, &mut buf), Err(FsError::Stale)));
    assert!(matches!(vfs.write(h, b"x"), Err(FsError::Stale)));
    assert!(matches!(vfs.fstat(h), Err(FsError::Stale)));

    // A new node in the freed slot must not be reachable from the old handle.
    vfs.create(&owner, "/d", "g", CreateKind::DataFile, 0o600)
        .unwrap();
    assert!(matches!(vfs.read(h, &mut buf), Err(FsError::Stale)));

    vfs.close(h).unwrap();
    assert!(matches!(vfs.close(h), Err(FsError::InvalidHandle)));
}

#[test]
fn test_removal_policies_for_directories() {
    let vfs = new_vfs();
    let root = root_subject();
    vfs.create(&root, "/", "a", CreateKind::Directory, 0o755)
        .unwrap();
    vfs.create(&root, "/a", "b", CreateKind::Directory, 0o755)
        .unwrap();

    assert!(matches!(vfs.remove(&root, "/a", false), Err(FsError::NotEmpty)));

    let h = vfs.open(SESSION, &root, "/a/b", OpenMode::Read).unwrap();
    assert!(matches!(vfs.remove(&root, "/a", true), Err(FsError::Busy)));
    assert!(matches!(vfs.remove(&root, "/a/b", false), Err(FsError::Busy)));
    vfs.close(h).unwrap();

    vfs.remove(&root, "/a", true).unwrap();
    assert!(matches!(vfs.lookup(&root, "/a"), Err(FsError::NotFound)));
    assert_eq!(vfs.stats().nodes, 1);

    assert!(matches!(vfs.remove(&root, "/", true), Err(FsError::Busy)));
    assert!(matches!(vfs.remove(&root, "/..", true), Err(FsError::InvalidName)));
    assert!(matches!(vfs.remove(&root, "/gone", false), Err(FsError::NotFound)));
}

#[test]
fn test_remove_needs_write_on_parent() {
    let vfs = new_vfs();
    vfs.create_as_host("/", "f", CreateKind::DataFile, Owner::new(1, 1), 0o666)
        .unwrap();
    // Owning the file is not enough; the root directory is not writable.
    assert!(matches!(
        vfs.remove(&Subject::new(1, 1), "/f", false),
        Err(FsError::PermissionDenied)
    ));
    vfs.remove(&root_subject(), "/f", false).unwrap();
}

#[test]
fn test_seek_and_truncate_on_data_file() {
    let vfs = new_vfs();
    let root = root_subject();
    vfs.create(&root, "/", "f", CreateKind::DataFile, 0o644)
        .unwrap();
    let h = vfs.open(SESSION, &root, "/f", OpenMode::ReadWrite).unwrap();
    vfs.write(h, b"hello world").unwrap();

    assert_eq!(vfs.seek(h, SeekFrom::End(-5)).unwrap(), 6);
    let mut buf = [0u8; 5];
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"world");

    assert_eq!(vfs.seek(h, SeekFrom::Start(13)).unwrap(), 13);
    vfs.write(h, b"!").unwrap();
    assert_eq!(vfs.fstat(h).unwrap().size, 14);

    assert!(matches!(
        vfs.seek(h, SeekFrom::Current(-100)),
        Err(FsError::InvalidArgument)
    ));

    vfs.truncate(h, 5).unwrap();
    vfs.close(h).unwrap();
    assert_eq!(read_all(&vfs, &root, "/f"), b"hello");

    let dir = vfs.open(SESSION, &root, "/", OpenMode::Read).unwrap();
    assert!(matches!(vfs.write(dir, b"x"), Err(FsError::PermissionDenied)));
}

#[test]
fn test_far_offsets_are_refused_without_growing_the_file() {
    let vfs = new_vfs();
    let root = root_subject();
    vfs.create(&root, "/", "f", CreateKind::DataFile, 0o644)
        .unwrap();
    let h = vfs.open(SESSION, &root, "/f", OpenMode::ReadWrite).unwrap();
    vfs.write(h, b"abc").unwrap();
    let version = vfs.fstat(h).unwrap().version;

    assert_eq!(vfs.seek(h, SeekFrom::Start(u64::MAX / 2)).unwrap(), u64::MAX / 2);
    assert!(matches!(vfs.write(h, b"x"), Err(FsError::NoSpace)));
    let mut buf = [0u8; 4];
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 0);

    vfs.seek(h, SeekFrom::Start(u64::MAX)).unwrap();
    assert!(matches!(vfs.write(h, b"x"), Err(FsError::InvalidArgument)));
    assert_eq!(vfs.read(h, &mut buf).unwrap(), 0);
    assert_eq!(vfs.seek(h, SeekFrom::Current(0)).unwrap(), u64::MAX);

    assert!(matches!(vfs.truncate(h, u64::MAX / 2), Err(FsError::NoSpace)));
    assert!(matches!(vfs.truncate(h, u64::MAX), Err(FsError::NoSpace)));

    let stat = vfs.fstat(h).unwrap();
    assert_eq!((stat.size, stat.version), (3, version));
    vfs.close(h).unwrap();
    assert_eq!(read_all(&vfs, &root, "/f"), b"abc");
}

#[test]
fn test_file_size_limit_comes_from_config() {
    let mut config = FsConfig::default();
    config.limits.max_file_size = 8;
    let vfs = Vfs::new(config).unwrap();
    let root = root_subject();
    vfs.create(&root, "/", "f", CreateKind::DataFile, 0o644)
        .unwrap();
    let h = vfs.open(SESSION, &root, "/f", OpenMode::Write).unwrap();

    assert_eq!(vfs.write(h, b"12345678").unwrap(), 8);
    assert!(matches!(vfs.write(h, b"9"), Err(FsError::NoSpace)));
    assert!(matches!(vfs.truncate(h, 9), Err(FsError::NoSpace)));
    vfs.truncate(h, 2).unwrap();
    assert_eq!(vfs.fstat(h).unwrap().size, 2);
    vfs.close(h).unwrap();
}

#[test]
fn test_can_access_on_stat() {
    let vfs = new_vfs();
    let owner = private_dir_fixture(&vfs);
    let stranger = Subject::new(2, 2);
    let stat = vfs.stat(&owner, "/d/f").unwrap();

    assert!(can_access(&owner, &stat, Access::READ | Access::WRITE));
    assert!(!can_access(&stranger, &stat, Access::READ));
    assert!(!can_access(&owner, &stat, Access::TRAVERSE));

    let dir = vfs.stat(&owner, "/d").unwrap();
    assert!(can_access(&owner, &dir, Access::TRAVERSE));
    assert!(!can_access(&stranger, &dir, Access::TRAVERSE));
}

#[test]
fn test_stat_tracks_modifications() {
    let vfs = new_vfs();
    let root = root_subject();
    let id = vfs
        .create(&root, "/", "f", CreateKind::DataFile, 0o644)
        .unwrap();
    let before = vfs.stat(&root, "/f").unwrap();
    assert_eq!(before.node, id);
    assert_eq!(before.kind, NodeType::DataFile);
    assert_eq!((before.size, before.nlink), (0, 1));

    let h = vfs.open(SESSION, &root, "/f", OpenMode::Write).unwrap();
    vfs.write(h, b"abc").unwrap();
    vfs.write(h, b"def").unwrap();
    vfs.close(h).unwrap();

    let after = vfs.stat(&root, "/f").unwrap();
    assert_eq!(after.size, 6);
    assert_eq!(after.version, before.version + 2);
    assert!(after.mtime >= before.mtime);

    let root_stat = vfs.stat(&root, "/").unwrap();
    assert_eq!(root_stat.nlink, 1);
    assert!(matches!(vfs.stat(&root, "/missing"), Err(FsError::NotFound)));
}

#[test]
fn test_close_session_closes_only_its_handles() {
    let vfs = new_vfs();
    let owner = private_dir_fixture(&vfs);
    let mine = SessionId::new(7);
    let other = SessionId::new(8);

    let handles: Vec<_> = (0..3)
        .map(|_| vfs.open(mine, &owner, "/d/f", OpenMode::Read).unwrap())
        .collect();
    let kept = vfs.open(other, &owner, "/d/f", OpenMode::Read).unwrap();

    assert_eq!(vfs.close_session(mine), 3);
    assert_eq!(vfs.close_session(mine), 0);
    for h in handles {
        assert!(matches!(vfs.close(h), Err(FsError::InvalidHandle)));
    }
    assert_eq!(vfs.stats().open_handles, 1);
    vfs.close(kept).unwrap();
}

#[test]
fn test_open_handle_limit() {
    let mut config = FsConfig::default();
    config.limits.max_open_handles = 2;
    let vfs = Vfs::new(config).unwrap();
    let root = root_subject();

    let a = vfs.open(SESSION, &root, "/", OpenMode::Read).unwrap();
    let _b = vfs.open(SESSION, &root, "/", OpenMode::Read).unwrap();
    assert!(matches!(
        vfs.open(SESSION, &root, "/", OpenMode::Read),
        Err(FsError::TooManyOpenFiles)
    ));
    vfs.close(a).unwrap();
    assert!(vfs.open(SESSION, &root, "/", OpenMode::Read).is_ok());
}

#[test]
fn test_detached_namespaces_are_independent() {
    let vfs = new_vfs();
    let root = root_subject();
    let ns = vfs.create_namespace(Owner::new(0, 0), 0o755).unwrap();
    let f = vfs
        .create_at(&root, ns, "", "only_here", CreateKind::DataFile, 0o644)
        .unwrap();

    assert_eq!(vfs.lookup_at(&root, ns, "only_here").unwrap(), f);
    assert!(matches!(vfs.lookup(&root, "/only_here"), Err(FsError::NotFound)));
    assert_eq!(vfs.lookup_at(&root, ns, "..").unwrap(), ns);
}

#[test]
fn test_destroy_namespace_frees_its_nodes() {
    let vfs = new_vfs();
    let root = root_subject();
    let baseline = vfs.stats().nodes;
    let ns = vfs.create_namespace(Owner::new(0, 0), 0o755).unwrap();
    let sub = vfs
        .create_at(&root, ns, "", "sub", CreateKind::Directory, 0o755)
        .unwrap();
    vfs.create_at(&root, ns, "sub", "f", CreateKind::DataFile, 0o644)
        .unwrap();

    let h = vfs
        .open_at(SESSION, &root, ns, "sub/f", OpenMode::Read)
        .unwrap();
    assert!(matches!(vfs.destroy_namespace(ns), Err(FsError::Busy)));
    vfs.close(h).unwrap();

    assert!(matches!(vfs.destroy_namespace(sub), Err(FsError::InvalidArgument)));
    assert!(matches!(vfs.destroy_namespace(vfs.root()), Err(FsError::Busy)));

    vfs.destroy_namespace(ns).unwrap();
    assert_eq!(vfs.stats().nodes, baseline);
    assert!(matches!(vfs.stat_node(ns), Err(FsError::NotFound)));
    assert!(matches!(vfs.destroy_namespace(ns), Err(FsError::NotFound)));
}

#[test]
fn test_parallel_clients() {
    let mut config = FsConfig::default();
    config.inherit_permissions = false;
    let vfs = Arc::new(Vfs::new(config).unwrap());
    let root = root_subject();
    vfs.create(&root, "/", "shared", CreateKind::Directory, 0o777)
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4u32 {
            let vfs = Arc::clone(&vfs);
            scope.spawn(move || {
                let me = Subject::new(100 + worker, 100);
                let session = SessionId::new(worker as u64);
                for i in 0..20 {
                    let name = format!("w{worker}-{i}");
                    vfs.create(&me, "/shared", &name, CreateKind::DataFile, 0o644)
                        .unwrap();
                    let path = format!("/shared/{name}");
                    let h = vfs.open(session, &me, &path, OpenMode::ReadWrite).unwrap();
                    vfs.write(h, name.as_bytes()).unwrap();
                    vfs.seek(h, SeekFrom::Start(0)).unwrap();
                    let mut buf = vec![0u8; name.len()];
                    assert_eq!(vfs.read(h, &mut buf).unwrap(), name.len());
                    assert_eq!(buf, name.as_bytes());
                    vfs.close(h).unwrap();
                    if i % 2 == 0 {
                        vfs.remove(&me, &path, false).unwrap();
                    }
                }
            });
        }
    });

    let listing = vfs.open(SESSION, &root, "/shared", OpenMode::Read).unwrap();
    let mut count = 0;
    while vfs.read_dir(listing).unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 40);
    assert_eq!(vfs.stats().nodes, 42);
}

#[cfg(feature = "events")]
mod events {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{EventKind, EventSink};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<EventKind>>,
    }

    impl EventSink for Recorder {
        fn on_event(&self, evt: &EventKind) {
            self.events.lock().push(evt.clone());
        }
    }

    #[test]
    fn test_structural_and_content_events() {
        let vfs = new_vfs();
        let root = root_subject();
        let recorder = Arc::new(Recorder::default());
        let sub = vfs.subscribe_events(recorder.clone()).unwrap();

        let f = vfs
            .create(&root, "/", "f", CreateKind::DataFile, 0o644)
            .unwrap();
        let h = vfs.open(SESSION, &root, "/f", OpenMode::Write).unwrap();
        vfs.write(h, b"x").unwrap();
        vfs.close(h).unwrap();
        vfs.remove(&root, "/f", false).unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec![
                EventKind::Created {
                    parent: vfs.root(),
                    node: f,
                    name: "f".to_string(),
                },
                EventKind::Modified { node: f },
                EventKind::Removed {
                    parent: vfs.root(),
                    node: f,
                    name: "f".to_string(),
                },
            ]
        );

        vfs.unsubscribe_events(sub).unwrap();
        assert!(matches!(vfs.unsubscribe_events(sub), Err(FsError::NotFound)));
        vfs.create(&root, "/", "g", CreateKind::DataFile, 0o644)
            .unwrap();
        assert_eq!(recorder.events.lock().len(), 3);
    }

    #[test]
    fn test_events_can_be_disabled() {
        let mut config = FsConfig::default();
        config.track_events = false;
        let vfs = Vfs::new(config).unwrap();
        let recorder = Arc::new(Recorder::default());
        vfs.subscribe_events(recorder.clone()).unwrap();

        vfs.create(&root_subject(), "/", "f", CreateKind::DataFile, 0o644)
            .unwrap();
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_sinks_may_call_back_into_the_engine() {
        struct Lister {
            vfs: Arc<Vfs>,
            seen: Mutex<Vec<u32>>,
        }
        impl EventSink for Lister {
            fn on_event(&self, _evt: &EventKind) {
                self.seen.lock().push(self.vfs.stats().nodes);
            }
        }

        let vfs = Arc::new(new_vfs());
        let lister = Arc::new(Lister {
            vfs: Arc::clone(&vfs),
            seen: Mutex::new(Vec::new()),
        });
        vfs.subscribe_events(lister.clone()).unwrap();
        vfs.create(&root_subject(), "/", "f", CreateKind::DataFile, 0o644)
            .unwrap();
        assert_eq!(*lister.seen.lock(), vec![2]);
    }
}
