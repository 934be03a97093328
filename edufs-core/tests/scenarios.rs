//! End-to-end scenarios S1-S7 from spec §8, driven through the `Filesystem` facade.

use edufs_core::error::Error;
use edufs_core::fs::{FormatOptions, MountOptions};
use edufs_core::{FileType, Filesystem};
use std::env;
use std::fs;
use std::path::PathBuf;

struct TempPath(PathBuf);

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn temp_path(name: &str) -> TempPath {
    let mut p = env::temp_dir();
    p.push(format!("edufs-scenario-{name}-{}-{}", std::process::id(), name.len()));
    TempPath(p)
}

fn mounted(path: &PathBuf, total_blocks: u64) -> std::sync::Arc<Filesystem> {
    let opts = FormatOptions {
        total_blocks,
        ..FormatOptions::default()
    };
    Filesystem::format(path, opts).unwrap();
    Filesystem::mount(path, MountOptions::default()).unwrap()
}

/// A small seeded xorshift64 generator, used in place of a property-testing crate
/// (none appears in the teacher's dependency table, per SPEC_FULL.md) to build the
/// "random-but-seeded" sequences properties 9 and 10 call for.
fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn sorted_names(fs: &Filesystem, path: &str) -> Vec<String> {
    let mut names: Vec<String> = fs.ls(Some(path)).unwrap().iter().map(|e| e.name.clone()).collect();
    names.sort();
    names
}

#[test]
fn s1_format_mount_root() {
    let p = temp_path("s1");
    // format("d.img", 8) => 8 MiB / 4096-byte blocks = 2048 blocks.
    let fs = mounted(&p.0, 2048);
    let entries = fs.ls(Some("/")).unwrap();
    let mut names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec![".".to_owned(), "..".to_owned()]);

    let report = fs.df();
    // 1 bitmap block + 1 inode-table block + 1 root-directory data block.
    assert_eq!(report.used_blocks, 3);
}

#[test]
fn s2_create_and_read() {
    let p = temp_path("s2");
    let fs = mounted(&p.0, 2048);
    fs.touch("/a.txt").unwrap();
    fs.echo("/a.txt", b"hello").unwrap();
    assert_eq!(fs.cat("/a.txt").unwrap(), b"hello");
    let stat = fs.stat("/a.txt").unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.block_count, 1);
    assert!(matches!(stat.kind, FileType::File));
}

#[test]
fn s3_directory_nesting() {
    let p = temp_path("s3");
    let fs = mounted(&p.0, 2048);
    fs.mkdir("/d1").unwrap();
    fs.mkdir("/d1/d2").unwrap();
    fs.touch("/d1/d2/x").unwrap();

    let mut names: Vec<_> = fs.ls(Some("/d1/d2")).unwrap().iter().map(|e| e.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec![".".to_owned(), "..".to_owned(), "x".to_owned()]);

    let x_stat = fs.stat("/d1/d2/x").unwrap();
    let d2_stat = fs.stat("/d1/d2").unwrap();
    assert_eq!(x_stat.parent_id, d2_stat.id);
}

#[test]
fn s4_remove_while_open() {
    let p = temp_path("s4");
    let fs = mounted(&p.0, 2048);
    fs.touch("/b").unwrap();
    fs.open("/b");
    assert!(matches!(fs.rm("/b"), Err(Error::Busy)));
    fs.close("/b");
    fs.rm("/b").unwrap();
    assert!(fs.ls(Some("/")).unwrap().iter().all(|e| e.name != "b"));
}

#[test]
fn s5_contiguous_grow_with_relocation() {
    let p = temp_path("s5");
    // 8192 blocks yields 4 inode-table blocks (128 inodes), enough for the 100
    // filler files plus /big, /blocker, the filler directories, and root.
    let fs = mounted(&p.0, 8192);
    // A 4096-byte directory block holds at most 58 entries (4-byte header + 58 *
    // 70-byte entries), so the 100 filler files are spread across several
    // subdirectories rather than piled directly under root; only the order blocks
    // are allocated in is what matters for forcing /big's growth to relocate.
    for d in 0..4 {
        fs.mkdir(&format!("/d{d}")).unwrap();
        for i in 0..25 {
            let path = format!("/d{d}/f{i}");
            fs.touch(&path).unwrap();
            fs.echo(&path, b"x").unwrap();
        }
    }
    fs.touch("/big").unwrap();
    fs.echo("/big", b"x").unwrap();
    let before = fs.stat("/big").unwrap();
    assert_eq!(before.block_count, 1);
    // Occupy the block right after /big's extent so the tail-extension path is
    // blocked and growth is forced to relocate.
    fs.touch("/blocker").unwrap();
    fs.echo("/blocker", b"x").unwrap();

    let payload = vec![b'y'; 10 * 4096];
    fs.echo("/big", &payload).unwrap();
    let after = fs.stat("/big").unwrap();
    assert_eq!(after.block_count, 10);
    // Tail extension was blocked by the 100 single-block files packed right after
    // /big's original extent, so the extent must have moved.
    assert_ne!(after.start_block, before.start_block);
    assert_eq!(fs.cat("/big").unwrap(), payload);
}

#[test]
fn s6_fifo_eviction_at_facade_level() {
    let p = temp_path("s6");
    let opts = FormatOptions {
        total_blocks: 2048,
        ..FormatOptions::default()
    };
    Filesystem::format(&p.0, opts).unwrap();
    let fs = Filesystem::mount(&p.0, MountOptions { cache_capacity: 4 }).unwrap();
    for i in 0..20 {
        fs.touch(&format!("/f{i}")).unwrap();
    }
    let (resident, _, capacity) = fs.cache_stats();
    assert_eq!(capacity, 4);
    assert!(resident <= capacity);
}

#[test]
fn s7_path_normalization() {
    let p = temp_path("s7");
    let fs = mounted(&p.0, 2048);
    fs.mkdir("/d1").unwrap();
    fs.mkdir("/d1/d2").unwrap();
    fs.cd("/d1/d2").unwrap();
    assert_eq!(fs.pwd(), "/d1/d2");

    assert_eq!(fs.normalize("."), "/d1/d2");
    assert_eq!(fs.normalize("./"), "/d1/d2");
    assert_eq!(fs.normalize("../"), "/d1");
    assert_eq!(fs.normalize("../../"), "/");
    assert_eq!(fs.normalize("../d2"), "/d1/d2");
    assert_eq!(fs.normalize("/d1/./d2/../d2"), "/d1/d2");
}

#[test]
fn format_mount_unmount_mount_roundtrip() {
    let p = temp_path("roundtrip");
    let fs = mounted(&p.0, 2048);
    fs.mkdir("/persisted").unwrap();
    fs.touch("/persisted/file").unwrap();
    fs.echo("/persisted/file", b"data").unwrap();
    fs.unmount().unwrap();
    drop(fs);

    let fs2 = Filesystem::mount(&p.0, MountOptions::default()).unwrap();
    assert_eq!(fs2.cat("/persisted/file").unwrap(), b"data");
    let stat = fs2.stat("/persisted").unwrap();
    assert!(matches!(stat.kind, FileType::Directory));
}

#[test]
fn rmdir_refuses_non_empty_directory() {
    let p = temp_path("rmdir-nonempty");
    let fs = mounted(&p.0, 2048);
    fs.mkdir("/d").unwrap();
    fs.touch("/d/f").unwrap();
    assert!(matches!(fs.rmdir("/d"), Err(Error::NotEmpty)));
    fs.rm("/d/f").unwrap();
    fs.rmdir("/d").unwrap();
}

#[test]
fn rmdir_unwinds_a_tree_leaf_first() {
    // The facade's rmdir refuses a non-empty directory (§7, `NotEmpty`), so a whole
    // tree comes down leaf-first; each step frees exactly one inode slot.
    let p = temp_path("tree-teardown");
    let fs = mounted(&p.0, 2048);
    fs.mkdir("/tree").unwrap();
    fs.mkdir("/tree/sub").unwrap();
    fs.touch("/tree/sub/leaf").unwrap();
    fs.touch("/tree/leaf2").unwrap();

    let before = fs.df();
    fs.rm("/tree/sub/leaf").unwrap();
    fs.rmdir("/tree/sub").unwrap();
    fs.rm("/tree/leaf2").unwrap();
    fs.rmdir("/tree").unwrap();
    let after = fs.df();
    assert_eq!(before.used_inodes, after.used_inodes + 4);
}

#[test]
fn create_file_rollback_on_full_directory_does_not_leak_inode_slot() {
    // A directory page holds at most 58 entries (4-byte header + 58 * 70-byte
    // entries), 2 of which are `.`/`..`, so the 57th `create_file` call below
    // must roll back: the inode slot it speculatively allocated has to be freed
    // both in memory and on disk, or a later `mount` would see a stale non-zero
    // `id` in that table slot and treat it as permanently allocated.
    // 8192 blocks yields 128 inode slots (4 table blocks), enough headroom for the
    // 56 filler files plus the directory itself, root, and the post-rollback probe.
    let p = temp_path("create-rollback");
    let fs = mounted(&p.0, 8192);
    fs.mkdir("/full").unwrap();
    for i in 0..56 {
        fs.touch(&format!("/full/f{i}")).unwrap();
    }
    let before = fs.df();
    assert!(matches!(fs.touch("/full/overflow"), Err(Error::NoSpace)));
    let after_failed_create = fs.df();
    assert_eq!(before.used_inodes, after_failed_create.used_inodes);

    fs.unmount().unwrap();
    drop(fs);
    let fs2 = Filesystem::mount(&p.0, MountOptions::default()).unwrap();
    let after_remount = fs2.df();
    assert_eq!(before.used_inodes, after_remount.used_inodes);

    // The slot the failed create speculatively claimed must be reusable.
    fs2.mkdir("/other").unwrap();
    fs2.touch("/other/reused").unwrap();
    fs2.stat("/other/reused").unwrap();
}

#[test]
fn property9_create_then_delete_k_random_files_restores_counts() {
    // spec §8 property 9: creating then deleting K random files returns the
    // bitmap and inode counts to their pre-test values.
    let p = temp_path("prop9");
    let fs = mounted(&p.0, 4096);
    let before = fs.df();

    let mut seed = 0x9E3779B97F4A7C15u64;
    const K: usize = 40;
    let mut names = Vec::with_capacity(K);
    for i in 0..K {
        let name = format!("/rand{i}");
        let len = (xorshift(&mut seed) % 257) as usize;
        let content: Vec<u8> = (0..len).map(|j| (xorshift(&mut seed) ^ j as u64) as u8).collect();
        fs.touch(&name).unwrap();
        if !content.is_empty() {
            fs.echo(&name, &content).unwrap();
        }
        names.push(name);
    }

    // Delete in a pseudo-random order rather than creation order, so the test
    // doesn't just exercise a neat LIFO free pattern.
    for i in (1..names.len()).rev() {
        let j = (xorshift(&mut seed) as usize) % (i + 1);
        names.swap(i, j);
    }
    for name in &names {
        fs.rm(name).unwrap();
    }

    let after = fs.df();
    assert_eq!(before.used_blocks, after.used_blocks);
    assert_eq!(before.free_blocks, after.free_blocks);
    assert_eq!(before.used_inodes, after.used_inodes);
    assert_eq!(before.free_inodes, after.free_inodes);
}

#[test]
fn property10_cd_mkdir_rmdir_round_trip_to_root_restores_state() {
    // spec §8 property 10: any sequence of `cd`, `mkdir`, `rmdir` that ends at `/`
    // leaves the filesystem identical to its initial state.
    let p = temp_path("prop10");
    let fs = mounted(&p.0, 2048);
    // An untouched anchor lets the assertions catch a leak, not just a lucky
    // coincidence of an already-empty root.
    fs.mkdir("/anchor").unwrap();
    fs.touch("/anchor/marker").unwrap();
    let before_df = fs.df();
    let before_root = sorted_names(&fs, "/");

    let mut seed = 0xD1B54A32D192ED03u64;
    const DEPTH: usize = 5;
    let mut stack = Vec::with_capacity(DEPTH);
    for _ in 0..DEPTH {
        let name = format!("d{}", xorshift(&mut seed) % 1000);
        fs.mkdir(&name).unwrap();
        fs.cd(&name).unwrap();
        stack.push(name);
    }
    assert_ne!(fs.pwd(), "/");
    while let Some(name) = stack.pop() {
        fs.cd("..").unwrap();
        fs.rmdir(&name).unwrap();
    }
    assert_eq!(fs.pwd(), "/");

    let after_df = fs.df();
    let after_root = sorted_names(&fs, "/");
    assert_eq!(before_df.used_inodes, after_df.used_inodes);
    assert_eq!(before_df.used_blocks, after_df.used_blocks);
    assert_eq!(before_root, after_root);
}
