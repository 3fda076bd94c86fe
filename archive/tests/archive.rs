use std::{
    collections::BTreeMap,
    fs::{self, Permissions},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use blobsnap_archive::library::{
    DirectorySource,
    archive::{archive_dir, calculate_total_size, restore},
};
use blobsnap_library::{BackupAgent, ObjectBlobStore, RetentionPolicy, SnapshotStream};
use futures::TryStreamExt;
use rand::{Rng, SeedableRng, distr::Alphanumeric, rngs::StdRng};
use tempfile::tempdir;
use tokio::sync::mpsc;
use walkdir::WalkDir;

fn random_name(rng: &mut StdRng) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// Fills `root` with a seeded tree `depth` levels deep. Files hold random
/// binary content, some of them empty. Returns the total file size.
fn populate_tree(root: &Path, rng: &mut StdRng, depth: usize) -> Result<u64> {
    let mut total = 0;

    for _ in 0..rng.random_range(1..=3) {
        let mut content = vec![0u8; rng.random_range(0..4096)];
        rng.fill(&mut content[..]);

        fs::write(root.join(random_name(rng)), &content)?;
        total += content.len() as u64;
    }

    if depth > 0 {
        for _ in 0..2 {
            let dir = root.join(random_name(rng));
            fs::create_dir(&dir)?;
            total += populate_tree(&dir, rng, depth - 1)?;
        }
    }

    Ok(total)
}

/// Entries whose permissions differ from what a fresh unpack would create.
fn add_restricted_entries(root: &Path) -> Result<()> {
    let locked = root.join("locked.txt");
    fs::write(&locked, "read only")?;
    let mut permissions = fs::metadata(&locked)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(&locked, permissions)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let script = root.join("run.sh");
        fs::write(&script, "#!/bin/sh\necho ok\n")?;
        fs::set_permissions(&script, Permissions::from_mode(0o750))?;

        let private = root.join("private");
        fs::create_dir(&private)?;
        fs::write(private.join("key"), "secret")?;
        fs::set_permissions(&private, Permissions::from_mode(0o700))?;
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
enum Entry {
    Dir(Permissions),
    File(Permissions, Vec<u8>),
}

/// Everything below `root`, keyed by relative path. The root itself is left
/// out because the archive does not carry its metadata.
fn read_tree(root: &Path) -> Result<BTreeMap<PathBuf, Entry>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| -> Result<(PathBuf, Entry)> {
            let entry = entry?;
            let metadata = entry.metadata()?;
            let relative = entry.path().strip_prefix(root)?.to_path_buf();

            let entry = match metadata.is_dir() {
                true => Entry::Dir(metadata.permissions()),
                false => Entry::File(metadata.permissions(), fs::read(entry.path())?),
            };

            Ok((relative, entry))
        })
        .collect()
}

async fn collect(stream: SnapshotStream) -> Result<Vec<u8>> {
    let chunks = stream.try_collect::<Vec<_>>().await?;
    Ok(chunks.concat())
}

async fn round_trip(source: &Path, target: &Path, compress: bool) -> Result<()> {
    let data = archive_dir(source, compress, None).await?;
    restore(data, target, None).await?;

    assert_eq!(read_tree(source)?, read_tree(target)?);

    Ok(())
}

#[tokio::test]
async fn test_archive_restore_uncompressed() -> Result<()> {
    let source_dir = tempdir()?;
    let target_dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(0);

    populate_tree(source_dir.path(), &mut rng, 2)?;
    add_restricted_entries(source_dir.path())?;

    round_trip(source_dir.path(), target_dir.path(), false).await
}

#[tokio::test]
async fn test_archive_restore_compressed() -> Result<()> {
    let source_dir = tempdir()?;
    let target_dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(1);

    populate_tree(source_dir.path(), &mut rng, 2)?;
    add_restricted_entries(source_dir.path())?;

    round_trip(source_dir.path(), target_dir.path(), true).await
}

#[tokio::test]
async fn test_archive_restore_empty_dir() -> Result<()> {
    for compress in [false, true] {
        let source_dir = tempdir()?;
        let target_dir = tempdir()?;

        fs::create_dir_all(source_dir.path().join("empty_dir"))?;

        round_trip(source_dir.path(), target_dir.path(), compress).await?;
    }

    Ok(())
}

#[tokio::test]
async fn test_restore_creates_missing_target() -> Result<()> {
    let source_dir = tempdir()?;
    let target_dir = tempdir()?;
    let target = target_dir.path().join("not/yet/there");
    let mut rng = StdRng::seed_from_u64(4);

    populate_tree(source_dir.path(), &mut rng, 1)?;

    round_trip(source_dir.path(), &target, true).await?;

    assert!(fs::metadata(&target)?.is_dir());

    Ok(())
}

#[tokio::test]
async fn test_large_file_streams_in_chunks() -> Result<()> {
    let source_dir = tempdir()?;
    let target_dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(5);

    let mut content = vec![0u8; 3 * 1024 * 1024];
    rng.fill(&mut content[..]);
    fs::write(source_dir.path().join("noise.bin"), &content)?;

    let chunks = archive_dir(source_dir.path(), false, None)
        .await?
        .try_collect::<Vec<_>>()
        .await?;

    assert!(chunks.len() > 1);
    assert!(chunks.iter().map(|chunk| chunk.len()).sum::<usize>() > content.len());

    round_trip(source_dir.path(), target_dir.path(), true).await
}

#[tokio::test]
async fn test_compressed_archive_is_zstd() -> Result<()> {
    let source_dir = tempdir()?;
    fs::write(source_dir.path().join("repeated"), "a".repeat(64 * 1024))?;

    let plain = collect(archive_dir(source_dir.path(), false, None).await?).await?;
    let compressed = collect(archive_dir(source_dir.path(), true, None).await?).await?;

    assert!(compressed.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]));
    assert!(compressed.len() < plain.len());

    Ok(())
}

#[tokio::test]
async fn test_archive_missing_source_fails() {
    let source_dir = tempdir().unwrap();

    let result = archive_dir(&source_dir.path().join("missing"), false, None).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_archive_reports_progress() -> Result<()> {
    let source_dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(2);

    let written = populate_tree(source_dir.path(), &mut rng, 1)?;

    let total_size = calculate_total_size(source_dir.path().to_path_buf()).await?;
    let (sender, mut receiver) = mpsc::unbounded_channel();

    collect(archive_dir(source_dir.path(), true, Some(sender)).await?).await?;

    let mut progress = 0;
    while let Some(bytes) = receiver.recv().await {
        progress += bytes;
    }

    assert_eq!(total_size, written);
    assert!(progress >= total_size);

    Ok(())
}

#[tokio::test]
async fn test_backup_and_restore_through_agent() -> Result<()> {
    let source_dir = tempdir()?;
    let target_dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(3);

    populate_tree(source_dir.path(), &mut rng, 2)?;
    add_restricted_entries(source_dir.path())?;

    let agent = BackupAgent::new(
        Arc::new(ObjectBlobStore::in_memory()),
        RetentionPolicy::new(2)?,
    );
    let source = DirectorySource::new(source_dir.path(), true);

    let summary = agent.run(&source).await?;
    let download = agent.restore(&summary.key).await?;

    assert_eq!(download.size, summary.size_bytes);

    restore(download.stream, target_dir.path(), None).await?;

    assert_eq!(read_tree(source_dir.path())?, read_tree(target_dir.path())?);

    Ok(())
}
