//! 目录打包：确定性命名、临时目录生命周期与发送后清理。

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::config::{
    ARCHIVE_LOCK_TIMEOUT_SECS, ARCHIVE_PREFIX, ARCHIVE_SUFFIX, SCRATCH_MODE, SCRATCH_PREFIX,
    SCRATCH_SUFFIX,
};
use crate::locking::LockManager;

/// 进程私有的归档临时目录。
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// 在系统临时目录下创建唯一命名的私有目录（Unix 下权限 0700）。
    pub fn create() -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX).suffix(SCRATCH_SUFFIX);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(SCRATCH_MODE));
        }
        let dir = builder.tempdir()?;
        debug!(path = ?dir.path(), "scratch dir created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 目录被外部删除时以相同权限重建；已存在不算错误。
    pub fn ensure(&self) -> io::Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(SCRATCH_MODE);
        }
        match builder.create(self.path()) {
            Err(err) if err.kind() != ErrorKind::AlreadyExists => Err(err),
            _ => Ok(()),
        }
    }

    /// 递归删除临时目录，忽略所有错误。
    pub fn teardown(&self) {
        match std::fs::remove_dir_all(self.path()) {
            Ok(()) => info!("scratch dir removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!(error = %err, "scratch dir cleanup failed"),
        }
    }
}

#[derive(Debug)]
pub enum ArchiveError {
    Busy,
    Io(io::Error),
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

/// 已完成的归档；文件句柄在持锁期间打开。
#[derive(Debug)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub file_name: String,
    pub file: File,
    pub size: u64,
}

/// 归档构建器：同名归档串行构建。
#[derive(Debug)]
pub struct Archiver {
    scratch: ScratchDir,
    locks: LockManager,
}

impl Archiver {
    pub fn new(scratch: ScratchDir) -> Self {
        Self {
            scratch,
            locks: LockManager::new(),
        }
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    /// 打包 `source` 下的所有常规文件，条目名相对于 `root`。
    ///
    /// 调用方需保证 `source` 已限制在 `root` 内，此处不再校验。
    /// 压缩在阻塞线程池中执行，不占用请求处理线程。
    pub async fn build(
        &self,
        root: &Path,
        source: &Path,
        client_path: &str,
    ) -> Result<ArchiveHandle, ArchiveError> {
        let file_name = archive_file_name(client_path);
        let _guard = self
            .locks
            .lock_with_timeout(&file_name, Duration::from_secs(ARCHIVE_LOCK_TIMEOUT_SECS))
            .await
            .map_err(|_| ArchiveError::Busy)?;
        self.scratch.ensure()?;

        let root = root.to_path_buf();
        let source = source.to_path_buf();
        let scratch = self.scratch.path().to_path_buf();
        let target = scratch.join(&file_name);
        let (file, size, entries) = tokio::task::spawn_blocking(move || {
            let entries = write_archive(&root, &source, &scratch, &target)?;
            let file = File::open(&target)?;
            let size = file.metadata()?.len();
            Ok::<_, io::Error>((file, size, entries))
        })
        .await
        .map_err(|err| io::Error::other(err.to_string()))??;

        info!(file_name, entries, size, "archive built");
        Ok(ArchiveHandle {
            path: self.scratch.path().join(&file_name),
            file_name,
            file,
            size,
        })
    }
}

/// `dir_<客户端路径的 sha256 十六进制>.zip`
pub fn archive_file_name(client_path: &str) -> String {
    let digest = Sha256::digest(client_path.as_bytes());
    format!("{ARCHIVE_PREFIX}{}{ARCHIVE_SUFFIX}", hex::encode(digest))
}

/// 先写入暂存文件，完成后重命名为 `target`。
fn write_archive(root: &Path, source: &Path, scratch: &Path, target: &Path) -> io::Result<usize> {
    let mut staging = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(scratch)?;
    let entries = zip_tree(staging.as_file_mut(), root, source, scratch)?;
    staging.persist(target).map_err(|err| err.error)?;
    Ok(entries)
}

/// 将 `source` 下的常规文件写入 zip，跳过 `skip` 目录。
fn zip_tree<W: Write + Seek>(
    writer: W,
    root: &Path,
    source: &Path,
    skip: &Path,
) -> io::Result<usize> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(writer);
    let mut entries = 0;
    let walker = WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(skip));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry_name(root, entry.path())? else {
            warn!(path = ?entry.path(), "skipping non UTF-8 file name");
            continue;
        };
        let size = entry.metadata()?.len();
        let options = options.large_file(size >= u64::from(u32::MAX));
        zip.start_file(name, options).map_err(io::Error::other)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut zip)?;
        entries += 1;
    }
    zip.finish().map_err(io::Error::other)?;
    Ok(entries)
}

/// 相对 `root` 的条目名，以 `/` 分隔；名称不是 UTF-8 时返回 `None`。
fn entry_name(root: &Path, path: &Path) -> io::Result<Option<String>> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "entry outside share root"))?;
    let segments: Option<Vec<&str>> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect();
    Ok(segments.map(|segments| segments.join("/")))
}

/// 响应体释放后删除已发送的归档。
#[derive(Debug)]
pub struct RemoveOnDrop(pub PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = ?self.0, "served archive removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = ?self.0, error = %err, "failed to remove served archive"),
        }
    }
}
