//! 临时写入与原子替换：上传文件要么完整出现，要么不出现。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{debug, warn};
use uuid::Uuid;

/// 可用于原子替换的临时文件封装。
///
/// 未完成替换即被丢弃时（例如客户端中途断开），在 Drop 中删除临时文件。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
    settled: bool,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_name = format!(".{base}.tmp.{}", Uuid::new_v4());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
            settled: false,
        })
    }

    /// 返回临时文件的可写句柄。
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(mut self) {
        if fs::remove_file(&self.temp_path).await.is_ok() {
            self.settled = true;
        }
    }

    /// 同步、设置权限并原子替换目标文件；失败时由 Drop 清理临时文件。
    pub async fn finalize(mut self, mode: u32) -> io::Result<()> {
        self.file.sync_all().await?;
        set_mode(&self.temp_path, mode).await?;
        fs::rename(&self.temp_path, &self.target).await?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(path = ?self.temp_path, "abandoned temp file removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = ?self.temp_path, error = %err, "failed to remove temp file"),
        }
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::AtomicFile;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn cleanup_leaves_no_trace() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("report.pdf");
        let mut atomic = AtomicFile::new(&target).await.expect("atomic");
        atomic.file_mut().write_all(b"partial").await.expect("write");
        atomic.cleanup().await;

        assert!(!target.exists());
        let leftovers = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn finalize_replaces_target() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("notes.txt");
        std::fs::write(&target, b"old").expect("seed");

        let mut atomic = AtomicFile::new(&target).await.expect("atomic");
        atomic.file_mut().write_all(b"new").await.expect("write");
        atomic.finalize(0o600).await.expect("finalize");

        assert_eq!(std::fs::read(&target).expect("read"), b"new");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&target).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn dropped_without_finalize_removes_temp_file() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("x.bin");
        let mut atomic = AtomicFile::new(&target).await.expect("atomic");
        atomic.file_mut().write_all(b"partial").await.expect("write");
        drop(atomic);

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }
}
