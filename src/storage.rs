use serde::Serialize;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// 以 `root` 为共享根目录，转换为绝对路径并做词法规范化。
    pub fn new(root: PathBuf) -> io::Result<Self> {
        let root = normalize(&std::path::absolute(root)?);
        Ok(Self { root })
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将不可信的客户端路径映射到共享目录内，不访问磁盘。
    pub fn resolve(&self, client_path: &str) -> Result<PathBuf, StorageError> {
        if client_path.contains('\0') {
            return Err(StorageError::InvalidPath);
        }
        let relative = client_path.strip_prefix('/').unwrap_or(client_path);
        let candidate = normalize(&self.root.join(relative));
        if is_within(&self.root, &candidate) {
            Ok(candidate)
        } else {
            Err(StorageError::InvalidPath)
        }
    }

    pub async fn list_dir(
        &self,
        client_path: &str,
        show_hidden: bool,
    ) -> Result<DirListing, StorageError> {
        let target = self.resolve(client_path)?;
        let mut dir = fs::read_dir(&target).await?;
        let mut listing = DirListing::default();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            // 跟随符号链接；失效链接按目录列出
            let is_file = fs::metadata(entry.path())
                .await
                .map(|metadata| metadata.is_file())
                .unwrap_or(false);
            if is_file {
                listing.files.push(name);
            } else {
                listing.folders.push(name);
            }
        }

        listing.files.sort();
        listing.folders.sort();
        Ok(listing)
    }

    /// 创建单级目录，父目录缺失或目标已存在时失败。
    pub async fn create_dir(&self, client_path: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(client_path)?;
        fs::create_dir(&target).await?;
        Ok(target)
    }
}

/// 词法消除 `.` 与 `..`，不访问文件系统。
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str())
            }
            Component::CurDir => continue,
            Component::ParentDir => {
                normalized.pop();
            }
        }
    }
    normalized
}

/// 按路径分段判断包含关系：`/data-evil` 不在 `/data` 之内。
fn is_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirListing {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}
