use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const MATERIAL_FILES: &str = "materials/files";
pub const MATERIAL_VIDEOS: &str = "materials/videos";
pub const PROFILE_PICS: &str = "profile_pics";

/// Uploaded files live under a media root, addressed by a random id so the
/// original filename never collides or leaks into the path.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn random_name(original_name: &str) -> String {
        let id = Uuid::new_v4();
        match Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
        {
            Some(ext) => format!("{id}.{ext}"),
            None => id.to_string(),
        }
    }

    /// Store bytes under `subdir`, returning the relative path to persist.
    pub async fn save(
        &self,
        subdir: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        let relative = format!("{subdir}/{}", Self::random_name(original_name));
        let absolute = self.root.join(&relative);
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&absolute, bytes).await?;
        Ok(relative)
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub async fn delete(&self, relative: &str) -> anyhow::Result<()> {
        let absolute = self.root.join(relative);
        if tokio::fs::try_exists(&absolute).await? {
            tokio::fs::remove_file(absolute).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_uses_random_name_and_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        let a = store
            .save(MATERIAL_FILES, "modul bab 1.pdf", b"%PDF-1.4")
            .await
            .unwrap();
        let b = store
            .save(MATERIAL_FILES, "modul bab 1.pdf", b"%PDF-1.4")
            .await
            .unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("materials/files/"));
        assert!(a.ends_with(".pdf"));
        assert!(!a.contains("modul"));
        assert_eq!(tokio::fs::read(store.absolute(&a)).await.unwrap(), b"%PDF-1.4");

        store.delete(&a).await.unwrap();
        assert!(!store.absolute(&a).exists());
        // deleting a missing file is not an error
        store.delete(&a).await.unwrap();
    }
}
