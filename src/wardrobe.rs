use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::Error;

/// File extensions accepted as images.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A directory of image files, addressed by plain file name.
///
/// Used both for the garment wardrobe and for uploaded model photos.
#[derive(Debug, Clone)]
pub struct ImageDir {
    root: PathBuf,
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| extension.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Check that a name is a plain image file name, no directories involved.
pub fn check_image_name(name: &str) -> Result<(), Error> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.');

    if plain && has_image_extension(name) {
        Ok(())
    } else {
        Err(Error::BadImageName(name.into()))
    }
}

fn io_error(e: std::io::Error) -> Error {
    Error::ImageStorage(e.to_string())
}

impl ImageDir {
    /// Use the given directory, creating it if needed.
    pub async fn create<P: Into<PathBuf>>(root: P) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(io_error)?;
        debug!(?root, "Image directory ready");

        Ok(Self { root })
    }

    /// The directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the images in this directory, sorted.
    /// Other files are ignored.
    pub async fn list(&self) -> Result<Vec<String>, Error> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_error)?;
        let mut names = vec![];

        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let is_file = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_file())
                .unwrap_or(false);

            if let (true, Some(name)) = (is_file, entry.file_name().to_str()) {
                if check_image_name(name).is_ok() {
                    names.push(name.to_owned());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Store an image, replacing any image with the same name.
    pub async fn save(&self, name: &str, contents: Bytes) -> Result<PathBuf, Error> {
        check_image_name(name)?;

        let path = self.root.join(name);
        tokio::fs::write(&path, &contents).await.map_err(io_error)?;
        info!(?path, bytes = contents.len(), "Saved image");

        Ok(path)
    }

    /// Where an existing image lives.
    pub async fn path(&self, name: &str) -> Result<PathBuf, Error> {
        check_image_name(name)?;

        let path = self.root.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            _ => Err(Error::NoSuchImage(name.into())),
        }
    }
}
