use image::RgbImage;
use std::path::PathBuf;

/// Still images matched by a glob pattern, fed to the pipeline as frames in
/// path order.
pub struct ImageFileSource {
    paths: std::vec::IntoIter<PathBuf>,
}

impl ImageFileSource {
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        let mut paths = Vec::new();
        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Unreadable glob entry"),
            }
        }
        paths.sort();

        tracing::info!(pattern, images = paths.len(), "Image source ready");
        Ok(Self {
            paths: paths.into_iter(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl Iterator for ImageFileSource {
    type Item = (PathBuf, anyhow::Result<RgbImage>);

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let image = image::open(&path)
            .map(|img| img.to_rgb8())
            .map_err(anyhow::Error::from);
        Some((path, image))
    }
}
