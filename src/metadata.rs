//! Tag extraction for candidate audio files

use std::fs;
use std::path::{Path, PathBuf};

use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::tag::Accessor;
use md5::{Digest, Md5};

use crate::error::LibraryError;
use crate::models::TrackTags;

/// Reads track tags from a file
///
/// Implementations must fail for anything that is not parseable audio; the
/// scanner relies on that to decide which files become catalog entries.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<TrackTags, LibraryError>;
}

impl<F> MetadataExtractor for F
where
    F: Fn(&Path) -> Result<TrackTags, LibraryError> + Send + Sync,
{
    fn extract(&self, path: &Path) -> Result<TrackTags, LibraryError> {
        self(path)
    }
}

/// Extractor backed by lofty
#[derive(Debug, Clone, Default)]
pub struct LoftyExtractor {
    covers_dir: Option<PathBuf>,
}

impl LoftyExtractor {
    pub fn new(covers_dir: Option<PathBuf>) -> Self {
        Self { covers_dir }
    }
}

impl MetadataExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<TrackTags, LibraryError> {
        let tagged_file = lofty::read_from_path(path)
            .map_err(|e| LibraryError::extraction_failed(path.to_path_buf(), e.to_string()))?;

        let mut tags = TrackTags::default();

        let duration = tagged_file.properties().duration();
        if !duration.is_zero() {
            tags.duration = Some(duration.as_secs_f64());
        }

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Ok(tags);
        };

        tags.title = tag.title().map(|v| v.to_string());
        tags.artist = tag.artist().map(|v| v.to_string());
        tags.album = tag.album().map(|v| v.to_string());
        tags.album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|v| v.to_string());
        tags.genre = tag.genre().map(|v| v.to_string());
        tags.track = tag.track();
        tags.disk = tag.disk();
        tags.year = tag
            .year()
            .or_else(|| tag.get_string(&ItemKey::RecordingDate).and_then(parse_year));

        if let (Some(dir), Some(picture)) = (&self.covers_dir, pick_picture(tag.pictures())) {
            match store_cover(dir, picture.data()) {
                Ok(cover) => tags.picture = Some(cover.to_string_lossy().to_string()),
                Err(e) => log::warn!("Failed to cache cover for {}: {}", path.display(), e),
            }
        }

        Ok(tags)
    }
}

fn parse_year(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
}

fn image_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "png"
    } else if bytes.starts_with(b"GIF8") {
        "gif"
    } else {
        "jpg"
    }
}

/// Write cover bytes once under their MD5 digest and return the file path
fn store_cover(dir: &Path, data: &[u8]) -> std::io::Result<PathBuf> {
    let digest = Md5::digest(data);
    let target = dir.join(format!("{:x}.{}", digest, image_extension(data)));
    if !target.exists() {
        fs::create_dir_all(dir)?;
        fs::write(&target, data)?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LibraryErrorKind;

    #[test]
    fn test_lofty_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp3");
        fs::write(&path, b"definitely not audio").unwrap();

        let err = LoftyExtractor::default().extract(&path).unwrap_err();
        assert_eq!(err.kind, LibraryErrorKind::ExtractionFailed);
        assert_eq!(err.path, Some(path));
    }

    #[test]
    fn test_lofty_missing_file_fails() {
        let err = LoftyExtractor::default()
            .extract(Path::new("/definitely/missing.flac"))
            .unwrap_err();
        assert_eq!(err.kind, LibraryErrorKind::ExtractionFailed);
    }

    #[test]
    fn test_closure_extractor() {
        let extractor = |_: &Path| -> Result<TrackTags, LibraryError> {
            Ok(TrackTags {
                title: Some("T".into()),
                ..Default::default()
            })
        };
        let tags = extractor.extract(Path::new("/x.mp3")).unwrap();
        assert_eq!(tags.title.as_deref(), Some("T"));
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("1999-04-01"), Some(1999));
        assert_eq!(parse_year("99"), None);
        assert_eq!(parse_year("n/a"), None);
    }

    #[test]
    fn test_store_cover_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let covers = dir.path().join("covers");
        let png = [0x89, 0x50, 0x4E, 0x47, 1, 2, 3];

        let first = store_cover(&covers, &png).unwrap();
        let second = store_cover(&covers, &png).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.extension().unwrap(), "png");
        assert_eq!(fs::read(&first).unwrap(), png);
    }
}
