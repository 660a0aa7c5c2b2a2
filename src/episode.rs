use serde::{Deserialize, Serialize};

/// Square sizes offered to the host for a single cover image
pub const ARTWORK_SIZES: [u32; 4] = [96, 128, 256, 512];

/// One artwork variant as hosts expect it (`src` + `"WxH"` size)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub src: String,
    pub sizes: String,
}

/// Display metadata for the loaded episode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub title: String,
    pub artist: String,
    pub artwork: Vec<Artwork>,
}

impl EpisodeMetadata {
    /// Metadata for an episode of a podcast.
    ///
    /// The podcast title doubles as the artist. The episode's own image is
    /// preferred; without one the podcast cover is used.
    pub fn for_episode(
        episode_title: &str,
        podcast_title: &str,
        episode_image: Option<&str>,
        podcast_cover: Option<&str>,
    ) -> Self {
        let cover = episode_image
            .filter(|url| !url.trim().is_empty())
            .or(podcast_cover.filter(|url| !url.trim().is_empty()));

        Self {
            title: episode_title.to_string(),
            artist: podcast_title.to_string(),
            artwork: cover.map(artwork_variants).unwrap_or_default(),
        }
    }

    /// Largest artwork variant, for hosts that take a single cover URL
    pub fn cover_url(&self) -> Option<&str> {
        self.artwork
            .iter()
            .max_by_key(|art| side_length(&art.sizes))
            .map(|art| art.src.as_str())
    }
}

fn artwork_variants(src: &str) -> Vec<Artwork> {
    ARTWORK_SIZES
        .iter()
        .map(|size| Artwork {
            src: src.to_string(),
            sizes: format!("{size}x{size}"),
        })
        .collect()
}

fn side_length(sizes: &str) -> u32 {
    sizes
        .split('x')
        .next()
        .and_then(|side| side.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_image_preferred_over_podcast_cover() {
        let metadata = EpisodeMetadata::for_episode(
            "Episode 12",
            "Some Podcast",
            Some("https://cdn.example.com/ep12.jpg"),
            Some("https://cdn.example.com/show.jpg"),
        );
        assert_eq!(metadata.artist, "Some Podcast");
        assert_eq!(metadata.artwork.len(), 4);
        assert!(metadata
            .artwork
            .iter()
            .all(|art| art.src == "https://cdn.example.com/ep12.jpg"));
        assert_eq!(metadata.artwork[0].sizes, "96x96");
        assert_eq!(metadata.artwork[3].sizes, "512x512");
    }

    #[test]
    fn test_podcast_cover_fallback() {
        let metadata = EpisodeMetadata::for_episode(
            "Episode 12",
            "Some Podcast",
            Some(""),
            Some("https://cdn.example.com/show.jpg"),
        );
        assert_eq!(metadata.cover_url(), Some("https://cdn.example.com/show.jpg"));
    }

    #[test]
    fn test_no_artwork() {
        let metadata = EpisodeMetadata::for_episode("Episode 12", "Some Podcast", None, None);
        assert!(metadata.artwork.is_empty());
        assert_eq!(metadata.cover_url(), None);
    }
}
