//! Images and reference matching.

use serde::{Deserialize, Serialize};

use crate::container::MIN_PREFIX_LEN;

/// An image held by one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Engine-assigned image id (digest-ish).
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub engine_id: String,
}

/// Split `name[:tag]` or `name@digest` into `(name, tag)`.
///
/// A `:` inside the last path component separates the tag; a `:` that is
/// part of a registry host (`host:5000/name`) does not.
pub fn parse_repository_tag(reference: &str) -> (&str, &str) {
    if let Some((name, digest)) = reference.split_once('@') {
        return (name, digest);
    }
    match reference.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (reference, ""),
    }
}

impl Image {
    /// Whether `reference` identifies this image.
    ///
    /// Matches the exact id, an id prefix of at least [`MIN_PREFIX_LEN`]
    /// characters, or a repository reference. With `match_tag` the tag must
    /// agree (an untagged reference implies `latest`); without it the
    /// repository name alone decides.
    pub fn match_ref(&self, reference: &str, match_tag: bool) -> bool {
        if reference.is_empty() {
            return false;
        }

        if self.id == reference
            || (reference.len() >= MIN_PREFIX_LEN && self.id.starts_with(reference))
        {
            return true;
        }

        let (name, tag) = parse_repository_tag(reference);
        let want_tag = if tag.is_empty() { "latest" } else { tag };

        for repo_ref in self.repo_tags.iter().chain(self.repo_digests.iter()) {
            let (repo_name, repo_tag) = parse_repository_tag(repo_ref);
            if repo_name != name {
                continue;
            }
            if !match_tag || repo_tag == want_tag {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        Image {
            id: "378954456789".to_string(),
            repo_tags: vec!["name:latest".to_string()],
            repo_digests: vec![
                "name@sha256:a973f1415c489a934bf56dd653079d36b4ec717760215645726439de9705911d"
                    .to_string(),
            ],
            engine_id: "engine-1".to_string(),
        }
    }

    #[test]
    fn matches_id_and_prefix() {
        let img = image();
        assert!(img.match_ref("378954456789", true));
        assert!(img.match_ref("3789", true));
        assert!(img.match_ref("378", true));
        assert!(!img.match_ref("37", true));
        assert!(!img.match_ref("", true));
    }

    #[test]
    fn matches_repo_name_with_and_without_tag() {
        let img = image();
        assert!(img.match_ref("name:latest", true));
        assert!(img.match_ref("name", true));
        assert!(!img.match_ref("nam", true));
        assert!(img.match_ref("name:latest", false));
        assert!(img.match_ref("name", false));
        assert!(!img.match_ref("name:v2", true));
        assert!(img.match_ref("name:v2", false));
    }

    #[test]
    fn matches_digest() {
        let img = image();
        assert!(img.match_ref(
            "name@sha256:a973f1415c489a934bf56dd653079d36b4ec717760215645726439de9705911d",
            true
        ));
        assert!(!img.match_ref(
            "name@sha256:111111415c489a934bf56dd653079d36b4ec717760215645726439de9705911d",
            true
        ));
    }

    #[test]
    fn matches_private_registry() {
        let img = Image {
            id: "378954456789".to_string(),
            repo_tags: vec!["private.registry.com:5000/name:latest".to_string()],
            ..Image::default()
        };

        assert!(img.match_ref("private.registry.com:5000/name:latest", true));
        assert!(img.match_ref("private.registry.com:5000/name", true));
        assert!(!img.match_ref("private.registry.com:5000/nam", true));
        assert!(img.match_ref("private.registry.com:5000/name", false));
    }

    #[test]
    fn repository_tag_parsing() {
        assert_eq!(
            parse_repository_tag("localhost.localdomain:5000/samalba/hipache:latest"),
            ("localhost.localdomain:5000/samalba/hipache", "latest")
        );
        assert_eq!(
            parse_repository_tag("localhost:5000/foo/bar@sha256:bc8813ea7b36"),
            ("localhost:5000/foo/bar", "sha256:bc8813ea7b36")
        );
        assert_eq!(
            parse_repository_tag("localhost:5000/foo/bar"),
            ("localhost:5000/foo/bar", "")
        );
        assert_eq!(parse_repository_tag("redis:7"), ("redis", "7"));
        assert_eq!(parse_repository_tag("redis"), ("redis", ""));
    }
}
