//! Bundled site presets.
//!
//! A preset carries the feed templates and domain filters that suit one
//! blog host. It is chosen by name (`preset = "tumblr"`) or, unless
//! `auto_preset = false`, picked when the seed URL matches its site pattern.

use regex::Regex;

use crate::crawl::FeedTemplate;

/// One bundled preset.
#[derive(Debug)]
pub struct Preset {
    pub name: &'static str,
    /// Seed URLs matching this pattern select the preset automatically.
    pub site: &'static str,
    /// `(pattern, template, rank)`; patterns listed first win.
    pub templates: &'static [(&'static str, &'static str, i64)],
    pub follow_domains: &'static [&'static str],
    pub ignore_domains: &'static [&'static str],
}

impl Preset {
    pub fn feed_templates(&self) -> Vec<FeedTemplate> {
        self.templates
            .iter()
            .map(|(pattern, template, rank)| FeedTemplate::new(pattern, template, *rank))
            .collect()
    }

    fn matches(&self, seed: &str) -> bool {
        Regex::new(self.site).is_ok_and(|site| site.is_match(seed))
    }
}

pub static PRESETS: [Preset; 3] = [
    Preset {
        name: "livejournal",
        site: r"^https?://[^/]+\.livejournal\.com(?:[/:?#]|$)",
        templates: &[
            (r"^https?://[^/]+\.livejournal\.com(?:[/:?#]|$)", "http://{netloc}/data/rss", 100),
            (r"^https?://[^/]+\.livejournal\.com(?:[/:?#]|$)", "https://{netloc}/data/rss", 200),
            (r"^https?://[^/]+\.livejournal\.com(?:[/:?#]|$)", "http://{netloc}/data/atom", 300),
            (r"^https?://[^/]+\.livejournal\.com(?:[/:?#]|$)", "https://{netloc}/data/atom", 400),
        ],
        follow_domains: &["livejournal.com"],
        ignore_domains: &[],
    },
    Preset {
        name: "tumblr",
        site: r"^https?://[^/]+\.tumblr\.com(?:[/:?#]|$)",
        templates: &[
            // Renamed blogs keep their posts under the old name.
            (r"^https?://(?P<blog>[^/.]+)-deactivated\d*\.tumblr\.com", "http://{blog}.tumblr.com/rss", 1),
            (r"^https?://(?P<blog>[^/.]+)-deactivated\d*\.tumblr\.com", "https://{blog}.tumblr.com/rss", 2),
            (r"^https?://(?P<blog>[^/.]+)-deactivated\d*\.tumblr\.com", "http://{netloc}/rss", 3),
            (r"^https?://(?P<blog>[^/.]+)-deactivated\d*\.tumblr\.com", "https://{netloc}/rss", 4),
            (r"^https?://[^/]+\.tumblr\.com(?:[/:?#]|$)", "http://{netloc}/rss", 1),
            (r"^https?://[^/]+\.tumblr\.com(?:[/:?#]|$)", "https://{netloc}/rss", 2),
        ],
        follow_domains: &["tumblr.com"],
        ignore_domains: &[
            "www.tumblr.com",
            "staff.tumblr.com",
            "tumblr.com",
            "engineering.tumblr.com",
            "support.tumblr.com",
            "assets.tumblr.com",
        ],
    },
    Preset {
        name: "wordpress",
        site: r"^https?://[^/]+\.wordpress\.com(?:[/:?#]|$)",
        templates: &[
            (r"^https?://[^/]+\.wordpress\.com(?:[/:?#]|$)", "http://{netloc}/feed/", 1),
            (r"^https?://[^/]+\.wordpress\.com(?:[/:?#]|$)", "https://{netloc}/feed/", 2),
            (r"^https?://[^/]+\.wordpress\.com(?:[/:?#]|$)", "http://{netloc}/?feed=rss2", 3),
            (r"^https?://[^/]+\.wordpress\.com(?:[/:?#]|$)", "https://{netloc}/?feed=rss2", 4),
            (r"^https?://[^/]+\.wordpress\.com(?:[/:?#]|$)", "http://{netloc}/feed/atom/", 5),
            (r"^https?://[^/]+\.wordpress\.com(?:[/:?#]|$)", "https://{netloc}/feed/atom/", 6),
        ],
        follow_domains: &["wordpress.com"],
        ignore_domains: &[],
    },
];

/// The preset called `name`.
pub fn find(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// The first preset whose site pattern matches `seed`.
pub fn detect(seed: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.matches(seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::TemplateSet;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_detect_by_seed() {
        assert_eq!(detect("https://someone.tumblr.com/rss").map(|p| p.name), Some("tumblr"));
        assert_eq!(detect("http://diary.livejournal.com/data/rss").map(|p| p.name), Some("livejournal"));
        assert_eq!(detect("https://x.wordpress.com").map(|p| p.name), Some("wordpress"));
        assert!(detect("https://tumblr.com.evil.example/feed").is_none());
        assert!(detect("https://blog.example/feed").is_none());
    }

    #[test]
    fn test_find_by_name() {
        assert_eq!(find("Tumblr").map(|p| p.name), Some("tumblr"));
        assert!(find("myspace").is_none());
    }

    #[test]
    fn test_every_preset_compiles() {
        for preset in &PRESETS {
            assert!(Regex::new(preset.site).is_ok(), "{}", preset.name);
            TemplateSet::compile(&preset.feed_templates()).unwrap();
        }
    }

    #[test]
    fn test_deactivated_tumblr_tries_the_old_name_first() {
        let set = TemplateSet::compile(&find("tumblr").unwrap().feed_templates()).unwrap();
        assert_eq!(
            set.candidates("https://artist-deactivated2019.tumblr.com"),
            vec![
                "http://artist.tumblr.com/rss".to_string(),
                "https://artist.tumblr.com/rss".to_string(),
                "http://artist-deactivated2019.tumblr.com/rss".to_string(),
                "https://artist-deactivated2019.tumblr.com/rss".to_string(),
            ]
        );
        assert_eq!(
            set.candidates("https://artist.tumblr.com"),
            vec!["http://artist.tumblr.com/rss".to_string(), "https://artist.tumblr.com/rss".to_string()]
        );
    }
}
