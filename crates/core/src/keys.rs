//! Canonical lookup keys.
//!
//! Every record is stored under a key derived from human-entered text, so two
//! spellings a person would consider the same (case, accents, spacing,
//! punctuation) must land on the same key:
//!
//! ```text
//! ("João Gilberto", "Garota de Ipanema")  ->  joao_gilberto-garota_de_ipanema
//! (Artist, "oasis", "")                   ->  artist:oasis
//! ```
//!
//! Words inside a segment are joined with [`WORD_SEPARATOR`]; artist and
//! title segments are joined with [`SEGMENT_SEPARATOR`]. An empty string is
//! returned instead of an error when a key cannot be derived; callers must
//! not store anything under it.

use serde::{Deserialize, Serialize};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Joins the words of one segment.
pub const WORD_SEPARATOR: char = '_';

/// Joins the artist segment to the title segment.
pub const SEGMENT_SEPARATOR: char = '-';

/// Shape of a search, used to namespace search-cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Artists matching a name.
    Artist,
    /// Songs matching a title, any artist.
    Song,
    /// A specific song by a specific artist.
    ArtistSong,
    /// The song list of one artist.
    ArtistSongs,
}

impl SearchType {
    pub fn tag(self) -> &'static str {
        match self {
            SearchType::Artist => "artist",
            SearchType::Song => "song",
            SearchType::ArtistSong => "artist_song",
            SearchType::ArtistSongs => "artist_songs",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "artist" => Some(SearchType::Artist),
            "song" => Some(SearchType::Song),
            "artist_song" => Some(SearchType::ArtistSong),
            "artist_songs" => Some(SearchType::ArtistSongs),
            _ => None,
        }
    }
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Characters dropped outright so "don't" and "dont" agree.
fn is_elided(c: char) -> bool {
    matches!(c, '\'' | '\u{2019}' | '\u{2018}' | '`' | '\u{b4}' | '.')
}

/// Letters that carry no combining mark under NFD and would otherwise keep
/// their accented form.
fn fold_letter(c: char) -> Option<&'static str> {
    Some(match c {
        'ø' | 'Ø' => "o",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        'ß' | 'ẞ' => "ss",
        'ł' | 'Ł' => "l",
        'đ' | 'Đ' | 'ð' | 'Ð' => "d",
        'þ' | 'Þ' => "th",
        'ı' => "i",
        _ => return None,
    })
}

/// Normalize one segment (an artist name or a title).
///
/// Lowercases, folds diacritics and the stroked or ligature letters in
/// [`fold_letter`], drops apostrophes and periods, and turns
/// every other run of non-alphanumeric characters into a single
/// [`WORD_SEPARATOR`]. Leading and trailing separators are trimmed.
pub fn normalize_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;

    for c in input.nfd().filter(|c| !is_combining_mark(*c)) {
        if is_elided(c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push(WORD_SEPARATOR);
            }
            pending_separator = false;
            match fold_letter(c) {
                Some(folded) => out.push_str(folded),
                None => out.extend(c.to_lowercase()),
            }
        } else {
            pending_separator = true;
        }
    }

    out
}

/// Canonical chord-sheet key for an artist/title pair.
///
/// Returns an empty string when either part is empty after normalization.
pub fn normalize_key(artist: &str, title: &str) -> String {
    let artist = normalize_segment(artist);
    let title = normalize_segment(title);
    if artist.is_empty() || title.is_empty() {
        return String::new();
    }
    format!("{artist}{SEGMENT_SEPARATOR}{title}")
}

/// Re-normalize an already joined `artist-title` path.
///
/// Canonical keys pass through unchanged. The split happens at the first
/// [`SEGMENT_SEPARATOR`], which cannot occur inside a normalized artist.
pub fn canonicalize_path(path: &str) -> String {
    match path.trim().split_once(SEGMENT_SEPARATOR) {
        Some((artist, title)) => normalize_key(artist, title),
        None => String::new(),
    }
}

/// Canonical search-cache key: `<type tag>:<segments>`.
///
/// `artist` is required for every type except [`SearchType::Song`]; `song`
/// is required for [`SearchType::Song`] and [`SearchType::ArtistSong`].
pub fn search_key(search_type: SearchType, artist: &str, song: &str) -> String {
    let artist = normalize_segment(artist);
    let song = normalize_segment(song);

    let body = match search_type {
        SearchType::Artist | SearchType::ArtistSongs if !artist.is_empty() => artist,
        SearchType::Song if !song.is_empty() => song,
        SearchType::ArtistSong if !artist.is_empty() && !song.is_empty() => {
            format!("{artist}{SEGMENT_SEPARATOR}{song}")
        }
        _ => return String::new(),
    };

    format!("{}:{body}", search_type.tag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_spellings() {
        assert_eq!(
            normalize_key("João Gilberto", "Garota de Ipanema"),
            normalize_key("joao gilberto", "GAROTA DE IPANEMA")
        );
        assert_eq!(normalize_key("João Gilberto", "Garota de Ipanema"), "joao_gilberto-garota_de_ipanema");
    }

    #[test]
    fn test_letters_without_combining_marks_fold() {
        assert_eq!(normalize_key("Bjørk", "Jóga"), normalize_key("Bjork", "Joga"));
        assert_eq!(normalize_segment("Straße"), "strasse");
        assert_eq!(normalize_segment("Æsop Łódź"), "aesop_lodz");
        assert_eq!(normalize_segment("Sigur Rós Ágætis Byrjun"), "sigur_ros_agaetis_byrjun");
    }

    #[test]
    fn test_legacy_underscore_titles_collide() {
        assert_eq!(
            normalize_key("Natiruts", "Quero Ser Feliz Também"),
            normalize_key("natiruts", "quero_ser_feliz_tambem")
        );
    }

    #[test]
    fn test_punctuation_and_whitespace() {
        assert_eq!(normalize_key("  Guns N' Roses ", "Sweet Child O' Mine!"), "guns_n_roses-sweet_child_o_mine");
        assert_eq!(normalize_key("AC/DC", "T.N.T."), "ac_dc-tnt");
        assert_eq!(normalize_key("Legião   Urbana", "Tempo--Perdido"), "legiao_urbana-tempo_perdido");
    }

    #[test]
    fn test_sentinel_on_empty() {
        assert_eq!(normalize_key("", "Wonderwall"), "");
        assert_eq!(normalize_key("Oasis", ""), "");
        assert_eq!(normalize_key("!!!", "???"), "");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let a = normalize_key("Beyoncé", "Déjà Vu");
        let b = normalize_key("Beyoncé", "Déjà Vu");
        assert_eq!(a, b);
        assert_eq!(a, "beyonce-deja_vu");
    }

    #[test]
    fn test_canonicalize_path() {
        assert_eq!(canonicalize_path("oasis-wonderwall"), "oasis-wonderwall");
        assert_eq!(canonicalize_path("Oasis-Wonderwall "), "oasis-wonderwall");
        assert_eq!(canonicalize_path("joao_gilberto-garota_de_ipanema"), "joao_gilberto-garota_de_ipanema");
        assert_eq!(canonicalize_path("wonderwall"), "");
        assert_eq!(canonicalize_path("-wonderwall"), "");
    }

    #[test]
    fn test_canonicalize_path_idempotent() {
        let key = normalize_key("Tom Jobim", "Águas de Março");
        assert_eq!(canonicalize_path(&key), key);
        assert_eq!(canonicalize_path(&canonicalize_path(&key)), key);
    }

    #[test]
    fn test_search_keys_are_namespaced() {
        let artist_only = search_key(SearchType::Artist, "Oasis", "");
        let artist_songs = search_key(SearchType::ArtistSongs, "Oasis", "");
        let artist_song = search_key(SearchType::ArtistSong, "Oasis", "Wonderwall");

        assert_eq!(artist_only, "artist:oasis");
        assert_eq!(artist_songs, "artist_songs:oasis");
        assert_eq!(artist_song, "artist_song:oasis-wonderwall");
        assert_ne!(artist_only, artist_songs);
    }

    #[test]
    fn test_search_key_requires_components() {
        assert_eq!(search_key(SearchType::Artist, "", "Wonderwall"), "");
        assert_eq!(search_key(SearchType::Song, "Oasis", ""), "");
        assert_eq!(search_key(SearchType::ArtistSong, "Oasis", ""), "");
        assert_eq!(search_key(SearchType::Song, "", "Wonderwall"), "song:wonderwall");
    }
}
