use std::fmt;
use std::path::{Path, PathBuf};

use super::error::SubjectError;

const MIN_INPUT_CHARS: usize = 3;

/// Normalized identity of the entity whose pages are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    raw_input: String,
    slug: String,
    display_name: String,
    folder: PathBuf,
}

/// One item on a page. Pages are numbered from 1, `item` is in `1..=items_per_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemCoordinate {
    pub page: u32,
    pub item: u32,
}

impl ItemCoordinate {
    pub fn new(page: u32, item: u32) -> Self {
        Self { page, item }
    }
}

impl fmt::Display for ItemCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.page, self.item)
    }
}

pub fn validate_input(input: &str) -> Result<&str, SubjectError> {
    let trimmed = input.trim();

    if trimmed.chars().count() < MIN_INPUT_CHARS {
        return Err(SubjectError::TooShort {
            min: MIN_INPUT_CHARS,
        });
    }

    let mut previous_space = false;
    for c in trimmed.chars() {
        if c == ' ' {
            if previous_space {
                return Err(SubjectError::RepeatedSpace);
            }
            previous_space = true;
        } else if c.is_alphanumeric() {
            previous_space = false;
        } else {
            return Err(SubjectError::InvalidCharacter(c));
        }
    }

    Ok(trimmed)
}

pub fn slugify(input: &str) -> String {
    input.to_lowercase().replace(' ', "-")
}

/// `a-b-c-d` becomes `"A B & C D"`, anything else is hyphens to spaces, title-cased.
pub fn display_name_from_slug(slug: &str) -> String {
    let tokens: Vec<&str> = slug.split('-').collect();

    if tokens.len() == 4 {
        format!(
            "{} {} & {} {}",
            title_word(tokens[0]),
            title_word(tokens[1]),
            title_word(tokens[2]),
            title_word(tokens[3])
        )
    } else {
        tokens
            .iter()
            .map(|t| title_word(t))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn title_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

impl Subject {
    pub fn parse(input: &str, library_dir: &Path) -> Result<Self, SubjectError> {
        let raw = validate_input(input)?;
        let slug = slugify(raw);
        let display_name = display_name_from_slug(&slug);
        let folder = library_dir.join(&display_name);

        Ok(Self {
            raw_input: raw.to_string(),
            slug,
            display_name,
            folder,
        })
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn file_name(&self, coord: ItemCoordinate) -> String {
        format!("{}-{}-{}.jpg", self.display_name, coord.page, coord.item)
    }

    pub fn item_path(&self, coord: ItemCoordinate) -> PathBuf {
        self.folder.join(self.file_name(coord))
    }

    pub fn item_url(&self, base_url: &str, coord: ItemCoordinate) -> String {
        let slug = urlencoding::encode(&self.slug);
        format!(
            "{}/{}/{}/{}-{}.jpg",
            base_url.trim_end_matches('/'),
            slug,
            coord.page,
            slug,
            coord.item
        )
    }

    /// First item of a page, the one probed for existence.
    pub fn probe_coordinate(page: u32) -> ItemCoordinate {
        ItemCoordinate::new(page, 1)
    }

    pub fn thumbnail_path(&self, thumbnail_dir: &Path) -> PathBuf {
        let stem = self.display_name.to_lowercase().replace(' ', "-");
        thumbnail_dir.join(format!("{}-thumb.jpg", stem))
    }
}
