use serde::{Deserialize, Serialize};

use tilestream_core::TileCoord;

/// Tile URL template(s) with `{z}`, `{x}`, `{y}` and `{-y}` placeholders.
///
/// A `{a-c}` or `{1-4}` range in a template expands into one template per
/// value; tiles are spread over them by a hash of their coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTemplate {
    templates: Vec<String>,
}

impl UrlTemplate {
    pub fn new(template: &str) -> Self {
        Self {
            templates: expand_ranges(template),
        }
    }

    pub fn from_list(templates: &[String]) -> Self {
        Self {
            templates: templates.iter().flat_map(|t| expand_ranges(t)).collect(),
        }
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// URL for a tile, `None` when there is no template.
    pub fn expand(&self, coord: &TileCoord) -> Option<String> {
        if self.templates.is_empty() {
            return None;
        }
        let hash = (coord.x << coord.z).wrapping_add(coord.y);
        let index = hash.rem_euclid(self.templates.len() as i64) as usize;
        let flipped_y = coord.span() - coord.y - 1;
        Some(
            self.templates[index]
                .replace("{z}", &coord.z.to_string())
                .replace("{x}", &coord.x.to_string())
                .replace("{-y}", &flipped_y.to_string())
                .replace("{y}", &coord.y.to_string()),
        )
    }
}

/// Expand the first `{a-c}` / `{1-4}` range of a template.
fn expand_ranges(template: &str) -> Vec<String> {
    let Some(open) = template.find('{') else {
        return vec![template.to_string()];
    };
    let Some(len) = template[open..].find('}') else {
        return vec![template.to_string()];
    };
    let inner = &template[open + 1..open + len];
    let (prefix, suffix) = (&template[..open], &template[open + len + 1..]);

    let values = inner
        .split_once('-')
        .map(|(start, end)| letter_range(start, end).or_else(|| number_range(start, end)).unwrap_or_default())
        .unwrap_or_default();
    if values.is_empty() {
        // Not a range, e.g. `{z}`: keep it and look further along.
        return expand_ranges(suffix)
            .into_iter()
            .map(|rest| format!("{prefix}{{{inner}}}{rest}"))
            .collect();
    }
    values
        .into_iter()
        .flat_map(|value| {
            expand_ranges(suffix)
                .into_iter()
                .map(move |rest| format!("{prefix}{value}{rest}"))
        })
        .collect()
}

/// `a-c` style range of single lowercase letters.
fn letter_range(start: &str, end: &str) -> Option<Vec<String>> {
    let ([s], [e]) = (start.as_bytes(), end.as_bytes()) else {
        return None;
    };
    if !(s.is_ascii_lowercase() && e.is_ascii_lowercase() && s <= e) {
        return None;
    }
    Some((*s..=*e).map(|c| (c as char).to_string()).collect())
}

fn number_range(start: &str, end: &str) -> Option<Vec<String>> {
    let (s, e) = (start.parse::<u32>().ok()?, end.parse::<u32>().ok()?);
    (s <= e).then(|| (s..=e).map(|n| n.to_string()).collect())
}
