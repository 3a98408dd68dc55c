use serde::Serialize;

pub const COMIC_TAG: &str = "comic";
pub const INTERMEDIATE_TAG: &str = "intermediate";
pub const IMAGE_TAG: &str = "img";
pub const MARKDOWN_BOTTOM_TAG: &str = "bottom";
pub const MARKDOWN_STACK_TAG: &str = "stack";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameWidth {
    Full,
    Half,
    Third,
    TwoThird,
}

impl FrameWidth {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Half => "half",
            Self::Third => "third",
            Self::TwoThird => "twothird",
        }
    }
}

/// Presentation hints read from a cell's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComicTags {
    pub comic: bool,
    pub intermediate: bool,
    pub image: bool,
    pub markdown_bottom: bool,
    pub markdown_stack: bool,
    pub width: Option<FrameWidth>,
    pub height: Option<String>,
}

impl ComicTags {
    pub fn parse<S: AsRef<str>>(tags: &[S]) -> Self {
        let has = |needle: &str| tags.iter().any(|tag| tag.as_ref() == needle);
        // Precedence follows the tag order of the width ladder, not the cell's tag order.
        let width = [
            FrameWidth::Full,
            FrameWidth::Half,
            FrameWidth::Third,
            FrameWidth::TwoThird,
        ]
        .into_iter()
        .find(|width| has(width.as_str()));
        let height = tags
            .iter()
            .map(AsRef::as_ref)
            .find(|tag| tag.starts_with("height"))
            .and_then(|tag| tag.split(':').nth(1))
            .map(|value| value.trim().to_string());

        Self {
            comic: has(COMIC_TAG),
            intermediate: has(INTERMEDIATE_TAG),
            image: has(IMAGE_TAG),
            markdown_bottom: has(MARKDOWN_BOTTOM_TAG),
            markdown_stack: has(MARKDOWN_STACK_TAG),
            width,
            height,
        }
    }

    /// Intermediate cells are framed like comic cells.
    pub fn is_comic_cell(&self) -> bool {
        self.comic || self.intermediate
    }
}
