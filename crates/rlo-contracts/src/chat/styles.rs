use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Style {
    #[default]
    Natural,
    Realistic,
    Cinematic,
    Anime,
    Cartoon,
    OilPainting,
    Watercolor,
    DigitalArt,
    Render3d,
    Sketch,
    Support,
}

impl Style {
    pub const ALL: [Style; 11] = [
        Style::Natural,
        Style::Realistic,
        Style::Cinematic,
        Style::Anime,
        Style::Cartoon,
        Style::OilPainting,
        Style::Watercolor,
        Style::DigitalArt,
        Style::Render3d,
        Style::Sketch,
        Style::Support,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Style::Natural => "Natural",
            Style::Realistic => "Realistic",
            Style::Cinematic => "Cinematic",
            Style::Anime => "Anime",
            Style::Cartoon => "Cartoon",
            Style::OilPainting => "Oil Painting",
            Style::Watercolor => "Watercolor",
            Style::DigitalArt => "Digital Art",
            Style::Render3d => "3D Render",
            Style::Sketch => "Sketch",
            Style::Support => "Support",
        }
    }

    /// Name shown in the picker next to the label.
    pub fn display_name(self) -> &'static str {
        match self {
            Style::Natural => "طبيعي",
            Style::Realistic => "واقعي",
            Style::Cinematic => "سينمائي",
            Style::Anime => "أنمي",
            Style::Cartoon => "كرتون",
            Style::OilPainting => "لوحة زيتية",
            Style::Watercolor => "ألوان مائية",
            Style::DigitalArt => "فن رقمي",
            Style::Render3d => "ثلاثي الأبعاد",
            Style::Sketch => "رسم بالقلم",
            Style::Support => "الدعم الفني",
        }
    }

    /// Prompt prefix for this style. `Support` never reaches the model.
    pub fn phrase(self) -> Option<String> {
        if self.is_support() {
            return None;
        }
        Some(format!("{} style", self.label()))
    }

    pub fn is_support(self) -> bool {
        self == Style::Support
    }

    pub fn from_label(raw: &str) -> Option<Style> {
        let normalized = raw.trim();
        if normalized.is_empty() {
            return None;
        }
        Style::ALL.into_iter().find(|style| {
            style.label().eq_ignore_ascii_case(normalized) || style.display_name() == normalized
        })
    }

    /// Accepts a 1-based picker index or a label.
    pub fn from_picker_input(raw: &str) -> Option<Style> {
        let trimmed = raw.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            return index
                .checked_sub(1)
                .and_then(|idx| Style::ALL.get(idx).copied());
        }
        Style::from_label(trimmed)
    }
}

pub fn compose_prompt(style: Style, text: &str) -> String {
    match style.phrase() {
        Some(phrase) => format!("{phrase}, {text}"),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSelector {
    selected: Style,
    picker_open: bool,
}

impl StyleSelector {
    pub fn new(selected: Style) -> Self {
        Self {
            selected,
            picker_open: false,
        }
    }

    pub fn selected(&self) -> Style {
        self.selected
    }

    pub fn picker_open(&self) -> bool {
        self.picker_open
    }

    pub fn toggle_picker(&mut self) {
        self.picker_open = !self.picker_open;
    }

    pub fn select(&mut self, style: Style) {
        self.selected = style;
        self.picker_open = false;
    }

    /// Interaction outside the picker: closes it, keeps the selection.
    pub fn dismiss(&mut self) {
        self.picker_open = false;
    }
}
