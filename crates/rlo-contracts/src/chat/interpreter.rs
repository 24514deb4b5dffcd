use super::styles::Style;

/// Literal input that saves the most recent generated image.
pub const DOWNLOAD_PREVIOUS_IMAGE_COMMAND: &str = "تحميل الصورة السابقة";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Ignore,
    DownloadPreviousImage,
    Support { text: String },
    Generate { text: String },
}

/// Decides how a submission is handled before any network activity.
pub fn route_submission(raw: &str, style: Style, in_flight: bool) -> Route {
    let text = raw.trim();
    if text.is_empty() || in_flight {
        return Route::Ignore;
    }
    if text == DOWNLOAD_PREVIOUS_IMAGE_COMMAND {
        return Route::DownloadPreviousImage;
    }
    if style.is_support() {
        return Route::Support {
            text: text.to_string(),
        };
    }
    Route::Generate {
        text: text.to_string(),
    }
}
