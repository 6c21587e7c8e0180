use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HighlightError;

pub const DEFAULT_USER_ID: &str = "anonymous-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    #[default]
    Yellow,
    LightGreen,
    LightBlue,
    LightPink,
    LightCoral,
}

impl Color {
    pub const ALL: [Color; 5] = [
        Color::Yellow,
        Color::LightGreen,
        Color::LightBlue,
        Color::LightPink,
        Color::LightCoral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Yellow => "yellow",
            Color::LightGreen => "lightgreen",
            Color::LightBlue => "lightblue",
            Color::LightPink => "lightpink",
            Color::LightCoral => "lightcoral",
        }
    }

}

impl FromStr for Color {
    type Err = HighlightError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yellow" => Ok(Color::Yellow),
            "lightgreen" => Ok(Color::LightGreen),
            "lightblue" => Ok(Color::LightBlue),
            "lightpink" => Ok(Color::LightPink),
            "lightcoral" => Ok(Color::LightCoral),
            _ => Err(HighlightError::Validation(format!("Unsupported color: {}", s))),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted record of selected page text.
///
/// The same shape is used on the wire, in the record store and in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub text: String,
    #[serde(default)]
    pub color: Color,
    pub created_at: DateTime<Utc>,
}

/// Validated input for a new highlight. Construct through [`NewHighlight::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHighlight {
    pub user_id: String,
    pub url: String,
    pub text: String,
    pub color: Color,
}

impl NewHighlight {
    pub fn new(
        user_id: Option<&str>,
        url: Option<&str>,
        text: Option<&str>,
        color: Option<&str>,
    ) -> Result<Self, HighlightError> {
        let mut missing = Vec::new();
        let user_id = required(user_id, "userId", &mut missing);
        let url = required(url, "url", &mut missing);
        let text = required(text, "text", &mut missing);

        if !missing.is_empty() {
            return Err(HighlightError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let color = match color {
            None => Color::default(),
            Some(c) if c.trim().is_empty() => Color::default(),
            Some(c) => c.parse::<Color>()?,
        };

        Ok(NewHighlight {
            user_id,
            url,
            text,
            color,
        })
    }

    pub fn into_highlight(self, id: String, created_at: DateTime<Utc>) -> Highlight {
        Highlight {
            id,
            user_id: self.user_id,
            url: self.url,
            text: self.text,
            color: self.color,
            created_at,
        }
    }
}

// userId and url are kept verbatim; blank values are rejected.
fn required(value: Option<&str>, name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => {
            missing.push(name);
            String::new()
        }
    }
}

/// Current time truncated to millisecond precision, the resolution `createdAt` is stored at.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
